//! Test bodies and the scope handed to them

use crate::context::PersistentContext;
use crate::options::RunOptions;
use anyhow::anyhow;
use futures_util::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

type SyncFn = dyn Fn(&Scope) -> anyhow::Result<()> + Send + Sync;
type AsyncFn = dyn Fn(Scope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;
type CallbackFn = dyn Fn(Scope, Done) + Send + Sync;

/// The executable part of a test
#[derive(Clone)]
pub enum TestBody {
    /// Runs to completion on the blocking pool
    Sync(Arc<SyncFn>),
    /// Returns a future that settles the test
    Async(Arc<AsyncFn>),
    /// Settles the test by signalling through [`Done`]
    Callback(Arc<CallbackFn>),
}

impl TestBody {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Scope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        TestBody::Sync(Arc::new(f))
    }

    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        TestBody::Async(Arc::new(move |scope: Scope| f(scope).boxed()))
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Scope, Done) + Send + Sync + 'static,
    {
        TestBody::Callback(Arc::new(f))
    }
}

impl fmt::Debug for TestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            TestBody::Sync(_) => "Sync",
            TestBody::Async(_) => "Async",
            TestBody::Callback(_) => "Callback",
        };
        write!(f, "TestBody::{}", kind)
    }
}

/// Completion signal for callback-style tests
///
/// Dropping it without calling [`Done::pass`] or [`Done::fail`] fails the test.
#[derive(Debug)]
pub struct Done {
    tx: oneshot::Sender<anyhow::Result<()>>,
}

impl Done {
    pub(crate) fn channel() -> (Self, impl Future<Output = anyhow::Result<()>>) {
        let (tx, rx) = oneshot::channel();
        let settled = async move {
            rx.await
                .unwrap_or_else(|_| Err(anyhow!("Test finished without signalling completion")))
        };
        (Self { tx }, settled)
    }

    pub fn pass(self) {
        self.finish(Ok(()));
    }

    pub fn fail(self, err: impl Into<anyhow::Error>) {
        self.finish(Err(err.into()));
    }

    pub fn finish(self, result: anyhow::Result<()>) {
        // Fails only when the body task was dropped at runtime shutdown.
        let _ = self.tx.send(result);
    }
}

/// What a running test can see: its path, the enclosing contexts and run options
#[derive(Clone)]
pub struct Scope {
    path: Vec<String>,
    contexts: Vec<Arc<dyn PersistentContext>>,
    options: Arc<RunOptions>,
}

impl Scope {
    pub(crate) fn new(
        path: Vec<String>,
        contexts: Vec<Arc<dyn PersistentContext>>,
        options: Arc<RunOptions>,
    ) -> Self {
        Self {
            path,
            contexts,
            options,
        }
    }

    /// Ancestor suite names followed by the test name
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or("")
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Nearest enclosing persistent context of type `T`
    pub fn context<T: 'static>(&self) -> Option<&T> {
        self.contexts
            .iter()
            .rev()
            .find_map(|ctx| ctx.as_any().downcast_ref::<T>())
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("path", &self.path)
            .field("contexts", &self.contexts.len())
            .field("options", &self.options)
            .finish()
    }
}
