//! Walks a loaded tree depth-first and runs its tests one at a time

use crate::body::{Done, Scope, TestBody};
use crate::context::PersistentContext;
use crate::error::{ContextTeardownError, TestError};
use crate::event::{Event, Notifier};
use crate::options::RunOptions;
use crate::suite::{Node, Test, TestSuite};
use crate::trap::{self, panic_message, ErrorTrap, Settled, Ticket};
use futures_util::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

type Contexts = Vec<Arc<dyn PersistentContext>>;

/// Runs a tree, emitting events through a notifier
pub struct Sequencer {
    notify: Notifier,
    options: Arc<RunOptions>,
    trap: Option<ErrorTrap>,
    /// Watchers of timed-out bodies that have not settled yet
    orphans: Mutex<Vec<JoinHandle<()>>>,
}

impl Sequencer {
    pub fn new(notify: Notifier, options: Arc<RunOptions>) -> Self {
        Self {
            notify,
            options,
            trap: None,
            orphans: Mutex::new(Vec::new()),
        }
    }

    /// Attribute panics and late failures through `trap`
    pub fn with_trap(mut self, trap: ErrorTrap) -> Self {
        self.trap = Some(trap);
        self
    }

    /// Run every eligible test under `root`. The root itself emits no events.
    pub async fn run(&self, root: &mut TestSuite) {
        let filter = root.has_focused();
        self.run_suite(root, Vec::new(), filter, Vec::new()).await;
    }

    /// Wait up to `grace` for timed-out bodies to settle so their late failures
    /// are still reported. Returns false if some were still running.
    pub async fn settle_orphans(&self, grace: Duration) -> bool {
        let pending = std::mem::take(&mut *self.orphans.lock());
        if pending.is_empty() {
            return true;
        }
        let count = pending.len();
        debug!(count, "waiting for timed out tests to settle");
        match tokio::time::timeout(grace, join_all(pending)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(count, grace_ms = grace.as_millis() as u64, "timed out tests still running");
                false
            }
        }
    }

    fn emit(&self, event: Event) {
        (self.notify)(event);
    }

    /// `path` is the chain children see as their ancestors
    fn run_suite<'a>(
        &'a self,
        suite: &'a mut TestSuite,
        path: Vec<String>,
        filter: bool,
        mut contexts: Contexts,
    ) -> BoxFuture<'a, ()> {
        async move {
            let mut constructed = None;
            let mut init_error = None;

            if let Some(descriptor) = suite.persistent_context().cloned() {
                debug!(suite = %suite.name(), context = %descriptor.name(), "constructing persistent context");
                match descriptor.construct() {
                    Ok(context) => {
                        if let Err(err) = self.initialize(&context).await {
                            init_error = Some(err);
                        }
                        contexts.push(Arc::clone(&context));
                        constructed = Some(context);
                    }
                    Err(err) => init_error = Some(context_init_error(&err, None)),
                }
            }

            match &init_error {
                Some(err) => self.fail_subtree(suite, &path, filter, err),
                None => {
                    for child in suite.children_mut() {
                        if filter && !child.has_focused() {
                            continue;
                        }
                        let child_filter = filter && !child.is_focused();
                        match child {
                            Node::Test(test) => self.run_test(test, &path, &contexts).await,
                            Node::Suite(nested) => {
                                let name = nested.name().to_string();
                                self.emit(Event::SuiteStart {
                                    name: name.clone(),
                                    path: path.clone(),
                                });
                                let mut nested_path = path.clone();
                                nested_path.push(name.clone());
                                self.run_suite(nested, nested_path, child_filter, contexts.clone())
                                    .await;
                                self.emit(Event::SuiteEnd {
                                    name,
                                    path: path.clone(),
                                });
                            }
                        }
                    }
                }
            }

            if let Some(context) = constructed {
                if let Err(error) = self.teardown(&context).await {
                    self.emit(Event::ContextTeardown { path, error });
                }
            }
        }
        .boxed()
    }

    /// Record `error` on every eligible test under `suite` without running any body
    fn fail_subtree(&self, suite: &mut TestSuite, path: &[String], filter: bool, error: &TestError) {
        for child in suite.children_mut() {
            if filter && !child.has_focused() {
                continue;
            }
            let child_filter = filter && !child.is_focused();
            match child {
                Node::Test(test) => {
                    let name = test.name().to_string();
                    self.emit(Event::TestStart {
                        name: name.clone(),
                        path: path.to_vec(),
                    });
                    test.settle(Err(error.clone()));
                    self.emit(Event::TestEnd {
                        name,
                        path: path.to_vec(),
                        error: Some(error.clone()),
                    });
                }
                Node::Suite(nested) => {
                    let name = nested.name().to_string();
                    self.emit(Event::SuiteStart {
                        name: name.clone(),
                        path: path.to_vec(),
                    });
                    let mut nested_path = path.to_vec();
                    nested_path.push(name.clone());
                    self.fail_subtree(nested, &nested_path, child_filter, error);
                    self.emit(Event::SuiteEnd {
                        name,
                        path: path.to_vec(),
                    });
                }
            }
        }
    }

    async fn initialize(&self, context: &Arc<dyn PersistentContext>) -> Result<(), TestError> {
        let context = Arc::clone(context);
        let (result, settled) = self
            .run_hook(async move { context.initialize().await })
            .await;
        result.map_err(|err| match err {
            HookError::Failed(err) => context_init_error(&err, settled.origin),
            HookError::Panicked(message) => TestError::ContextInit {
                message,
                origin: settled.origin,
            },
        })
    }

    async fn teardown(&self, context: &Arc<dyn PersistentContext>) -> Result<(), ContextTeardownError> {
        let context = Arc::clone(context);
        let (result, settled) = self.run_hook(async move { context.teardown().await }).await;
        result.map_err(|err| {
            let mut error = match err {
                HookError::Failed(err) => ContextTeardownError::from_anyhow(&err),
                HookError::Panicked(message) => ContextTeardownError {
                    message,
                    origin: None,
                },
            };
            if error.origin.is_none() {
                error.origin = settled.origin;
            }
            error
        })
    }

    async fn run_hook<F>(&self, hook: F) -> (Result<(), HookError>, Settled)
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let ticket = Ticket::next();
        self.begin(ticket);
        let joined = tokio::spawn(trap::with_ticket(ticket, hook)).await;
        let settled = self.finish(ticket);
        for foreign in &settled.foreign {
            self.report(foreign.clone());
        }
        let result = match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(HookError::Failed(err)),
            Err(join) => Err(HookError::Panicked(join_message(join))),
        };
        (result, settled)
    }

    async fn run_test(&self, test: &mut Test, path: &[String], contexts: &Contexts) {
        let name = test.name().to_string();
        self.emit(Event::TestStart {
            name: name.clone(),
            path: path.to_vec(),
        });

        let mut scope_path = path.to_vec();
        scope_path.push(name.clone());
        let scope = Scope::new(scope_path, contexts.clone(), Arc::clone(&self.options));
        let limit = self.options.timeout_for(test.timeout());

        let ticket = Ticket::next();
        self.begin(ticket);
        let mut handle = spawn_body(test.body().clone(), scope, ticket);

        let result = match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => {
                let settled = self.finish(ticket);
                let own = match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(TestError::from_anyhow(&err)),
                    Err(join) => Err(TestError::Runtime {
                        message: join_message(join),
                        origin: None,
                    }
                    .with_origin(settled.origin)),
                };
                self.attribute(own, settled.foreign)
            }
            Err(_) => {
                debug!(test = %name, timeout_ms = limit.as_millis() as u64, "test timed out");
                let foreign = match &self.trap {
                    Some(trap) => trap.abandon(ticket),
                    None => Vec::new(),
                };
                for error in foreign {
                    self.report(error);
                }
                self.watch_orphan(name.clone(), handle);
                Err(TestError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        };

        let error = result.as_ref().err().cloned();
        test.settle(result);
        self.emit(Event::TestEnd {
            name,
            path: path.to_vec(),
            error,
        });
    }

    /// A foreign error fails a test that otherwise passed; anything else is run-level
    fn attribute(&self, own: Result<(), TestError>, foreign: Vec<TestError>) -> Result<(), TestError> {
        let mut foreign = foreign.into_iter();
        let result = match own {
            Ok(()) => match foreign.next() {
                Some(error) => Err(error),
                None => Ok(()),
            },
            Err(error) => Err(error),
        };
        for error in foreign {
            self.report(error);
        }
        result
    }

    /// Keep listening to a timed-out body; a late failure becomes a run-level error
    fn watch_orphan(&self, name: String, handle: JoinHandle<anyhow::Result<()>>) {
        let trap = self.trap.clone();
        let watcher = tokio::spawn(async move {
            // Panics reach the trap through the hook with a stale ticket.
            if let Ok(Err(err)) = handle.await {
                match trap {
                    Some(trap) => trap.report(TestError::uncaught_from_anyhow(&err)),
                    None => warn!(test = %name, error = %err, "timed out test failed later"),
                }
            }
        });
        self.orphans.lock().push(watcher);
    }

    fn begin(&self, ticket: Ticket) {
        if let Some(trap) = &self.trap {
            trap.begin(ticket);
        }
    }

    fn finish(&self, ticket: Ticket) -> Settled {
        match &self.trap {
            Some(trap) => trap.finish(ticket),
            None => Settled::default(),
        }
    }

    fn report(&self, error: TestError) {
        match &self.trap {
            Some(trap) => trap.report(error),
            None => self.emit(Event::Uncaught { error }),
        }
    }
}

enum HookError {
    Failed(anyhow::Error),
    Panicked(String),
}

fn context_init_error(err: &anyhow::Error, origin: Option<String>) -> TestError {
    match TestError::from_anyhow(err) {
        TestError::Runtime { message, origin: own } => TestError::ContextInit {
            message,
            origin: own.or(origin),
        },
        other => other,
    }
}

fn join_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(&*err.into_panic())
    } else {
        "Test body was cancelled".to_string()
    }
}

fn spawn_body(body: TestBody, scope: Scope, ticket: Ticket) -> JoinHandle<anyhow::Result<()>> {
    match body {
        TestBody::Sync(f) => tokio::task::spawn_blocking(move || {
            trap::blocking_with_ticket(ticket, || f(&scope))
        }),
        TestBody::Async(f) => tokio::spawn(trap::with_ticket(ticket, f(scope))),
        TestBody::Callback(f) => {
            let (done, settled) = Done::channel();
            tokio::spawn(trap::with_ticket(ticket, async move {
                f(scope, done);
                settled.await
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Definition;
    use crate::suite::root_from_definition;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn recorder() -> (Notifier, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (Arc::new(move |event| sink.lock().push(event)), events)
    }

    fn trace(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .map(|event| match event {
                Event::SuiteStart { name, .. } => format!("suite-start {}", name),
                Event::SuiteEnd { name, .. } => format!("suite-end {}", name),
                Event::TestStart { name, .. } => format!("test-start {}", name),
                Event::TestEnd { name, error, .. } => {
                    format!("test-end {} {}", name, if error.is_some() { "fail" } else { "ok" })
                }
                Event::ContextTeardown { .. } => "teardown-error".to_string(),
                Event::Uncaught { .. } => "uncaught".to_string(),
            })
            .collect()
    }

    async fn run(def: &Definition) -> (TestSuite, Vec<Event>) {
        let (notify, events) = recorder();
        let mut root = root_from_definition("suite", def).unwrap();
        Sequencer::new(notify, Arc::new(RunOptions::default().with_timeout(200)))
            .run(&mut root)
            .await;
        let events = events.lock().clone();
        (root, events)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_events_follow_depth_first_order() {
        let def = Definition::new()
            .suite("inner", Definition::new().test("deep", |_| Ok(())))
            .test("first", |_| Ok(()))
            .test_async("second", |_| async { anyhow::bail!("rejected") });

        let (root, events) = run(&def).await;
        assert_eq!(
            trace(&events),
            vec![
                "suite-start suite",
                "test-start first",
                "test-end first ok",
                "test-start second",
                "test-end second fail",
                "suite-start inner",
                "test-start deep",
                "test-end deep ok",
                "suite-end inner",
                "suite-end suite",
            ]
        );
        assert!(root.has_errors());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_event_paths_are_ancestor_chains() {
        let def = Definition::new().suite("inner", Definition::new().test("deep", |_| Ok(())));
        let (_, events) = run(&def).await;
        assert!(events.contains(&Event::TestEnd {
            name: "deep".to_string(),
            path: vec!["suite".to_string(), "inner".to_string()],
            error: None,
        }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_focus_skips_unfocused_siblings() {
        let def = Definition::new()
            .test("skipped", |_| Ok(()))
            .test("!chosen", |_| Ok(()))
            .suite("other", Definition::new().test("also skipped", |_| Ok(())))
            .suite("!focused suite", Definition::new().test("runs", |_| Ok(())));

        let (_, events) = run(&def).await;
        assert_eq!(
            trace(&events),
            vec![
                "suite-start suite",
                "test-start chosen",
                "test-end chosen ok",
                "suite-start focused suite",
                "test-start runs",
                "test-end runs ok",
                "suite-end focused suite",
                "suite-end suite",
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_fails_only_that_test() {
        let def = Definition::new()
            .test_async("slow", |_| async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(())
            })
            .test("next", |_| Ok(()));

        let (root, events) = run(&def).await;
        let tests = root.tests();
        assert_eq!(tests[0].error(), Some(&TestError::Timeout { timeout_ms: 200 }));
        assert!(tests[1].error().is_none());
        assert_eq!(trace(&events).len(), 6);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_callback_body_settles_through_done() {
        let def = Definition::new()
            .test_with_done("passes", |_, done| {
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    done.pass();
                });
            })
            .test_with_done("dropped", |_, done| drop(done));

        let (root, _) = run(&def).await;
        let tests = root.tests();
        assert!(tests[0].error().is_none());
        assert_eq!(
            tests[1].error().map(ToString::to_string).as_deref(),
            Some("Test finished without signalling completion")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scope_carries_path_and_options() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let def = Definition::new().test("peek", move |scope| {
            *sink.lock() = Some((scope.path().to_vec(), scope.options().timeout));
            Ok(())
        });

        run(&def).await;
        assert_eq!(
            *seen.lock(),
            Some((vec!["suite".to_string(), "peek".to_string()], Some(200)))
        );
    }
}
