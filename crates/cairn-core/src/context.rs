//! Persistent contexts: fixtures shared by every test of one suite subtree
//!
//! A suite may carry a [`ContextDescriptor`]. When the sequencer enters that
//! suite it constructs the context once, runs [`PersistentContext::initialize`]
//! before the first test and [`PersistentContext::teardown`] after the last.
//! Teardown runs whenever construction succeeded, even if initialize failed.

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A fixture object with optional lifecycle hooks
#[async_trait]
pub trait PersistentContext: Send + Sync + 'static {
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Used by [`crate::Scope::context`] to hand the concrete type back to tests
    fn as_any(&self) -> &dyn Any;
}

type Constructor = dyn Fn() -> anyhow::Result<Arc<dyn PersistentContext>> + Send + Sync;

/// Describes how to construct a suite's persistent context
#[derive(Clone)]
pub struct ContextDescriptor {
    name: String,
    construct: Arc<Constructor>,
}

impl ContextDescriptor {
    pub fn new<C, F>(name: impl Into<String>, construct: F) -> Self
    where
        C: PersistentContext,
        F: Fn() -> anyhow::Result<C> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            construct: Arc::new(move || {
                let context = construct()?;
                Ok(Arc::new(context) as Arc<dyn PersistentContext>)
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build a fresh instance; one per subtree traversal
    pub fn construct(&self) -> anyhow::Result<Arc<dyn PersistentContext>> {
        (self.construct)()
    }
}

impl fmt::Debug for ContextDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
