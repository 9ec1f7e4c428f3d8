//! Inline suite definitions
//!
//! A [`Definition`] is an ordered, name-keyed mapping. Each value decides the
//! kind of node it becomes: a test body, a nested suite, or a path to another
//! loadable suite. Names starting with `!` are focused.

use crate::body::{Done, Scope, TestBody};
use crate::context::ContextDescriptor;
use std::future::Future;
use std::path::PathBuf;

/// A test body plus its per-test settings
#[derive(Debug, Clone)]
pub struct TestDef {
    pub body: TestBody,
    /// Overrides every other timeout for this test
    pub timeout: Option<u64>,
}

impl TestDef {
    pub fn new(body: TestBody) -> Self {
        Self {
            body,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }
}

/// One value of a definition mapping
#[derive(Debug, Clone)]
pub enum Entry {
    Test(TestDef),
    Suite(Definition),
    Path(PathBuf),
}

/// Name-keyed, declaration-ordered suite contents
#[derive(Debug, Clone, Default)]
pub struct Definition {
    entries: Vec<(String, Entry)>,
    context: Option<ContextDescriptor>,
}

impl Definition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, name: impl Into<String>, entry: Entry) -> Self {
        self.entries.push((name.into(), entry));
        self
    }

    /// Add a synchronous test
    pub fn test<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Scope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entry(name, Entry::Test(TestDef::new(TestBody::sync(f))))
    }

    /// Add a test whose body returns a future
    pub fn test_async<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.entry(name, Entry::Test(TestDef::new(TestBody::future(f))))
    }

    /// Add a test that settles through a completion signal
    pub fn test_with_done<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Scope, Done) + Send + Sync + 'static,
    {
        self.entry(name, Entry::Test(TestDef::new(TestBody::callback(f))))
    }

    pub fn test_def(self, name: impl Into<String>, def: TestDef) -> Self {
        self.entry(name, Entry::Test(def))
    }

    pub fn suite(self, name: impl Into<String>, definition: Definition) -> Self {
        self.entry(name, Entry::Suite(definition))
    }

    /// Add a nested suite loaded from `path`
    pub fn include(self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.entry(name, Entry::Path(path.into()))
    }

    pub fn context(mut self, descriptor: ContextDescriptor) -> Self {
        self.context = Some(descriptor);
        self
    }

    pub fn entries(&self) -> &[(String, Entry)] {
        &self.entries
    }

    pub fn persistent_context(&self) -> Option<&ContextDescriptor> {
        self.context.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split the focus marker off a name: `"!name"` is focused and displays as `"name"`
pub fn split_focus(name: &str) -> (&str, bool) {
    match name.strip_prefix('!') {
        Some(rest) => (rest, true),
        None => (name, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_declaration_order() {
        let def = Definition::new()
            .test("b", |_| Ok(()))
            .suite("nested", Definition::new())
            .include("other", "suites/other.toml")
            .test_async("a", |_| async { Ok(()) });

        let names: Vec<_> = def.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "nested", "other", "a"]);
        assert!(matches!(def.entries()[2].1, Entry::Path(_)));
    }

    #[test]
    fn test_split_focus() {
        assert_eq!(split_focus("!only this"), ("only this", true));
        assert_eq!(split_focus("plain"), ("plain", false));
        assert_eq!(split_focus("not!focused"), ("not!focused", false));
    }
}
