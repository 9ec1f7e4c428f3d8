//! The test tree: tests and suites built from definitions or loadable paths

use crate::body::TestBody;
use crate::context::ContextDescriptor;
use crate::definition::{split_focus, Definition, Entry, TestDef};
use crate::error::{SuiteDefinitionError, TestError};
use crate::registry::{registry_key, SourceRegistry};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Outcome of a test; an error is present exactly when it failed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Pending,
    Passed,
    Failed(TestError),
}

/// A leaf of the tree
#[derive(Debug)]
pub struct Test {
    name: String,
    focused: bool,
    body: TestBody,
    timeout: Option<u64>,
    status: Status,
}

impl Test {
    pub fn new(name: &str, def: TestDef) -> Self {
        let (name, focused) = split_focus(name);
        Self {
            name: name.to_string(),
            focused,
            body: def.body,
            timeout: def.timeout,
            status: Status::Pending,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn body(&self) -> &TestBody {
        &self.body
    }

    /// Per-test override; `None` means the run default applies
    pub fn timeout(&self) -> Option<u64> {
        self.timeout
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn error(&self) -> Option<&TestError> {
        match &self.status {
            Status::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn settle(&mut self, result: Result<(), TestError>) {
        self.status = match result {
            Ok(()) => Status::Passed,
            Err(err) => Status::Failed(err),
        };
    }

    fn dump(&self) -> String {
        match &self.status {
            Status::Pending => self.name.clone(),
            Status::Passed => format!("✓ {}", self.name),
            Status::Failed(_) => format!("✗ {}", self.name),
        }
    }
}

#[derive(Debug)]
pub enum Node {
    Test(Test),
    Suite(TestSuite),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Test(test) => test.name(),
            Node::Suite(suite) => suite.name(),
        }
    }

    pub fn is_focused(&self) -> bool {
        match self {
            Node::Test(test) => test.is_focused(),
            Node::Suite(suite) => suite.is_focused(),
        }
    }

    /// The node is focused or contains a focused descendant
    pub fn has_focused(&self) -> bool {
        match self {
            Node::Test(test) => test.is_focused(),
            Node::Suite(suite) => suite.has_focused(),
        }
    }
}

/// Where a suite's children come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Inline,
    Path(PathBuf),
    Directory(PathBuf),
}

#[derive(Debug)]
pub struct TestSuite {
    name: String,
    focused: bool,
    source: Source,
    /// `None` until a path-backed suite is first loaded
    children: Option<Vec<Node>>,
    context: Option<ContextDescriptor>,
    has_focused: bool,
    version: Option<u64>,
}

impl TestSuite {
    fn empty(name: String, source: Source) -> Result<Self, SuiteDefinitionError> {
        if name.is_empty() {
            return Err(SuiteDefinitionError::EmptyName);
        }
        let (display, focused) = split_focus(&name);
        Ok(Self {
            name: display.to_string(),
            focused,
            source,
            children: None,
            context: None,
            has_focused: focused,
            version: None,
        })
    }

    /// Build a suite from an inline definition. Nested paths stay unloaded until [`TestSuite::load`].
    pub fn inline(
        name: impl Into<String>,
        definition: &Definition,
    ) -> Result<Self, SuiteDefinitionError> {
        let mut suite = Self::empty(name.into(), Source::Inline)?;
        suite.materialize(definition)?;
        Ok(suite)
    }

    /// A suite backed by a loadable source file
    pub fn from_path(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, SuiteDefinitionError> {
        Self::empty(name.into(), Source::Path(path.into()))
    }

    /// A suite whose children are the suite files and sub-directories of `path`
    pub fn directory(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, SuiteDefinitionError> {
        Self::empty(name.into(), Source::Directory(path.into()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// True if this suite or any descendant is focused
    pub fn has_focused(&self) -> bool {
        self.has_focused
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn is_loaded(&self) -> bool {
        self.children.is_some()
    }

    /// Registry version of the loaded source, for path-backed suites
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn children(&self) -> &[Node] {
        self.children.as_deref().unwrap_or(&[])
    }

    pub(crate) fn children_mut(&mut self) -> &mut [Node] {
        self.children.as_deref_mut().unwrap_or(&mut [])
    }

    pub fn persistent_context(&self) -> Option<&ContextDescriptor> {
        self.context.as_ref()
    }

    /// Materialize every path-backed suite in this subtree
    pub fn load(&mut self, registry: &mut SourceRegistry) -> Result<(), SuiteDefinitionError> {
        self.load_within(registry, &mut Vec::new())
    }

    /// `chain` holds the canonical sources currently being loaded, outermost first
    fn load_within(
        &mut self,
        registry: &mut SourceRegistry,
        chain: &mut Vec<PathBuf>,
    ) -> Result<(), SuiteDefinitionError> {
        let key = match &self.source {
            Source::Path(path) | Source::Directory(path) => Some(registry_key(path)),
            Source::Inline => None,
        };
        if let Some(key) = &key {
            if chain.contains(key) {
                let mut cycle = chain.clone();
                cycle.push(key.clone());
                return Err(SuiteDefinitionError::CyclicInclude {
                    path: key.clone(),
                    chain: cycle,
                });
            }
            chain.push(key.clone());
        }

        let result = self.load_children(registry, chain);
        if key.is_some() {
            chain.pop();
        }
        result
    }

    fn load_children(
        &mut self,
        registry: &mut SourceRegistry,
        chain: &mut Vec<PathBuf>,
    ) -> Result<(), SuiteDefinitionError> {
        if self.children.is_none() {
            match self.source.clone() {
                Source::Path(path) => {
                    let loaded = registry.load(&path)?;
                    self.version = Some(loaded.version);
                    self.materialize(&loaded.definition)?;
                }
                Source::Directory(dir) => self.materialize_directory(&dir)?,
                Source::Inline => self.children = Some(Vec::new()),
            }
        }

        for child in self.children_mut() {
            if let Node::Suite(suite) = child {
                suite.load_within(registry, chain)?;
            }
        }
        self.refresh_focus();
        Ok(())
    }

    /// Drop cached children and rebuild from the current contents of every source
    /// in this subtree, invalidating the registry so stale definitions are not reused
    pub fn reload(&mut self, registry: &mut SourceRegistry) -> Result<(), SuiteDefinitionError> {
        self.discard(registry);
        self.load(registry)
    }

    fn discard(&mut self, registry: &mut SourceRegistry) {
        for child in self.children_mut() {
            if let Node::Suite(suite) = child {
                suite.discard(registry);
            }
        }
        match &self.source {
            Source::Inline => {}
            Source::Path(path) => {
                registry.invalidate(path);
                self.reset();
            }
            Source::Directory(_) => self.reset(),
        }
    }

    fn reset(&mut self) {
        self.children = None;
        self.context = None;
        self.version = None;
        self.has_focused = self.focused;
    }

    fn materialize(&mut self, definition: &Definition) -> Result<(), SuiteDefinitionError> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(definition.entries().len());

        for (key, entry) in definition.entries() {
            if key.is_empty() {
                return Err(SuiteDefinitionError::EmptyName);
            }
            let (display, _) = split_focus(key);
            if !seen.insert(display.to_string()) {
                return Err(SuiteDefinitionError::DuplicateName {
                    suite: self.name.clone(),
                    name: display.to_string(),
                });
            }

            let node = match entry {
                Entry::Test(def) => Node::Test(Test::new(key, def.clone())),
                Entry::Suite(nested) => Node::Suite(TestSuite::inline(key.as_str(), nested)?),
                Entry::Path(path) => Node::Suite(TestSuite::from_path(key.as_str(), path.clone())?),
            };
            nodes.push(node);
        }

        self.children = Some(tests_before_suites(nodes));
        self.context = definition.persistent_context().cloned();
        self.refresh_focus();
        Ok(())
    }

    fn materialize_directory(&mut self, dir: &Path) -> Result<(), SuiteDefinitionError> {
        let mut nodes = Vec::new();

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| SuiteDefinitionError::Io {
                path: dir.to_path_buf(),
                source: e.into(),
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }

            let path = entry.path();
            if entry.file_type().is_dir() {
                nodes.push(Node::Suite(TestSuite::directory(name, path)?));
            } else if is_suite_file(path) {
                nodes.push(Node::Suite(TestSuite::from_path(name, path)?));
            }
        }

        debug!(dir = %dir.display(), entries = nodes.len(), "listed suite directory");
        self.children = Some(nodes);
        Ok(())
    }

    fn refresh_focus(&mut self) {
        self.has_focused = self.focused || self.children().iter().any(Node::has_focused);
    }

    /// True if any test in the subtree failed
    pub fn has_errors(&self) -> bool {
        self.children().iter().any(|child| match child {
            Node::Test(test) => test.error().is_some(),
            Node::Suite(suite) => suite.has_errors(),
        })
    }

    /// Every test in the subtree, depth-first
    pub fn tests(&self) -> Vec<&Test> {
        let mut out = Vec::new();
        self.collect_tests(&mut out);
        out
    }

    fn collect_tests<'a>(&'a self, out: &mut Vec<&'a Test>) {
        for child in self.children() {
            match child {
                Node::Test(test) => out.push(test),
                Node::Suite(suite) => suite.collect_tests(out),
            }
        }
    }

    /// Indented text rendering of the tree; the unnamed root is not printed
    pub fn dump(&self) -> String {
        let mut lines = Vec::new();
        if self.name.is_empty() {
            for child in self.children() {
                dump_node(child, 0, &mut lines);
            }
        } else {
            dump_suite(self, 0, &mut lines);
        }
        lines.join("\n")
    }
}

fn dump_node(node: &Node, depth: usize, lines: &mut Vec<String>) {
    match node {
        Node::Test(test) => lines.push(format!("{}{}", "    ".repeat(depth), test.dump())),
        Node::Suite(suite) => dump_suite(suite, depth, lines),
    }
}

fn dump_suite(suite: &TestSuite, depth: usize, lines: &mut Vec<String>) {
    lines.push(format!("{}{}", "    ".repeat(depth), suite.name));
    for child in suite.children() {
        dump_node(child, depth + 1, lines);
    }
}

/// Stable partition: tests first, then suites, each group in declaration order
pub fn tests_before_suites(nodes: Vec<Node>) -> Vec<Node> {
    let (mut tests, suites): (Vec<Node>, Vec<Node>) =
        nodes.into_iter().partition(|node| matches!(node, Node::Test(_)));
    tests.extend(suites);
    tests
}

fn is_suite_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "toml")
        && path.file_name().is_some_and(|name| name != "cairn.toml")
}

/// Build the root of a run: one child suite per root path, fully loaded
pub fn build_root(
    paths: &[PathBuf],
    registry: &mut SourceRegistry,
) -> Result<TestSuite, SuiteDefinitionError> {
    let mut seen = HashSet::new();
    let mut children = Vec::with_capacity(paths.len());

    for path in paths {
        let name = path.display().to_string();
        if !seen.insert(name.clone()) {
            debug!(path = %name, "skipping duplicate root path");
            continue;
        }
        let suite = if path.is_dir() {
            TestSuite::directory(name, path.clone())?
        } else {
            TestSuite::from_path(name, path.clone())?
        };
        children.push(Node::Suite(suite));
    }

    let mut root = root_with(children);
    root.load(registry)?;
    Ok(root)
}

/// Wrap an inline definition as the root of a run
pub fn root_from_definition(
    name: impl Into<String>,
    definition: &Definition,
) -> Result<TestSuite, SuiteDefinitionError> {
    let suite = TestSuite::inline(name, definition)?;
    Ok(root_with(vec![Node::Suite(suite)]))
}

fn root_with(children: Vec<Node>) -> TestSuite {
    let mut root = TestSuite {
        name: String::new(),
        focused: false,
        source: Source::Inline,
        children: Some(children),
        context: None,
        has_focused: false,
        version: None,
    };
    root.refresh_focus();
    root
}
