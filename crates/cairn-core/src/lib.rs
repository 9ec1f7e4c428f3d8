//! Cairn core: a hierarchical test runner
//!
//! Builds a tree of tests and suites from inline [`Definition`]s or suite
//! files, runs it one test at a time with timeouts and persistent contexts,
//! and reports the event stream both incrementally and as a buffered error
//! block. [`WatchController`] reruns the tree when its sources change.

pub mod body;
pub mod context;
pub mod definition;
pub mod error;
pub mod event;
pub mod options;
pub mod registry;
pub mod reporter;
pub mod run;
pub mod sequencer;
pub mod suite;
pub mod toml_source;
pub mod trap;
pub mod watch;

pub use body::{Done, Scope, TestBody};
pub use context::{ContextDescriptor, PersistentContext};
pub use definition::{Definition, Entry, TestDef};
pub use error::{ContextTeardownError, LocatedError, RunError, SuiteDefinitionError, TestError};
pub use event::{Buffering, Event, EventBus, Notifier, Subscriber};
pub use options::{RunConfig, RunOptions, DEFAULT_TIMEOUT_MS};
pub use registry::{SourceLoader, SourceRegistry};
pub use reporter::{tally_line, ErrorCollector, Output, ProgressRenderer};
pub use run::{ExitHooks, RunController, RunSummary, Tally};
pub use sequencer::Sequencer;
pub use suite::{build_root, root_from_definition, Node, Status, Test, TestSuite};
pub use toml_source::{parse_suite, TomlLoader};
pub use trap::ErrorTrap;
pub use watch::{Cycle, FileChange, NotifyBackend, WatchBackend, WatchController, WatchState};
