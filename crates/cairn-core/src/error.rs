//! Error types for suite construction, test outcomes and whole runs

use std::path::PathBuf;
use thiserror::Error;

/// A malformed suite argument. Fatal: the run aborts before anything executes.
#[derive(Debug, Error)]
pub enum SuiteDefinitionError {
    #[error("Test suite name must be given")]
    EmptyName,

    #[error("Duplicate entry '{name}' in test suite '{suite}'")]
    DuplicateName { suite: String, name: String },

    #[error("Test suite path {0} does not exist")]
    MissingPath(PathBuf),

    #[error("{path} is not a valid test suite: {reason}")]
    InvalidSource { path: PathBuf, reason: String },

    #[error("{path}: entry '{key}' {reason}")]
    InvalidEntry {
        path: PathBuf,
        key: String,
        reason: String,
    },

    #[error("Suite {path} includes itself: {}", include_chain(.chain))]
    CyclicInclude { path: PathBuf, chain: Vec<PathBuf> },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn include_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Why a single test failed.
///
/// Cloneable so the same failure can be fanned out to every reporter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TestError {
    /// The body returned an error or panicked
    #[error("{message}")]
    Runtime {
        message: String,
        origin: Option<String>,
    },

    #[error("Test has timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The enclosing persistent context could not be set up
    #[error("Persistent context failed to evaluate: {message}")]
    ContextInit {
        message: String,
        origin: Option<String>,
    },

    /// Raised outside any awaited body and caught by the error trap
    #[error("{message}")]
    Uncaught {
        message: String,
        origin: Option<String>,
    },
}

impl TestError {
    /// Convert an error returned by a test body
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let (message, origin) = split_located(err);
        TestError::Runtime { message, origin }
    }

    /// Convert an error that escaped after its test was already settled
    pub fn uncaught_from_anyhow(err: &anyhow::Error) -> Self {
        let (message, origin) = split_located(err);
        TestError::Uncaught { message, origin }
    }

    pub fn origin(&self) -> Option<&str> {
        match self {
            TestError::Runtime { origin, .. }
            | TestError::ContextInit { origin, .. }
            | TestError::Uncaught { origin, .. } => origin.as_deref(),
            TestError::Timeout { .. } => None,
        }
    }

    /// Attach an origin if none is recorded yet
    pub fn with_origin(mut self, location: Option<String>) -> Self {
        if let TestError::Runtime { origin, .. }
        | TestError::ContextInit { origin, .. }
        | TestError::Uncaught { origin, .. } = &mut self
        {
            if origin.is_none() {
                *origin = location;
            }
        }
        self
    }
}

fn split_located(err: &anyhow::Error) -> (String, Option<String>) {
    match err.downcast_ref::<LocatedError>() {
        Some(located) => (located.message.clone(), Some(located.origin.clone())),
        None => (format!("{:#}", err), None),
    }
}

/// An error that knows where it came from, e.g. the suite file of a command test.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct LocatedError {
    pub message: String,
    pub origin: String,
}

impl LocatedError {
    pub fn new(message: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin: origin.into(),
        }
    }
}

/// A persistent context's teardown hook failed. Reported only; recorded
/// test outcomes are left alone.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Persistent context failed to tear down: {message}")]
pub struct ContextTeardownError {
    pub message: String,
    pub origin: Option<String>,
}

impl ContextTeardownError {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let (message, origin) = split_located(err);
        Self { message, origin }
    }
}

/// Errors that end a run early
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Definition(#[from] SuiteDefinitionError),

    #[error("File watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("Reporter task failed: {0}")]
    Pipeline(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_from_anyhow_keeps_context_chain() {
        let err = anyhow!("disk full").context("writing fixture");
        assert_eq!(
            TestError::from_anyhow(&err),
            TestError::Runtime {
                message: "writing fixture: disk full".to_string(),
                origin: None,
            }
        );
    }

    #[test]
    fn test_from_anyhow_uses_located_origin() {
        let err = anyhow::Error::new(LocatedError::new("exit status 1", "suites/math.toml"));
        let converted = TestError::from_anyhow(&err);
        assert_eq!(converted.to_string(), "exit status 1");
        assert_eq!(converted.origin(), Some("suites/math.toml"));
    }

    #[test]
    fn test_with_origin_does_not_overwrite() {
        let err = TestError::Runtime {
            message: "boom".to_string(),
            origin: Some("a.rs:1:1".to_string()),
        }
        .with_origin(Some("b.rs:2:2".to_string()));
        assert_eq!(err.origin(), Some("a.rs:1:1"));

        let timeout = TestError::Timeout { timeout_ms: 10 }.with_origin(Some("x".to_string()));
        assert_eq!(timeout.origin(), None);
    }

    #[test]
    fn test_context_init_message() {
        let err = TestError::ContextInit {
            message: "Init error".to_string(),
            origin: None,
        };
        assert_eq!(err.to_string(), "Persistent context failed to evaluate: Init error");
    }
}
