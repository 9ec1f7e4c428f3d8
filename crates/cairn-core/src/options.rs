//! Run configuration shared by the builder, sequencer and test bodies

use std::path::PathBuf;
use std::time::Duration;

/// Timeout used when neither the test nor the run names one.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Options that flow into every test of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Overrides the default timeout of tests that do not set their own
    pub timeout: Option<u64>,
    /// Record snapshots instead of comparing against them
    pub snapshot: bool,
    /// Directory holding snapshot files
    pub snapshot_root: PathBuf,
    /// Tests may prompt on the terminal
    pub interactive: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            snapshot: false,
            snapshot_root: PathBuf::from("test/snapshot"),
            interactive: false,
        }
    }
}

impl RunOptions {
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    /// Timeout for a test: its own override, else the run's, else the default
    pub fn timeout_for(&self, explicit: Option<u64>) -> Duration {
        Duration::from_millis(explicit.or(self.timeout).unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// How long a finished run waits for timed-out bodies before closing its report
    pub fn orphan_grace(&self) -> Duration {
        self.timeout_for(None)
            .max(Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }
}

/// Everything needed to drive one or more runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    /// Root suite files or directories
    pub paths: Vec<PathBuf>,
    /// Re-run when loaded suite files change
    pub watch: bool,
    pub options: RunOptions,
}
