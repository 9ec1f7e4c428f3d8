//! Watch mode - rerun suites whenever a loaded suite file changes

use anyhow::{Context, Result};
use cairn_core::{ExitHooks, NotifyBackend, Output, RunConfig, RunController, WatchController};
use colored::*;
use tracing::info;

/// Run, then keep rerunning on change until Ctrl+C
///
/// Returns the exit status of the last completed run.
pub async fn run(config: RunConfig) -> Result<u8> {
    let hooks = ExitHooks::new();
    let controller =
        RunController::new(config.options, Output::stdout()).with_exit_hooks(hooks.clone());
    let (backend, changes) = NotifyBackend::new().context("Failed to create file watcher")?;
    let mut watch = WatchController::new(controller, backend, changes, config.paths);

    println!("{}", "Watching suite files for changes. Press Ctrl+C to stop.".dimmed());
    println!();

    tokio::select! {
        result = watch.run() => {
            result?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("watch mode interrupted");
        }
    }

    Ok(hooks.exit_code())
}
