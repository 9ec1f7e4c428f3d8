//! Single run: build, execute, report

use anyhow::Result;
use cairn_core::{Output, RunConfig, RunController};
use tracing::debug;

/// Run the suites once; returns the status left by the run's exit hook
pub async fn run(config: RunConfig) -> Result<u8> {
    let mut controller = RunController::new(config.options, Output::stdout());
    let summary = controller.run(&config.paths).await?;
    debug!(?summary, "single run complete");
    Ok(controller.exit_hooks().exit_code())
}
