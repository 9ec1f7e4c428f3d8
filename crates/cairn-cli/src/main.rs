use anyhow::{Context, Result};
use cairn_config::{Config, ConfigLoader};
use cairn_core::{RunConfig, RunOptions};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

/// Directory searched when neither the command line nor cairn.toml names any suites
const DEFAULT_SUITE_DIR: &str = "test";

/// Cairn - a hierarchical test runner.
///
/// Runs TOML suite files: every string array is a command that must exit 0,
/// every table a nested suite. Prefix a name with '!' to focus it.
///
/// EXAMPLES:
///     cairn                         Run the suites named in cairn.toml (or ./test)
///     cairn test/api.toml -t 5000   Run one file with a 5s default timeout
///     cairn test --watch            Rerun whenever a suite file changes
///     cairn test --list             Print the suite tree
///
/// ENVIRONMENT VARIABLES:
///     CAIRN_TIMEOUT        Default test timeout in milliseconds
///     CAIRN_SNAPSHOT_ROOT  Snapshot directory
///     NO_COLOR             Set to disable colored output
///     RUST_LOG             Log filter (logs go to stderr)
#[derive(Parser, Debug)]
#[command(name = "cairn")]
#[command(version)]
struct Cli {
    /// Suite files or directories
    paths: Vec<PathBuf>,

    /// Rerun when a loaded suite file changes
    #[arg(long, short = 'w')]
    watch: bool,

    /// Default test timeout in milliseconds
    #[arg(long, short = 't', value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Record snapshots instead of comparing against them
    #[arg(long, short = 's')]
    snapshot: bool,

    /// Directory holding snapshot files
    #[arg(long, value_name = "DIR")]
    snapshot_root: Option<PathBuf>,

    /// Allow tests to prompt on the terminal
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Print the suite tree without running it
    #[arg(long)]
    list: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Debug logging on stderr
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cwd = std::env::current_dir()?;
    let config = ConfigLoader::new()
        .load_from_directory(&cwd)
        .context("Failed to load configuration")?;

    if cli.no_color || config.no_color() {
        colored::control::set_override(false);
    }

    let run_config = run_config(&cli, &config, &cwd)?;
    if cli.list {
        commands::list::run(&run_config.paths)?;
        return Ok(ExitCode::SUCCESS);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let code = if run_config.watch {
        runtime.block_on(commands::watch::run(run_config))
    } else {
        runtime.block_on(commands::run::run(run_config))
    };
    // Timed-out test bodies may still be running on the blocking pool.
    runtime.shutdown_timeout(Duration::from_millis(100));

    Ok(ExitCode::from(code?))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Merge command-line flags over the loaded configuration
fn run_config(cli: &Cli, config: &Config, cwd: &Path) -> Result<RunConfig> {
    let mut paths = cli.paths.clone();
    if paths.is_empty() {
        paths = config.paths();
    }
    if paths.is_empty() {
        let fallback = cwd.join(DEFAULT_SUITE_DIR);
        if !fallback.is_dir() {
            anyhow::bail!(
                "No suite paths given and no '{}' directory found. Pass paths or set [run] paths in cairn.toml",
                DEFAULT_SUITE_DIR
            );
        }
        paths.push(PathBuf::from(DEFAULT_SUITE_DIR));
    }

    Ok(RunConfig {
        paths,
        watch: cli.watch || config.watch(),
        options: RunOptions {
            timeout: Some(cli.timeout.unwrap_or_else(|| config.timeout())),
            snapshot: cli.snapshot || config.snapshot(),
            snapshot_root: cli
                .snapshot_root
                .clone()
                .unwrap_or_else(|| config.snapshot_root()),
            interactive: cli.interactive || config.interactive(),
        },
    })
}
