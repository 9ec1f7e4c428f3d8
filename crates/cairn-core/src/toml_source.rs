//! Suite files in TOML
//!
//! The runtime shape of each value picks the node kind:
//!
//! ```toml
//! "adds numbers" = ["sh", "-c", "test $((1 + 1)) -eq 2"]     # test
//! slow = { cmd = ["sleep", "1"], timeout = 1500 }            # test with options
//! other = "more/other.toml"                                 # path-backed suite
//!
//! [nested]                                                  # inline suite
//! "!only me" = ["true"]                                     # focused test
//!
//! [persistent_context]                                      # command fixture
//! setup = ["sh", "-c", "echo ready > state"]
//! teardown = ["sh", "-c", "rm state"]
//! ```

use crate::body::{Scope, TestBody};
use crate::context::{ContextDescriptor, PersistentContext};
use crate::definition::{Definition, Entry, TestDef};
use crate::error::{LocatedError, SuiteDefinitionError};
use crate::registry::SourceLoader;
use async_trait::async_trait;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use toml::{Table, Value};

/// Reserved key holding a suite's command fixture
pub const CONTEXT_KEY: &str = "persistent_context";

/// Environment variable pointing command tests at their fixture directory
pub const CONTEXT_DIR_ENV: &str = "CAIRN_CONTEXT_DIR";

/// Longest stderr excerpt copied into a failure message
const STDERR_TAIL: usize = 2000;

/// Loads `*.toml` suite files
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlLoader;

impl SourceLoader for TomlLoader {
    fn load(&self, path: &Path) -> Result<Definition, SuiteDefinitionError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SuiteDefinitionError::MissingPath(path.to_path_buf())
            } else {
                SuiteDefinitionError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        parse_suite(&content, path)
    }
}

/// Parse suite file content; relative paths resolve against the file's directory
pub fn parse_suite(content: &str, file: &Path) -> Result<Definition, SuiteDefinitionError> {
    let table: Table = toml::from_str(content).map_err(|e| SuiteDefinitionError::InvalidSource {
        path: file.to_path_buf(),
        reason: e.to_string(),
    })?;
    let base = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    definition_from_table(&table, file, &base)
}

fn definition_from_table(
    table: &Table,
    file: &Path,
    base: &Path,
) -> Result<Definition, SuiteDefinitionError> {
    let mut def = Definition::new();

    for (key, value) in table {
        if key == CONTEXT_KEY {
            def = def.context(command_context(value, file, base)?);
            continue;
        }

        let entry = match value {
            Value::Array(items) => Entry::Test(command_test(argv(items, file, key)?, None, file, base)),
            Value::Table(options) if options.get("cmd").is_some_and(Value::is_array) => {
                Entry::Test(command_test_with_options(options, file, base, key)?)
            }
            Value::Table(nested) => Entry::Suite(definition_from_table(nested, file, base)?),
            Value::String(path) => Entry::Path(base.join(path)),
            other => {
                return Err(invalid(
                    file,
                    key,
                    format!(
                        "must be a command array, a table or a path string, found {}",
                        other.type_str()
                    ),
                ))
            }
        };
        def = def.entry(key.as_str(), entry);
    }

    Ok(def)
}

fn invalid(file: &Path, key: &str, reason: impl Into<String>) -> SuiteDefinitionError {
    SuiteDefinitionError::InvalidEntry {
        path: file.to_path_buf(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn argv(items: &[Value], file: &Path, key: &str) -> Result<Vec<String>, SuiteDefinitionError> {
    let argv = items
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| invalid(file, key, "command must contain only strings"))?;
    if argv.is_empty() {
        return Err(invalid(file, key, "command cannot be empty"));
    }
    Ok(argv)
}

fn command_test_with_options(
    options: &Table,
    file: &Path,
    base: &Path,
    key: &str,
) -> Result<TestDef, SuiteDefinitionError> {
    for option in options.keys() {
        if !matches!(option.as_str(), "cmd" | "timeout" | "cwd") {
            return Err(invalid(file, key, format!("has unknown option '{}'", option)));
        }
    }

    let items = options
        .get("cmd")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(file, key, "is missing 'cmd'"))?;
    let timeout = match options.get("timeout") {
        None => None,
        Some(value) => match value.as_integer() {
            Some(ms) if ms > 0 => Some(ms as u64),
            _ => return Err(invalid(file, key, "timeout must be a positive integer")),
        },
    };
    let cwd = match options.get("cwd") {
        None => None,
        Some(value) => Some(
            value
                .as_str()
                .map(|dir| base.join(dir))
                .ok_or_else(|| invalid(file, key, "cwd must be a string"))?,
        ),
    };

    let def = command_test(argv(items, file, key)?, cwd, file, base);
    Ok(match timeout {
        Some(ms) => def.with_timeout(ms),
        None => def,
    })
}

fn command_test(argv: Vec<String>, cwd: Option<PathBuf>, file: &Path, base: &Path) -> TestDef {
    let cwd = cwd.unwrap_or_else(|| base.to_path_buf());
    let origin = file.display().to_string();

    TestDef::new(TestBody::future(move |scope: Scope| {
        let argv = argv.clone();
        let cwd = cwd.clone();
        let origin = origin.clone();
        let context_dir = scope
            .context::<CommandContext>()
            .map(|ctx| ctx.dir().to_path_buf());
        let options = scope.options().clone();

        async move {
            let mut command = Command::new(&argv[0]);
            command
                .args(&argv[1..])
                .current_dir(&cwd)
                .env("CAIRN_SNAPSHOT_ROOT", &options.snapshot_root)
                .env("CAIRN_SNAPSHOT", if options.snapshot { "1" } else { "0" });
            if options.interactive {
                command.env("CAIRN_INTERACTIVE", "1");
            } else {
                command.stdin(Stdio::null());
            }
            if let Some(dir) = context_dir {
                command.env(CONTEXT_DIR_ENV, dir);
            }
            run_command(command, &argv, &origin).await
        }
    }))
}

async fn run_command(mut command: Command, argv: &[String], origin: &str) -> anyhow::Result<()> {
    let shown = argv.join(" ");
    let output = command
        .output()
        .await
        .map_err(|e| LocatedError::new(format!("Failed to spawn `{}`: {}", shown, e), origin))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim_end();
    let mut message = format!("`{}` exited with {}", shown, output.status);
    if !stderr.is_empty() {
        let start = stderr
            .char_indices()
            .rev()
            .nth(STDERR_TAIL)
            .map_or(0, |(i, _)| i);
        message.push('\n');
        message.push_str(&stderr[start..]);
    }
    Err(LocatedError::new(message, origin).into())
}

fn command_context(
    value: &Value,
    file: &Path,
    base: &Path,
) -> Result<ContextDescriptor, SuiteDefinitionError> {
    let table = value
        .as_table()
        .ok_or_else(|| invalid(file, CONTEXT_KEY, "must be a table"))?;

    let mut setup = None;
    let mut teardown = None;
    for (hook, command) in table {
        let items = command
            .as_array()
            .ok_or_else(|| invalid(file, CONTEXT_KEY, format!("'{}' must be a command array", hook)))?;
        let argv = argv(items, file, CONTEXT_KEY)?;
        match hook.as_str() {
            "setup" => setup = Some(argv),
            "teardown" => teardown = Some(argv),
            other => {
                return Err(invalid(
                    file,
                    CONTEXT_KEY,
                    format!("has unknown hook '{}'", other),
                ))
            }
        }
    }

    let origin = file.display().to_string();
    let base = base.to_path_buf();
    Ok(ContextDescriptor::new(CONTEXT_KEY, move || {
        let dir = tempfile::Builder::new().prefix("cairn-context-").tempdir()?;
        Ok(CommandContext {
            dir,
            setup: setup.clone(),
            teardown: teardown.clone(),
            origin: origin.clone(),
            base: base.clone(),
        })
    }))
}

/// A fixture backed by a private temporary directory
///
/// The directory is removed when the context is dropped after teardown.
#[derive(Debug)]
pub struct CommandContext {
    dir: TempDir,
    setup: Option<Vec<String>>,
    teardown: Option<Vec<String>>,
    origin: String,
    base: PathBuf,
}

impl CommandContext {
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    async fn hook(&self, argv: Option<&Vec<String>>) -> anyhow::Result<()> {
        let Some(argv) = argv else {
            return Ok(());
        };
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(self.dir())
            .env(CONTEXT_DIR_ENV, self.dir())
            .env("CAIRN_SUITE_DIR", &self.base)
            .stdin(Stdio::null());
        run_command(command, argv, &self.origin).await
    }
}

#[async_trait]
impl PersistentContext for CommandContext {
    async fn initialize(&self) -> anyhow::Result<()> {
        self.hook(self.setup.as_ref()).await
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        self.hook(self.teardown.as_ref()).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
