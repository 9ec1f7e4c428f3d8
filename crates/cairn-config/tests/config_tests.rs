//! Configuration loading and precedence tests

use cairn_config::{ConfigLoader, DEFAULT_SNAPSHOT_ROOT, DEFAULT_TIMEOUT_MS};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

// ============================================================================
// Precedence
// ============================================================================

#[rstest]
#[case::builtin(None, None, DEFAULT_TIMEOUT_MS)]
#[case::global_only(Some(900), None, 900)]
#[case::project_beats_global(Some(900), Some(120), 120)]
#[case::project_only(None, Some(50), 50)]
#[serial]
fn test_timeout_precedence(
    #[case] global: Option<u64>,
    #[case] project: Option<u64>,
    #[case] expected: u64,
) {
    let temp_dir = TempDir::new().unwrap();
    let global_path = temp_dir.path().join("global.toml");
    if let Some(ms) = global {
        fs::write(&global_path, format!("[defaults]\ntimeout = {}\n", ms)).unwrap();
    }
    let project_dir = temp_dir.path().join("project");
    fs::create_dir(&project_dir).unwrap();
    if let Some(ms) = project {
        write(&project_dir, "cairn.toml", &format!("[run]\ntimeout = {}\n", ms));
    }

    let config = ConfigLoader::new()
        .with_global_path(&global_path)
        .load_from_directory(&project_dir)
        .unwrap();

    assert_eq!(config.timeout(), expected);
}

#[test]
#[serial]
fn test_invalid_global_config_falls_back_to_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let global_path = write(temp_dir.path(), "global.toml", "this is not toml = = =");

    let config = ConfigLoader::new()
        .with_global_path(&global_path)
        .load_from_directory(temp_dir.path())
        .unwrap();

    assert_eq!(config.timeout(), DEFAULT_TIMEOUT_MS);
}

#[test]
#[serial]
fn test_invalid_project_config_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "cairn.toml", "[run]\ntimeout = \"fast\"\n");

    let result = ConfigLoader::new()
        .with_global_path(temp_dir.path().join("none.toml"))
        .load_from_directory(temp_dir.path());

    assert!(result.is_err());
}

// ============================================================================
// Run section
// ============================================================================

#[test]
#[serial]
fn test_run_flags_and_snapshot_root() {
    let temp_dir = TempDir::new().unwrap();
    let path = write(
        temp_dir.path(),
        "cairn.toml",
        r#"
[run]
watch = true
interactive = true
snapshot_root = "snaps"
"#,
    );

    let config = ConfigLoader::new()
        .with_global_path(temp_dir.path().join("none.toml"))
        .load_from_file(&path)
        .unwrap();

    assert!(config.watch());
    assert!(config.interactive());
    assert!(!config.snapshot());
    assert_eq!(config.snapshot_root(), temp_dir.path().join("snaps"));
}

#[test]
#[serial]
fn test_default_snapshot_root() {
    let temp_dir = TempDir::new().unwrap();
    let path = write(temp_dir.path(), "cairn.toml", "");

    let config = ConfigLoader::new()
        .with_global_path(temp_dir.path().join("none.toml"))
        .load_from_file(&path)
        .unwrap();

    assert!(config.is_project());
    assert_eq!(config.snapshot_root(), PathBuf::from(DEFAULT_SNAPSHOT_ROOT));
    assert!(config.paths().is_empty());
}

#[test]
#[serial]
fn test_env_snapshot_root_override() {
    let temp_dir = TempDir::new().unwrap();
    let path = write(temp_dir.path(), "cairn.toml", "[run]\nsnapshot_root = \"a\"\n");

    std::env::set_var("CAIRN_SNAPSHOT_ROOT", "/var/snaps");
    let result = ConfigLoader::new()
        .with_global_path(temp_dir.path().join("none.toml"))
        .load_from_file(&path);
    std::env::remove_var("CAIRN_SNAPSHOT_ROOT");

    assert_eq!(result.unwrap().snapshot_root(), PathBuf::from("/var/snaps"));
}
