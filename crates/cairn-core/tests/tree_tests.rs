//! Suite trees built from TOML files on disk

use cairn_core::{build_root, Node, SourceRegistry, SuiteDefinitionError, TestSuite};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn names(suite: &TestSuite) -> Vec<String> {
    suite
        .children()
        .iter()
        .map(|node| match node {
            Node::Test(test) => test.name().to_string(),
            Node::Suite(suite) => format!("{}/", suite.name()),
        })
        .collect()
}

fn only_suite(root: &TestSuite) -> &TestSuite {
    match &root.children()[0] {
        Node::Suite(suite) => suite,
        Node::Test(_) => panic!("expected a suite"),
    }
}

#[test]
fn test_directory_root_lists_suite_files_sorted() {
    let dir = tempdir().unwrap();
    write(&dir.path().join("b.toml"), r#"t = ["true"]"#);
    write(&dir.path().join("a.toml"), r#"t = ["true"]"#);
    write(&dir.path().join("cairn.toml"), "[run]\n");
    write(&dir.path().join("notes.txt"), "ignored");
    write(&dir.path().join(".hidden.toml"), r#"t = ["true"]"#);
    write(&dir.path().join("nested/c.toml"), r#"t = ["true"]"#);

    let mut registry = SourceRegistry::default();
    let root = build_root(&[dir.path().to_path_buf()], &mut registry).unwrap();
    let top = only_suite(&root);

    assert_eq!(names(top), vec!["a.toml/", "b.toml/", "nested/"]);
    assert_eq!(registry.loaded_files().len(), 3);
}

#[test]
fn test_includes_resolve_relative_to_the_file() {
    let dir = tempdir().unwrap();
    let main = dir.path().join("main.toml");
    write(
        &main,
        r#"
first = ["true"]
shared = "lib/shared.toml"

[inner]
second = ["true"]
"#,
    );
    write(&dir.path().join("lib/shared.toml"), r#""from shared" = ["true"]"#);

    let mut registry = SourceRegistry::default();
    let root = build_root(&[main.clone()], &mut registry).unwrap();
    let suite = only_suite(&root);

    assert_eq!(names(suite), vec!["first", "shared/", "inner/"]);
    assert_eq!(
        root.dump(),
        format!(
            "{}\n    first\n    shared\n        from shared\n    inner\n        second",
            main.display()
        )
    );
}

#[test]
fn test_reload_reflects_changed_file() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("suite.toml");
    write(&file, r#"old = ["true"]"#);

    let mut registry = SourceRegistry::default();
    let mut root = build_root(&[file.clone()], &mut registry).unwrap();
    let old_version = only_suite(&root).version().unwrap();

    write(&file, "new = [\"true\"]\nnewer = [\"true\"]\n");
    root.reload(&mut registry).unwrap();

    let suite = only_suite(&root);
    assert_eq!(names(suite), vec!["new", "newer"]);
    assert!(!registry.is_current(&file, old_version));
    assert!(registry.is_current(&file, suite.version().unwrap()));
}

#[test]
fn test_missing_root_is_a_definition_error() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    let err = build_root(&[missing], &mut SourceRegistry::default()).unwrap_err();
    assert!(matches!(err, SuiteDefinitionError::MissingPath(_)));
}

#[test]
fn test_bad_value_names_file_and_key() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("bad.toml");
    write(&file, "count = 3\n");

    let err = build_root(&[file], &mut SourceRegistry::default()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("bad.toml"));
    assert!(message.contains("'count'"));
}

#[test]
fn test_self_include_is_a_definition_error() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("a.toml");
    write(&file, "t = [\"true\"]\nagain = \"a.toml\"\n");

    let err = build_root(&[file.clone()], &mut SourceRegistry::default()).unwrap_err();
    let canonical = fs::canonicalize(&file).unwrap();
    match err {
        SuiteDefinitionError::CyclicInclude { path, chain } => {
            assert_eq!(path, canonical);
            assert_eq!(chain, vec![canonical.clone(), canonical]);
        }
        other => panic!("expected a cyclic include, got {other}"),
    }
}

#[test]
fn test_include_cycle_names_every_file() {
    let dir = tempdir().unwrap();
    write(&dir.path().join("a.toml"), r#"next = "b.toml""#);
    write(&dir.path().join("b.toml"), r#"back = "a.toml""#);

    let err = build_root(&[dir.path().join("a.toml")], &mut SourceRegistry::default())
        .unwrap_err();
    assert!(matches!(err, SuiteDefinitionError::CyclicInclude { .. }));
    let message = err.to_string();
    assert!(message.contains("a.toml -> "));
    assert!(message.contains("b.toml -> "));
}

#[test]
fn test_shared_include_is_not_a_cycle() {
    let dir = tempdir().unwrap();
    let main = dir.path().join("main.toml");
    write(&main, "one = \"lib.toml\"\ntwo = \"lib.toml\"\n");
    write(&dir.path().join("lib.toml"), r#"t = ["true"]"#);

    let root = build_root(&[main], &mut SourceRegistry::default()).unwrap();
    assert_eq!(names(only_suite(&root)), vec!["one/", "two/"]);
}

#[cfg(unix)]
mod commands {
    use super::*;
    use pretty_assertions::assert_eq;
    use cairn_core::{Output, RunController, RunOptions, RunSummary};
    use serial_test::serial;

    fn controller() -> RunController {
        colored::control::set_override(false);
        RunController::new(RunOptions::default().with_timeout(5000), Output::memory())
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn test_command_suite_tally() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("math.toml");
        write(
            &file,
            r#"
passes = ["true"]
fails = ["sh", "-c", "echo went wrong >&2; exit 1"]
"#,
        );

        let mut controller = controller();
        let summary = controller.run(&[file]).await.unwrap();
        let out = controller.output().contents();

        assert_eq!(summary, RunSummary { total: 2, errors: 1 });
        assert!(out.contains("went wrong"));
        assert!(out.contains("math.toml"));
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn test_command_fixture_shared_by_tests() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("fixture.toml");
        write(
            &file,
            r#"
"sees setup" = ["sh", "-c", "test -f \"$CAIRN_CONTEXT_DIR/ready\""]

[nested]
"sees it too" = ["sh", "-c", "test -f \"$CAIRN_CONTEXT_DIR/ready\""]

[persistent_context]
setup = ["sh", "-c", "touch ready"]
"#,
        );

        let mut controller = controller();
        let summary = controller.run(&[file]).await.unwrap();
        assert_eq!(summary, RunSummary { total: 2, errors: 0 });
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn test_failing_setup_fails_the_subtree() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("fixture.toml");
        write(
            &file,
            r#"
a = ["true"]
b = ["true"]

[persistent_context]
setup = ["false"]
"#,
        );

        let mut controller = controller();
        let summary = controller.run(&[file]).await.unwrap();
        let out = controller.output().contents();

        assert_eq!(summary, RunSummary { total: 2, errors: 2 });
        assert_eq!(out.matches("Persistent context failed to evaluate").count(), 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn test_per_test_timeout_option() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("slow.toml");
        write(&file, "slow = { cmd = [\"sleep\", \"2\"], timeout = 100 }\n");

        let mut controller = controller();
        let summary = controller.run(&[file]).await.unwrap();
        assert_eq!(summary, RunSummary { total: 1, errors: 1 });
        assert!(controller
            .output()
            .contents()
            .contains("Test has timed out after 100ms"));
    }
}
