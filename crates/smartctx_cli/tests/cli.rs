use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

/// `smartctx` with an isolated store root and working directory.
fn smartctx(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("smartctx").unwrap();
    cmd.env("SMARTCTX_ROOT", root);
    cmd.env("SMARTCTX_LOG", "info");
    cmd.current_dir(root);
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn create_show_and_list() {
    let dir = TempDir::new().unwrap();
    smartctx(dir.path())
        .args(["create", "demo", "kiro-sdd"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created context kiro-sdd-demo-"));

    smartctx(dir.path())
        .args(["init", "other", "tdd"])
        .assert()
        .success();

    let metadata = json_stdout(smartctx(dir.path()).args(["show", "demo", "metadata"]));
    assert_eq!(metadata["project_id"], "demo");
    assert_eq!(metadata["schema_version"], "1.0");

    smartctx(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Active contexts (2)"))
        .stdout(predicate::str::contains("demo workflow=kiro-sdd"));

    assert!(dir.path().join("logs").is_dir());
}

#[test]
fn duplicate_create_and_missing_project_exit_with_one() {
    let dir = TempDir::new().unwrap();
    smartctx(dir.path())
        .args(["create", "demo", "w"])
        .assert()
        .success();

    smartctx(dir.path())
        .args(["create", "demo", "w"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));

    smartctx(dir.path())
        .args(["show", "ghost"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no active context"));
}

#[test]
fn updates_accept_json_objects_only() {
    let dir = TempDir::new().unwrap();
    smartctx(dir.path())
        .args(["create", "demo", "tdd"])
        .assert()
        .success();

    smartctx(dir.path())
        .args(["update-task", "demo", "1.1", r#"{"completed": true}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated task 1.1"));

    smartctx(dir.path())
        .args(["update-workflow", "demo", "tdd", r#"{"status": "in_progress"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("status=in_progress"));

    smartctx(dir.path())
        .args(["update-agent", "demo", "tdd-agent", "[1, 2]"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("expected a JSON object"));

    let tasks = json_stdout(smartctx(dir.path()).args(["show", "demo", "tasks"]));
    assert_eq!(tasks["task_details"][0]["task_id"], "1.1");
}

#[test]
fn context_view_respects_scope() {
    let dir = TempDir::new().unwrap();
    smartctx(dir.path())
        .args(["create", "demo", "tdd"])
        .assert()
        .success();

    let view = json_stdout(smartctx(dir.path()).args(["context", "demo", "tdd-agent"]));
    assert!(view.get("metadata").is_none());

    let full = json_stdout(smartctx(dir.path()).args([
        "context", "demo", "tdd-agent", "--scope", "full",
    ]));
    assert!(full.get("metadata").is_some());

    smartctx(dir.path())
        .args(["context", "demo", "tdd-agent", "--scope", "everything"])
        .assert()
        .failure();
}

#[test]
fn checkpoint_restore_export_import_archive() {
    let dir = TempDir::new().unwrap();
    smartctx(dir.path())
        .args(["create", "demo", "tdd"])
        .assert()
        .success();
    smartctx(dir.path())
        .args(["checkpoint", "demo", "cp1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo-cp1.json"));
    smartctx(dir.path())
        .args(["restore", "demo", "cp1"])
        .assert()
        .success();
    smartctx(dir.path())
        .args(["restore", "demo", "missing"])
        .assert()
        .code(1);

    smartctx(dir.path())
        .args(["export", "demo"])
        .assert()
        .success();
    assert!(dir.path().join("demo-context-export.json").is_file());

    smartctx(dir.path())
        .args(["archive", "demo"])
        .assert()
        .success();
    smartctx(dir.path())
        .args(["validate", "demo"])
        .assert()
        .code(1);

    smartctx(dir.path())
        .args(["import", "demo-context-export.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported context for demo"));
    smartctx(dir.path())
        .args(["validate", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));
}

#[test]
fn stats_cleanup_and_bounded_monitor() {
    let dir = TempDir::new().unwrap();
    smartctx(dir.path())
        .args(["create", "demo", "tdd"])
        .assert()
        .success();

    let stats = json_stdout(smartctx(dir.path()).arg("stats"));
    assert_eq!(stats["active_contexts"], 1);
    assert_eq!(stats["total_checkpoints"], 0);

    smartctx(dir.path())
        .arg("cleanup")
        .assert()
        .success()
        .stdout(predicate::str::contains("older than 90 days"));

    smartctx(dir.path())
        .args(["monitor", "--interval-secs", "1", "--iterations", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo workflow=tdd").count(2));

    smartctx(dir.path())
        .args(["monitor", "--interval-secs", "0", "--iterations", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--interval-secs"));
}
