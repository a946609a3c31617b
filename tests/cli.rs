//! CLI exit-code contract.

use assert_cmd::Command;
use git2::{Repository, Signature};
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn init_repo(root: &Path) -> String {
    fs::create_dir_all(root).unwrap();
    let repo = Repository::init(root).unwrap();
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "test").unwrap();
    config.set_str("user.email", "test@test.com").unwrap();
    drop(config);

    fs::write(root.join("README.md"), "initial\n").unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("test", "test@test.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
        .unwrap();
    repo.head().unwrap().shorthand().unwrap().to_string()
}

/// Write a cadence.toml pinning the integration branch to whatever the test
/// repo's default branch actually is.
fn write_config(root: &Path, integration: &str) {
    fs::write(
        root.join("cadence.toml"),
        format!("integration_branch = \"{integration}\"\n"),
    )
    .unwrap();
}

#[test]
fn missing_description_exits_one() {
    Command::cargo_bin("cadence")
        .unwrap()
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("missing task description"));
}

#[test]
fn help_lists_positional_description() {
    Command::cargo_bin("cadence")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("description"));
}

#[cfg(unix)]
#[test]
fn rejected_checkpoint_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let integration = init_repo(dir.path());
    write_config(dir.path(), &integration);

    Command::cargo_bin("cadence")
        .unwrap()
        .arg("add login endpoint")
        .arg("--project-dir")
        .arg(dir.path())
        .arg("--scripted")
        .arg("reject")
        .arg("--agent-cmd")
        .arg("cat")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Aborted"));
}

#[cfg(unix)]
#[test]
fn completed_run_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let integration = init_repo(dir.path());
    write_config(dir.path(), &integration);

    Command::cargo_bin("cadence")
        .unwrap()
        .arg("add login endpoint")
        .arg("--project-dir")
        .arg(dir.path())
        .arg("--scripted")
        .arg("approve,approve,approve,approve,approve")
        .arg("--agent-cmd")
        .arg("cat")
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed"));

    // The run left its records behind.
    assert!(dir.path().join(".cadence/artifacts").exists());
    assert!(dir.path().join(".cadence/audit/runs").exists());
}
