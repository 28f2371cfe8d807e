use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn agency_cmd(home: &Path, workspace: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("agency"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1")
        .current_dir(workspace);
    cmd
}

fn init(home: &TempDir, workspace: &TempDir) {
    agency_cmd(home.path(), workspace.path())
        .args(["init", "--name", "demo"])
        .assert()
        .success()
        .stdout(contains("agency 'demo'"));
}

#[test]
fn init_writes_a_valid_config_and_refuses_to_overwrite() {
    let home = TempDir::new().expect("home");
    let workspace = assert_fs::TempDir::new().expect("workspace");
    let ws = TempDir::new().expect("ws");
    init(&home, &ws);

    assert!(ws.path().join("agency.yaml").exists());
    agency_cmd(home.path(), ws.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(contains("is valid: 6 roles, 6 edges, 1 parallel group(s)"));

    agency_cmd(home.path(), ws.path())
        .args(["init", "--name", "demo"])
        .assert()
        .failure()
        .stderr(contains("--force"));

    // --config points elsewhere
    let nested = workspace.child("conf/team.yaml");
    agency_cmd(home.path(), workspace.path())
        .args(["--config", "conf/team.yaml", "init", "--name", "team"])
        .assert()
        .success();
    nested.assert(predicates::path::exists());
}

#[test]
fn validate_reports_cycles() {
    let home = TempDir::new().expect("home");
    let ws = assert_fs::TempDir::new().expect("ws");
    ws.child("agency.yaml")
        .write_str(
            "name: loop\nroles:\n  - { name: a, owned_paths: [a/] }\n  - { name: b, owned_paths: [b/] }\nedges:\n  - { from: a, to: b }\n  - { from: b, to: a }\n",
        )
        .expect("write config");

    agency_cmd(home.path(), ws.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(contains("dependency cycle"));
}

#[test]
fn plan_json_lists_waves() {
    let home = TempDir::new().expect("home");
    let ws = TempDir::new().expect("ws");
    init(&home, &ws);

    let output = agency_cmd(home.path(), ws.path())
        .args(["plan", "--json"])
        .output()
        .expect("run plan");
    assert!(output.status.success());
    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).expect("plan json");
    assert_eq!(
        plan["waves"],
        serde_json::json!([["research"], ["design"], ["build", "docs", "tools"], ["test"]])
    );
    assert_eq!(
        plan["parallel_groups"],
        serde_json::json!([["build", "tools", "docs"]])
    );
}

#[test]
fn owner_and_check_follow_ownership() {
    let home = TempDir::new().expect("home");
    let ws = TempDir::new().expect("ws");
    init(&home, &ws);

    agency_cmd(home.path(), ws.path())
        .args(["owner", "src/main.rs"])
        .assert()
        .success()
        .stdout(contains("owned by 'build'"));
    agency_cmd(home.path(), ws.path())
        .args(["owner", "README.md"])
        .assert()
        .success()
        .stdout(contains("unowned"));

    agency_cmd(home.path(), ws.path())
        .args(["check", "build", "src/main.rs"])
        .assert()
        .success();
    agency_cmd(home.path(), ws.path())
        .args(["check", "docs", "src/main.rs"])
        .assert()
        .failure()
        .stderr(contains("owned by 'build'"));
    agency_cmd(home.path(), ws.path())
        .args(["check", "docs", "../outside.md"])
        .assert()
        .failure()
        .stderr(contains("outside the workspace"));
}

#[test]
fn brief_previews_an_undispatched_role() {
    let home = TempDir::new().expect("home");
    let ws = TempDir::new().expect("ws");
    init(&home, &ws);

    agency_cmd(home.path(), ws.path())
        .args(["brief", "design"])
        .assert()
        .success()
        .stdout(contains("# Delegation brief: design"))
        .stdout(contains("Turns research into an architecture"));

    agency_cmd(home.path(), ws.path())
        .args(["brief", "ghost"])
        .assert()
        .failure()
        .stderr(contains("unknown role 'ghost'"));
}

#[test]
fn daemon_status_without_daemon_reports_not_running() {
    let home = TempDir::new().expect("home");
    let ws = TempDir::new().expect("ws");
    init(&home, &ws);

    agency_cmd(home.path(), ws.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));
    agency_cmd(home.path(), ws.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("not running"));
}
