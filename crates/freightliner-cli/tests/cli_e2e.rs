//! End-to-end tests driving the compiled `freightliner` binary exactly as a
//! user would from a shell: `assert_cmd::Command` spawns the real binary,
//! the test only inspects exit codes and stdout/stderr text.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;

fn freightliner() -> Command {
    Command::cargo_bin("freightliner").expect("binary built")
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, content).expect("write");
}

#[test]
fn version_prints_name_and_cargo_version() {
    freightliner()
        .arg("version")
        .assert()
        .success()
        .stdout(contains(format!("Freightliner {}", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn replicate_tree_against_empty_registries_discovers_nothing_and_succeeds() {
    let checkpoint_dir = tempdir().expect("tempdir");
    freightliner()
        .args([
            "replicate-tree",
            "memory://src-registry/team/",
            "memory://dst-registry/team/",
            "--no-progress",
            "--checkpoint-dir",
            checkpoint_dir.path().to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("repositories: 0/0 completed"))
        .stdout(contains("0 copied, 0 skipped, 0 failed"));
}

#[test]
fn replicate_tree_dry_run_accepted_and_exits_zero() {
    let checkpoint_dir = tempdir().expect("tempdir");
    freightliner()
        .args([
            "replicate-tree",
            "memory://src-registry",
            "memory://dst-registry",
            "--dry-run",
            "--no-progress",
            "--checkpoint-dir",
            checkpoint_dir.path().to_str().unwrap(),
        ])
        .assert()
        .success();
}

#[test]
fn replicate_tree_rejects_unsupported_registry_scheme() {
    freightliner()
        .args(["replicate-tree", "ecr://123456789012.dkr.ecr.us-east-1.amazonaws.com", "memory://dst-registry"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("unsupported registry scheme"));
}

#[test]
fn replicate_tree_rejects_malformed_registry_argument() {
    freightliner()
        .args(["replicate-tree", "not-a-url", "memory://dst-registry"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("registry argument must be"));
}

#[test]
fn replicate_tree_with_checkpoint_writes_state_and_event_log() {
    let checkpoint_dir = tempdir().expect("tempdir");
    freightliner()
        .args([
            "replicate-tree",
            "memory://src-registry/team/",
            "memory://dst-registry/team/",
            "--checkpoint",
            "--no-progress",
            "--checkpoint-dir",
            checkpoint_dir.path().to_str().unwrap(),
        ])
        .assert()
        .success();

    let entries: Vec<_> = fs::read_dir(checkpoint_dir.path())
        .expect("read checkpoint dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert!(entries.iter().any(|n| n.contains("events")), "expected an event log file, found {entries:?}");
}

#[test]
fn replicate_tree_rejects_unknown_retry_policy_name() {
    freightliner()
        .args([
            "replicate-tree",
            "memory://src-registry",
            "memory://dst-registry",
            "--retry-policy",
            "turbo",
        ])
        .assert()
        .failure();
}

#[test]
fn config_file_invalid_timeout_fails_before_any_discovery() {
    let config_dir = tempdir().expect("tempdir");
    write_file(
        &config_dir.path().join(".freightliner.toml"),
        r#"
[replication]
timeout = "not-a-duration"
"#,
    );

    freightliner()
        .args([
            "replicate-tree",
            "memory://src-registry",
            "memory://dst-registry",
            "--no-progress",
            "--config-dir",
            config_dir.path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("invalid duration in config"));
}

#[test]
fn config_file_values_merge_without_error_and_cli_flags_still_win() {
    let config_dir = tempdir().expect("tempdir");
    write_file(
        &config_dir.path().join(".freightliner.toml"),
        r#"
[replication]
workers = 2
timeout = "5m"

[retry]
policy = "aggressive"
"#,
    );
    let checkpoint_dir = tempdir().expect("tempdir");

    freightliner()
        .args([
            "replicate-tree",
            "memory://src-registry",
            "memory://dst-registry",
            "--no-progress",
            "--config-dir",
            config_dir.path().to_str().unwrap(),
            "--checkpoint-dir",
            checkpoint_dir.path().to_str().unwrap(),
            "--workers",
            "9",
        ])
        .assert()
        .success();
}

#[test]
fn completions_for_bash_prints_a_nonempty_script() {
    freightliner()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(contains("freightliner"));
}

#[test]
fn replicate_tree_with_no_arguments_is_a_usage_error() {
    freightliner().arg("replicate-tree").assert().failure().code(2);
}
