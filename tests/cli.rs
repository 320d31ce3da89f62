//! End-to-end runs of the keel binary against the sandbox provider

use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Fast engine and sandbox settings so a full apply takes milliseconds
const FAST: &str = r#"
[engine]
jobs = 8
base_delay_ms = 1
max_delay_ms = 5
poll_interval_ms = 1
poll_timeout_secs = 10

[sandbox]
pending_polls = 2
transient_failures = 1
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Workspace whose `keel.toml` is exactly `config`
    fn raw(config: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keel.toml"), config).unwrap();
        Self { dir }
    }

    fn new(stack: &str) -> Self {
        Self::raw(&format!("{stack}\n{FAST}"))
    }

    fn with_domain(domain: &str) -> Self {
        Self::new(&format!("[stack]\ndomain = \"{domain}\"\n"))
    }

    fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    fn state_file(&self, stack: &str) -> PathBuf {
        self.state_dir().join(format!("{stack}.json"))
    }

    fn keel(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("keel"));
        cmd.env_remove("KEEL_CONFIG")
            .env_remove("KEEL_STATE_DIR")
            .env("NO_COLOR", "1")
            .arg("--config")
            .arg(self.dir.path().join("keel.toml"))
            .arg("--state-dir")
            .arg(self.state_dir());
        cmd
    }
}

fn tracked(path: &Path) -> usize {
    let state: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    state["records"].as_object().unwrap().len()
}

// =============================================================================
// Plan
// =============================================================================

#[test]
fn test_plan_of_new_stack_creates_everything() {
    let ws = Workspace::with_domain("app.example.com");

    ws.keel()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Plan: 29 to create, 0 to update, 0 to replace, 0 to delete",
        ))
        .stdout(predicate::str::contains("my-service-dev"))
        .stdout(predicate::str::contains("example.com."));

    assert!(!ws.state_file("dev").exists());
}

#[test]
fn test_plan_rejects_domain_without_tld() {
    let ws = Workspace::with_domain("localhost");

    ws.keel()
        .arg("plan")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No TLD found on localhost"));
}

#[test]
fn test_plan_rejects_unknown_keys() {
    let ws = Workspace::new("[stack]\ndomain = \"app.example.com\"\nregoin = \"eu-west-1\"\n");

    ws.keel().arg("plan").assert().code(2);
}

#[test]
fn test_missing_config_is_reported() {
    let dir = TempDir::new().unwrap();

    assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("keel"))
        .env_remove("KEEL_STATE_DIR")
        .env("KEEL_CONFIG", dir.path().join("nope.toml"))
        .arg("--state-dir")
        .arg(dir.path())
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not read"));
}

// =============================================================================
// Apply / Destroy
// =============================================================================

#[test]
fn test_apply_plan_destroy_round_trip() {
    let ws = Workspace::with_domain("app.example.com");

    ws.keel()
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Apply complete! 29 changes made"))
        .stdout(predicate::str::contains("29 resources created"))
        .stdout(predicate::str::contains(".elb.us-east-1.amazonaws.com"));
    assert_eq!(tracked(&ws.state_file("dev")), 29);

    // Applying again is a no-op
    ws.keel()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));
    ws.keel()
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));

    let output = ws.keel().args(["outputs", "--json"]).output().unwrap();
    assert!(output.status.success());
    let outputs: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(outputs["vpcId"].as_str().unwrap().starts_with("vpc-"));
    assert_eq!(outputs["clusterId"], "my-service-dev");
    assert!(outputs["clusterVPCSecurityGroupId"].as_str().unwrap().starts_with("sg-"));

    ws.keel()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("29 resources in sync"));

    ws.keel()
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("29 resources deleted"));
    assert_eq!(tracked(&ws.state_file("dev")), 0);

    ws.keel()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No resources tracked"));
}

#[test]
fn test_changed_config_updates_in_place() {
    let ws = Workspace::with_domain("app.example.com");
    ws.keel().args(["apply", "--yes", "-q"]).assert().success();

    let config = fs::read_to_string(ws.dir.path().join("keel.toml")).unwrap();
    let config = config.replace("[stack]\n", "[stack]\ndesired_size = 3\n");
    fs::write(ws.dir.path().join("keel.toml"), config).unwrap();

    ws.keel()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Plan: 0 to create, 1 to update, 0 to replace, 0 to delete",
        ))
        .stdout(predicate::str::contains("changed: scaling_config"));

    ws.keel()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 of 29 resources differ"));
}

#[test]
fn test_failed_node_skips_dependents_and_exits_1() {
    let ws = Workspace::raw(
        r#"
[stack]
domain = "app.example.com"

[engine]
jobs = 8
base_delay_ms = 1
poll_interval_ms = 1

[sandbox]
fail = ["aws:eks/node-group::rpa-ng"]
"#,
    );

    ws.keel()
        .args(["apply", "--yes"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("1 resources failed"))
        .stdout(predicate::str::contains("1 resources skipped"))
        .stdout(predicate::str::contains("rejected by sandbox"));

    // Everything that did apply is tracked and can be torn down
    assert_eq!(tracked(&ws.state_file("dev")), 27);
    ws.keel().args(["destroy", "--yes"]).assert().success();
    assert_eq!(tracked(&ws.state_file("dev")), 0);
}

#[test]
fn test_stack_flag_selects_state_file() {
    let ws = Workspace::with_domain("app.example.com");

    ws.keel()
        .args(["apply", "--yes", "--stack", "prod", "--jobs", "2"])
        .assert()
        .success();

    assert!(ws.state_file("prod").exists());
    assert!(!ws.state_file("dev").exists());

    let output = ws.keel().args(["-s", "prod", "outputs", "--json"]).output().unwrap();
    let outputs: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outputs["clusterId"], "my-service-prod");
}

#[test]
fn test_stack_name_must_stay_in_state_dir() {
    let ws = Workspace::with_domain("app.example.com");

    ws.keel()
        .args(["-s", "../escaped", "apply", "--yes"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("stack.name"));

    assert!(!ws.dir.path().join("escaped.json").exists());
    assert!(!ws.state_dir().exists());
}

#[test]
fn test_completions() {
    let ws = Workspace::with_domain("app.example.com");

    ws.keel()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("keel"));
}
