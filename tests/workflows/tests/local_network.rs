use std::{
    fs,
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
};

use serial_test::serial;
use tempfile::TempDir;
use testing_framework_core::scenario::{
    Deployer as _, RunReport, ScenarioBuilder, StepFailure, StepState,
};
use testing_framework_runner_local::{LaunchError, LocalDeployer, LocalDeployerError};

const NODE_BIN: &str = env!("CARGO_BIN_EXE_fake-parachain-node");

/// Registers parachains by leaving a marker per para id.
const REGISTER: &str = r#"#!/bin/sh
for para in "$@"; do
  touch "registered-$para"
done
"#;

/// Succeeds only once every listed para id was registered.
const ASSIGN: &str = r#"#!/bin/sh
[ "$HARNESS_NODE_NAME" = "alice" ] || exit 10
for para in "$@"; do
  [ -e "registered-$para" ] || exit 11
done
echo "assigned $HARNESS_SCRIPT_ARGS via $HARNESS_NODE_RPC_URL"
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let workspace = Self { dir };
        workspace.script("register.sh", REGISTER);
        workspace.script("assign.sh", ASSIGN);
        workspace
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn script(&self, name: &str, body: &str) {
        let path = self.path().join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn topology(&self, collator_extra_args: &str, steps: &str) -> PathBuf {
        let path = self.path().join("network.yaml");
        let yaml = format!(
            r#"
settings:
  run_timeout_secs: 120
  poll_interval_ms: 100
  startup_grace_ms: 300
  readiness_timeout_secs: 20
nodes:
  validators:
    count: 4
    command: {NODE_BIN}
    names: [alice, bob, charlie, dave]
    args: ["--name={{{{name}}}}", "--prometheus-port={{{{prometheus_port}}}}", "--block-time-ms=100"]
  collators:
    - para_id: 2000
      command: {NODE_BIN}
      args: ["--name={{{{name}}}}", "--prometheus-port={{{{prometheus_port}}}}"{collator_extra_args}]
    - para_id: 2001
      command: {NODE_BIN}
      args: ["--name={{{{name}}}}", "--prometheus-port={{{{prometheus_port}}}}"]
    - para_id: 2002
      command: {NODE_BIN}
      args: ["--name={{{{name}}}}", "--prometheus-port={{{{prometheus_port}}}}"]
    - para_id: 2003
      command: {NODE_BIN}
      args: ["--name={{{{name}}}}", "--prometheus-port={{{{prometheus_port}}}}"]
steps:
{steps}
"#
        );
        fs::write(&path, yaml).unwrap();
        path
    }
}

const FULL_STEPS: &str = r#"  - id: register-a
    run: 'alice: run ./register.sh with "2000,2001" return is 0 within 30 seconds'
  - id: register-b
    run: 'bob: run ./register.sh with "2002,2003" return is 0 within 30 seconds'
  - id: assign
    after: [register-a, register-b]
    run: 'alice: run ./assign.sh with "2000,2001,2002,2003" return is 0 within 30 seconds'
  - parallel:
      - run: 'collator-2000-0: reports block height is at least 6 within 200 seconds'
      - run: 'collator-2001-0: reports block height is at least 6 within 50 seconds'
      - run: 'collator-2002-0: reports block height is at least 6 within 50 seconds'
      - run: 'collator-2003-0: reports block height is at least 6 within 50 seconds'"#;

async fn run_file(path: &Path) -> Result<RunReport, LocalDeployerError> {
    let scenario = ScenarioBuilder::from_file(path).unwrap().build().unwrap();
    let runner = LocalDeployer::new().deploy(&scenario).await?;
    Ok(runner.run(&scenario).await)
}

#[tokio::test]
#[serial]
async fn four_validators_four_collators_pass() {
    let workspace = Workspace::new();
    let topology = workspace.topology("", FULL_STEPS);

    let report = run_file(&topology).await.unwrap();

    assert!(report.passed(), "{report}");
    assert_eq!(report.steps().len(), 7);

    let assign = report.step("assign").unwrap();
    assert!(
        assign
            .stdout
            .as_deref()
            .unwrap_or_default()
            .starts_with("assigned 2000,2001,2002,2003 via http://127.0.0.1:")
    );
    let register_a = report.step("register-a").unwrap();
    let register_b = report.step("register-b").unwrap();
    assert!(register_a.finished_at <= register_b.started_at);
    for register in [register_a, register_b] {
        assert!(register.finished_at <= assign.started_at);
    }

    let assertions = &report.steps()[3..];
    let earliest_end = assertions
        .iter()
        .filter_map(|step| step.finished_at)
        .min()
        .unwrap();
    assert!(
        assertions
            .iter()
            .all(|step| step.started_at.unwrap() < earliest_end),
        "assertions overlap in time"
    );
}

#[tokio::test]
#[serial]
async fn stalled_collator_times_out_alone() {
    let workspace = Workspace::new();
    let steps = FULL_STEPS.replace("200 seconds'", "3 seconds'");
    let topology = workspace.topology(r#", "--block-time-ms=0""#, &steps);

    let report = run_file(&topology).await.unwrap();

    assert!(!report.passed());
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1, "{report}");
    assert_eq!(failures[0].actor, "collator-2000-0");
    assert_eq!(failures[0].state, StepState::TimedOut);
    assert!(matches!(
        failures[0].failure,
        Some(StepFailure::AssertionFailure { .. })
    ));
}

#[tokio::test]
#[serial]
async fn unregistered_para_fails_assign_and_skips_assertions() {
    let workspace = Workspace::new();
    let steps = FULL_STEPS.replace(r#"with "2002,2003""#, r#"with "2002""#);
    let topology = workspace.topology("", &steps);

    let report = run_file(&topology).await.unwrap();

    let assign = report.step("assign").unwrap();
    assert_eq!(assign.state, StepState::Failed);
    assert_eq!(assign.return_code, Some(11));
    assert!(
        report.steps()[3..]
            .iter()
            .all(|step| step.state == StepState::Skipped)
    );
}

#[tokio::test]
#[serial]
async fn crashing_collator_aborts_launch() {
    let workspace = Workspace::new();
    let topology = workspace.topology(r#", "--crash-after-ms=50""#, FULL_STEPS);

    let err = run_file(&topology).await.err().unwrap();

    match err {
        LocalDeployerError::Launch {
            source: LaunchError::ExitedEarly { node, stderr, .. },
        } => {
            assert_eq!(node, "collator-2000-0");
            assert!(stderr.contains("crashing as requested"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
