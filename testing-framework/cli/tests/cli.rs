use std::{
    fs,
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use tempfile::TempDir;

fn runner() -> Command {
    Command::new(env!("CARGO_BIN_EXE_testnet-runner"))
}

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn write_topology(dir: &Path, steps: &str) -> PathBuf {
    let path = dir.join("network.yaml");
    fs::write(
        &path,
        format!(
            r#"
settings:
  startup_grace_ms: 200
  readiness: false
  run_timeout_secs: 60
nodes:
  validators:
    count: 2
    names: [alice, bob]
    command: sleep
    args: ["60"]
  collators:
    - para_id: 2000
      command: sleep
      args: ["60"]
steps:
{steps}
"#
        ),
    )
    .unwrap();
    path
}

fn code(output: &Output) -> i32 {
    output.status.code().unwrap()
}

#[test]
fn check_prints_resolved_plan() {
    let dir = TempDir::new().unwrap();
    let topology = write_topology(
        dir.path(),
        r#"  - run: 'alice: run ./setup.sh with "2000"'
  - run: 'collator-2000-0: reports block height is at least 1 within 30 seconds'"#,
    );

    let output = runner().arg("check").arg(&topology).output().unwrap();

    assert_eq!(code(&output), 0, "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 validators, 1 collators"));
    assert!(stdout.contains("node collator-2000-0 (collator, para 2000)"));
    assert!(stdout.contains("step step-2"));
    assert!(stdout.contains("after [step-1]"));
}

#[test]
fn invalid_topology_exits_with_config_error() {
    let dir = TempDir::new().unwrap();
    let topology = write_topology(dir.path(), "  - run: 'mallory: is up'");

    let output = runner().arg("run").arg(&topology).output().unwrap();

    assert_eq!(code(&output), 2);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown node 'mallory'"), "{stderr}");
}

#[test]
fn passing_run_exits_zero_and_writes_report() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "register.sh", r#"[ "$1,$2" = "2000,2001" ] || exit 4"#);
    write_script(
        dir.path(),
        "assign.sh",
        r#"[ "$HARNESS_NODE_NAME" = "alice" ] || exit 5"#,
    );
    let topology = write_topology(
        dir.path(),
        r#"  - run: 'alice: run ./register.sh with "2000,2001" return is 0 within 10 seconds'
  - parallel:
      - run: 'alice: run ./assign.sh within 10 seconds'
      - run: 'bob: run ./assign.sh return is 5 within 10 seconds'"#,
    );
    let report = dir.path().join("report.json");

    let output = runner()
        .arg("run")
        .arg(&topology)
        .arg("--report")
        .arg(&report)
        .output()
        .unwrap();

    assert_eq!(code(&output), 0, "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("run passed: 3/3 steps passed"));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["steps"].as_array().unwrap().len(), 3);
    assert_eq!(json["steps"][2]["return_code"], 5);
}

#[test]
fn failing_step_exits_one() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "fail.sh", "exit 3");
    let topology = write_topology(
        dir.path(),
        r#"  - run: 'alice: run ./fail.sh within 10 seconds'
  - run: 'bob: is up within 1 seconds'"#,
    );

    let output = runner().arg("run").arg(&topology).output().unwrap();

    assert_eq!(code(&output), 1);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("script returned 3"));
    assert!(stdout.contains("skipped"));
}

#[test]
fn missing_node_binary_exits_with_launch_error() {
    let dir = TempDir::new().unwrap();
    let topology = dir.path().join("broken.yaml");
    fs::write(
        &topology,
        r#"
nodes:
  validators:
    count: 1
    command: ./bin/not-built-yet
"#,
    )
    .unwrap();

    let output = runner().arg("run").arg(&topology).output().unwrap();

    assert_eq!(code(&output), 2);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not-built-yet"), "{stderr}");
}
