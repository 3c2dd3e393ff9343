#![forbid(unsafe_code)]

mod common;

use common::{FakeMonitors, artifactor};
use nix::sys::signal::Signal;
use sensor::{ContainerReport, Error, FileExecution, standalone};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

fn event_names(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["name"].as_str().unwrap().to_owned()
        })
        .collect()
}

#[tokio::test]
async fn command_file_run_ends_with_the_target() {
    let dir = tempfile::tempdir().unwrap();
    let commands = dir.path().join("commands.json");
    let events = dir.path().join("events.json");
    std::fs::write(
        &commands,
        r#"{"app_entrypoint":["/bin/sh"],"app_cmd":["-c","sleep 1"]}"#,
    )
    .unwrap();

    let mut exe = FileExecution::open(&commands, &events).unwrap();
    let factory = FakeMonitors {
        target_runs_for: Some(Duration::from_millis(50)),
        errors: vec!["resume of tracee 7 failed".into()],
        ..Default::default()
    };
    let (signals_tx, signals) = mpsc::channel(4);
    signals_tx.send(Signal::SIGUSR1).await.unwrap();

    let cmd_override = vec!["-c".to_owned(), "exit 0".to_owned()];
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        standalone::run(&mut exe, &factory, &artifactor(dir.path()), &cmd_override, signals),
    )
    .await
    .expect("run did not end with the target");
    result.unwrap();

    assert_eq!(
        event_names(&events),
        [
            "event.monitor.start.done",
            "event.error",
            "event.monitor.stop.done",
            "event.sensor.shutdown.done",
        ]
    );
    let bytes = std::fs::read(dir.path().join("artifacts").join("creport.json")).unwrap();
    let report: ContainerReport = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(report.start_command.app_name, "/bin/sh");
    assert_eq!(report.start_command.app_args, ["-c", "exit 0"]);
    assert_eq!(report.start_command.app_cmd, ["-c", "exit 0"]);
}

#[tokio::test]
async fn failures_are_logged_before_the_shutdown_event() {
    let dir = tempfile::tempdir().unwrap();
    let commands = dir.path().join("commands.json");
    let events = dir.path().join("events.json");
    std::fs::write(&commands, r#"{"app_name":"/usr/bin/env"}"#).unwrap();

    let mut exe = FileExecution::open(&commands, &events).unwrap();
    let (_signals_tx, signals) = mpsc::channel(4);
    let cmd_override = vec!["true".to_owned()];
    let result = standalone::run(
        &mut exe,
        &FakeMonitors::default(),
        &artifactor(dir.path()),
        &cmd_override,
        signals,
    )
    .await;

    assert!(matches!(result, Err(Error::AmbiguousCommand)));
    assert_eq!(
        event_names(&events),
        ["event.error", "event.sensor.shutdown.done"]
    );
    assert!(!dir.path().join("artifacts").exists());
}

#[tokio::test]
async fn start_failure_skips_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let commands = dir.path().join("commands.json");
    let events = dir.path().join("events.json");
    std::fs::write(&commands, r#"{"app_name":"/bin/true"}"#).unwrap();

    let mut exe = FileExecution::open(&commands, &events).unwrap();
    let factory = FakeMonitors {
        fail_start: true,
        ..Default::default()
    };
    let (_signals_tx, signals) = mpsc::channel(4);
    let result = standalone::run(&mut exe, &factory, &artifactor(dir.path()), &[], signals).await;

    assert!(matches!(result, Err(Error::Monitor(_))));
    assert_eq!(
        event_names(&events),
        ["event.error", "event.sensor.shutdown.done"]
    );
    assert!(!dir.path().join("artifacts").join("creport.json").exists());
}
