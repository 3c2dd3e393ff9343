#![forbid(unsafe_code)]

mod common;

use common::{FakeMonitors, artifactor, scripted, start};
use config::Transport;
use ipc::command::{self, ResponseStatus, StartMonitor};
use ipc::{Client, event};
use sensor::{ContainerReport, Error, IpcExecution, controlled};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type Run = tokio::task::JoinHandle<Result<(), Error>>;

fn spawn_run(
    factory: FakeMonitors,
    root: &std::path::Path,
) -> (common::Controller, Run, CancellationToken) {
    let (mut exe, controller) = scripted();
    let artifactor = artifactor(root);
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let run = tokio::spawn(async move {
        controlled::run(&mut exe, &factory, &artifactor, token).await
    });
    (controller, run, shutdown)
}

async fn finished(run: Run) -> Result<(), Error> {
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("sensor did not exit")
        .unwrap()
}

fn saved_report(root: &std::path::Path) -> ContainerReport {
    let bytes = std::fs::read(root.join("artifacts").join("creport.json")).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn full_lifecycle_publishes_every_event() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, run, _shutdown) = spawn_run(FakeMonitors::default(), dir.path());

    controller.send(start("/bin/true")).await;
    assert_eq!(controller.next_event().await, event::Message::StartMonitorDone);
    controller.send(command::Message::StopMonitor).await;
    assert_eq!(controller.next_event().await, event::Message::StopMonitorDone);

    let report = saved_report(dir.path());
    assert_eq!(report.start_command.app_name, "/bin/true");
    assert_eq!(report.sensor.args, ["sensor"]);

    controller.send(command::Message::ShutdownSensor).await;
    assert_eq!(controller.next_event().await, event::Message::ShutdownSensorDone);
    finished(run).await.unwrap();
}

#[tokio::test]
async fn a_second_run_can_follow_the_first() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, run, _shutdown) = spawn_run(FakeMonitors::default(), dir.path());

    for app in ["/bin/true", "/bin/false"] {
        controller.send(start(app)).await;
        assert_eq!(controller.next_event().await, event::Message::StartMonitorDone);
        controller.send(command::Message::StopMonitor).await;
        assert_eq!(controller.next_event().await, event::Message::StopMonitorDone);
        assert_eq!(saved_report(dir.path()).start_command.app_name, app);
    }
    controller.send(command::Message::ShutdownSensor).await;
    assert_eq!(controller.next_event().await, event::Message::ShutdownSensorDone);
    finished(run).await.unwrap();
}

#[tokio::test]
async fn stop_while_idle_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, run, _shutdown) = spawn_run(FakeMonitors::default(), dir.path());

    controller.send(command::Message::StopMonitor).await;
    controller.send(command::Message::ShutdownSensor).await;
    assert_eq!(controller.next_event().await, event::Message::ShutdownSensorDone);
    finished(run).await.unwrap();
    assert!(!dir.path().join("artifacts").exists());
}

#[tokio::test]
async fn start_failure_is_published_and_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeMonitors {
        fail_start: true,
        ..Default::default()
    };
    let (mut controller, run, _shutdown) = spawn_run(factory, dir.path());

    controller.send(start("/bin/true")).await;
    let event::Message::Error(data) = controller.next_event().await else {
        panic!("expected an error event");
    };
    assert!(data.as_str().unwrap().contains("refused"), "{data}");
    assert!(matches!(finished(run).await, Err(Error::Monitor(_))));
}

#[tokio::test]
async fn ambiguous_start_command_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, run, _shutdown) = spawn_run(FakeMonitors::default(), dir.path());

    controller
        .send(command::Message::StartMonitor(StartMonitor {
            app_name: "/bin/sh".into(),
            app_entrypoint: vec!["/entrypoint.sh".into()],
            ..Default::default()
        }))
        .await;
    let event::Message::Error(data) = controller.next_event().await else {
        panic!("expected an error event");
    };
    assert!(data.as_str().unwrap().starts_with("ambiguous start command"));
    assert!(matches!(finished(run).await, Err(Error::AmbiguousCommand)));
}

#[tokio::test]
async fn shutdown_during_a_run_abandons_the_results() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, run, _shutdown) = spawn_run(FakeMonitors::default(), dir.path());

    controller.send(start("/bin/true")).await;
    assert_eq!(controller.next_event().await, event::Message::StartMonitorDone);
    controller.send(command::Message::ShutdownSensor).await;
    assert_eq!(controller.next_event().await, event::Message::ShutdownSensorDone);

    let err = finished(run).await.unwrap_err();
    assert!(matches!(err, Error::PrematureShutdown));
    assert_eq!(err.to_string(), "sensor shutdown before monitor stop");
    assert!(!dir.path().join("artifacts").join("creport.json").exists());
}

#[tokio::test]
async fn finished_target_waits_for_the_stop_command() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeMonitors {
        target_runs_for: Some(Duration::from_millis(10)),
        ..Default::default()
    };
    let (mut controller, run, _shutdown) = spawn_run(factory, dir.path());

    controller.send(start("/bin/true")).await;
    assert_eq!(controller.next_event().await, event::Message::StartMonitorDone);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(controller.events.try_recv().is_err());
    assert!(!dir.path().join("artifacts").join("creport.json").exists());

    controller.send(command::Message::StopMonitor).await;
    assert_eq!(controller.next_event().await, event::Message::StopMonitorDone);
    controller.send(command::Message::ShutdownSensor).await;
    assert_eq!(controller.next_event().await, event::Message::ShutdownSensorDone);
    finished(run).await.unwrap();
}

#[tokio::test]
async fn non_critical_errors_become_error_events() {
    let dir = tempfile::tempdir().unwrap();
    let factory = FakeMonitors {
        errors: vec!["fanotify queue overflow".into()],
        ..Default::default()
    };
    let (mut controller, run, shutdown) = spawn_run(factory, dir.path());

    controller.send(start("/bin/true")).await;
    assert_eq!(controller.next_event().await, event::Message::StartMonitorDone);
    assert_eq!(
        controller.next_event().await,
        event::Message::error("non-critical monitor error: fanotify queue overflow")
    );
    controller.send(command::Message::StopMonitor).await;
    assert_eq!(controller.next_event().await, event::Message::StopMonitorDone);
    shutdown.cancel();
    finished(run).await.unwrap();
}

#[tokio::test]
async fn shutdown_signal_while_idle_exits_quietly() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, run, shutdown) = spawn_run(FakeMonitors::default(), dir.path());
    shutdown.cancel();
    finished(run).await.unwrap();
    assert!(controller.events.try_recv().is_err());
}

#[tokio::test]
async fn shutdown_signal_during_a_run_still_saves_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, run, shutdown) = spawn_run(FakeMonitors::default(), dir.path());

    controller.send(start("/bin/true")).await;
    assert_eq!(controller.next_event().await, event::Message::StartMonitorDone);
    shutdown.cancel();
    assert_eq!(controller.next_event().await, event::Message::StopMonitorDone);
    finished(run).await.unwrap();
    assert_eq!(saved_report(dir.path()).start_command.app_name, "/bin/true");
}

fn loopback_opts() -> Transport {
    Transport {
        host: Ipv4Addr::LOCALHOST.into(),
        cmd_port: 0,
        evt_port: 0,
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(5),
        write_timeout: Duration::from_secs(2),
        connect_wait: Duration::ZERO,
        retries: 1,
    }
}

#[tokio::test]
async fn controller_drives_a_run_over_the_channels() {
    let dir = tempfile::tempdir().unwrap();
    let opts = loopback_opts();
    let shutdown = CancellationToken::new();
    let mut exe = IpcExecution::start(&opts, shutdown.clone()).await.unwrap();
    let (client, ()) = tokio::join!(
        Client::connect_to(exe.cmd_addr(), exe.evt_addr(), &opts),
        exe.wait_for_controller()
    );
    let mut client = client.unwrap();

    let artifactor = artifactor(dir.path());
    let factory = FakeMonitors::default();
    let run = tokio::spawn(async move {
        controlled::run(&mut exe, &factory, &artifactor, shutdown).await
    });

    let response = client.send_command(&start("/bin/true")).await.unwrap();
    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(client.get_event().await.unwrap(), event::Message::StartMonitorDone);

    client.send_command(&command::Message::StopMonitor).await.unwrap();
    assert_eq!(client.get_event().await.unwrap(), event::Message::StopMonitorDone);

    client.send_command(&command::Message::ShutdownSensor).await.unwrap();
    assert_eq!(client.get_event().await.unwrap(), event::Message::ShutdownSensorDone);
    finished(run).await.unwrap();
    assert!(dir.path().join("artifacts").join("creport.json").exists());
}
