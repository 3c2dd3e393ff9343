#![forbid(unsafe_code)]

//! Full runs against the kernel. They need CAP_SYS_ADMIN for fanotify and
//! ptrace permission, and skip themselves otherwise.

use ipc::command::StartMonitor;
use monitor::{CompositeMonitor, Error, Launch, Watch};
use std::time::Duration;

fn skip_reason(err: &Error) -> Option<String> {
    let text = err.to_string();
    let privileged = matches!(err, Error::InsufficientPermissions(_))
        || text.contains("Insufficient permissions")
        || text.contains("Fanotify failed")
        || text.contains("Trace control failed")
        || text.contains("not permitted");
    privileged.then_some(text)
}

async fn run(launch: Launch, watch: Watch) -> Option<monitor::MonitorReports> {
    let config = config::Config::default();
    let command = StartMonitor {
        app_name: launch.app_name.clone(),
        app_args: launch.app_args.clone(),
        ..Default::default()
    };
    let monitor = CompositeMonitor::new(command, launch, watch, &config);
    if let Err(err) = monitor.start().await {
        if let Some(reason) = skip_reason(&err) {
            eprintln!("skipping: {reason}");
            return None;
        }
        panic!("start failed: {err}");
    }
    tokio::time::timeout(Duration::from_secs(30), monitor.done().cancelled())
        .await
        .expect("run did not finish");
    Some(monitor.status().expect("run failed"))
}

#[tokio::test]
async fn cat_of_a_file_shows_up_in_both_reports() {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("skipping: needs root");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let release = dir.path().join("release");
    std::fs::write(&release, "NAME=test\n").unwrap();
    let release = release.canonicalize().unwrap();
    let release_str = release.to_string_lossy().into_owned();

    let launch = Launch {
        app_name: "/bin/sh".into(),
        app_args: vec!["-c".into(), format!("cat {release_str}")],
        traced: true,
        ..Default::default()
    };
    let watch = Watch {
        mount_point: dir.path().to_path_buf(),
        ..Default::default()
    };
    let Some(reports) = run(launch, watch).await else {
        return;
    };

    let syscalls = &reports.syscalls;
    assert!(syscalls.enabled);
    assert!(syscalls.syscall_count > 0);
    assert!(syscalls.counts_are_consistent());
    assert!(syscalls.fs_activity.contains_key(&release_str), "{:?}", syscalls.fs_activity.keys());
    // The shell execs `cat` after a PATH lookup; only the successful exec
    // is recorded.
    let cat = syscalls
        .fs_activity
        .iter()
        .find(|(path, _)| path.ends_with("/cat"))
        .map(|(_, info)| info);
    let Some(cat) = cat else {
        panic!("exec of cat was not recorded: {:?}", syscalls.fs_activity.keys());
    };
    assert!(cat.ops_all > cat.ops_checkfile);

    let (_, info) = reports
        .file_access
        .files()
        .find(|(path, _)| *path == release_str)
        .expect("release file was not reported");
    assert!(info.read_count > 0);
}

#[tokio::test]
async fn untraced_runs_report_tracing_disabled() {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("skipping: needs root");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let launch = Launch {
        app_name: "/bin/true".into(),
        traced: false,
        ..Default::default()
    };
    let watch = Watch {
        mount_point: dir.path().to_path_buf(),
        ..Default::default()
    };
    let Some(reports) = run(launch, watch).await else {
        return;
    };
    assert!(!reports.syscalls.enabled);
    assert_eq!(reports.syscalls.syscall_count, 0);
}

#[tokio::test]
async fn report_goes_out_when_the_target_exits_before_its_children() {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("skipping: needs root");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let launch = Launch {
        app_name: "/bin/sh".into(),
        app_args: vec!["-c".into(), "sleep 3 & exit 0".into()],
        traced: true,
        report_on_target_exit: true,
        ..Default::default()
    };
    let watch = Watch {
        mount_point: dir.path().to_path_buf(),
        ..Default::default()
    };
    let started = std::time::Instant::now();
    let Some(reports) = run(launch, watch).await else {
        return;
    };
    assert!(started.elapsed() < Duration::from_secs(3), "waited for the child");
    assert!(reports.syscalls.syscall_count > 0);
}
