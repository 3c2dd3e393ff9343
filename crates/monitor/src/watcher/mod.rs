//! File-access watcher: fanotify events on one mount, folded into a
//! per-process file report.

mod process;
mod reader;

use crate::error::Error;
use crate::lifecycle::{Completion, Monitor};
use crate::report::{FileAccessReport, FileInfo};
use reader::{AccessEvent, Ignore};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What to watch.
#[derive(Debug, Clone, Default)]
pub struct Watch {
    pub mount_point: PathBuf,
    /// The sensor's own output; never reported.
    pub artifacts_dir: PathBuf,
    /// Files that existed before the run. When set, events on any other
    /// path are dropped.
    pub baseline: Option<Arc<HashSet<String>>>,
}

pub struct Watcher {
    watch: Watch,
    config: config::Watcher,
    cancel: CancellationToken,
    completion: Arc<Completion<FileAccessReport>>,
    started: AtomicBool,
    errors: mpsc::Sender<Error>,
}

impl Watcher {
    pub fn new(watch: Watch, config: &config::Watcher, errors: mpsc::Sender<Error>) -> Self {
        Self {
            watch,
            config: config.clone(),
            cancel: CancellationToken::new(),
            completion: Arc::new(Completion::new()),
            started: AtomicBool::new(false),
            errors,
        }
    }

    fn ignore(&self) -> Ignore {
        let mut prefixes = self.config.skip_prefixes.clone();
        if !self.watch.artifacts_dir.as_os_str().is_empty() {
            prefixes.push(self.watch.artifacts_dir.clone());
        }
        Ignore {
            own_pid: std::process::id() as i32,
            prefixes,
        }
    }
}

#[async_trait::async_trait]
impl Monitor for Watcher {
    type Report = FileAccessReport;

    async fn start(&self) -> Result<(), Error> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        if self.cancel.is_cancelled() {
            return Err(self.completion.fail(Error::Cancelled));
        }

        let fan = match reader::open(&self.watch.mount_point) {
            Ok(fan) => fan,
            Err(err) => return Err(self.completion.fail(err)),
        };
        let (events_tx, events) = mpsc::channel(self.config.event_queue.max(1));
        if let Err(err) = reader::spawn(
            fan,
            self.ignore(),
            events_tx,
            self.errors.clone(),
            self.cancel.clone(),
        ) {
            return Err(self.completion.fail(err));
        }
        info!(mount_point = %self.watch.mount_point.display(), "file-access watcher started");

        tokio::spawn(consume(
            events,
            self.watch.baseline.clone(),
            Arc::clone(&self.completion),
        ));
        Ok(())
    }

    fn cancel(&self) {
        self.cancel.cancel();
        if !self.started.load(Ordering::SeqCst) {
            self.completion.finish(Err(Error::Cancelled));
        }
    }

    fn done(&self) -> CancellationToken {
        self.completion.done()
    }

    fn done_at(&self) -> Option<Instant> {
        self.completion.done_at()
    }

    fn status(&self) -> Result<Arc<FileAccessReport>, Error> {
        self.completion.status()
    }
}

/// Drain the reader until it stops; it stops on cancellation or failure.
async fn consume(
    mut events: mpsc::Receiver<Result<AccessEvent, Error>>,
    baseline: Option<Arc<HashSet<String>>>,
    completion: Arc<Completion<FileAccessReport>>,
) {
    let mut report = new_report();
    let mut outcome = Ok(());
    while let Some(item) = events.recv().await {
        match item {
            Ok(event) => apply(&mut report, baseline.as_deref(), event),
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
    }
    debug!(events = report.event_count, processes = report.processes.len(), "file-access report ready");
    completion.finish(outcome.map(|()| report));
}

fn new_report() -> FileAccessReport {
    FileAccessReport {
        monitor_pid: std::process::id() as i32,
        monitor_parent_pid: nix::unistd::getppid().as_raw(),
        ..Default::default()
    }
}

fn apply(report: &mut FileAccessReport, baseline: Option<&HashSet<String>>, event: AccessEvent) {
    report.event_count += 1;
    if baseline.is_some_and(|known| !known.contains(&event.path)) {
        return;
    }

    let key = event.pid.to_string();
    if event.id == 1 || !report.processes.contains_key(&key) {
        if let Some(info) = process::process_info(event.pid) {
            if event.id == 1 {
                report.main_process = Some(info.clone());
            }
            report.processes.insert(key.clone(), info);
        }
    }
    let exe_path = report.processes.get(&key).map(|info| info.path.clone());

    let info = report
        .process_files
        .entry(key)
        .or_default()
        .entry(event.path.clone())
        .or_insert_with(|| FileInfo {
            first_event_id: event.id,
            name: event.path.clone(),
            ..Default::default()
        });
    info.event_count += 1;
    if event.is_read {
        info.read_count += 1;
    }
    if event.is_write {
        info.write_count += 1;
    }
    if exe_path.as_deref() == Some(event.path.as_str()) {
        info.exe_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(id: u32, pid: i32, path: &str, is_read: bool) -> AccessEvent {
        AccessEvent {
            id,
            pid,
            path: path.to_owned(),
            is_read,
            is_write: false,
        }
    }

    #[test]
    fn first_event_names_the_main_process() {
        let own = std::process::id() as i32;
        let exe = std::env::current_exe().unwrap().to_string_lossy().into_owned();
        let mut report = new_report();
        apply(&mut report, None, access(1, own, &exe, false));
        apply(&mut report, None, access(2, own, "/etc/hosts", true));
        apply(&mut report, None, access(3, own, "/etc/hosts", true));

        assert_eq!(report.event_count, 3);
        assert_eq!(report.main_process.as_ref().map(|p| p.pid), Some(own));
        let files = &report.process_files[&own.to_string()];
        assert_eq!(files[&exe].exe_count, 1);
        let hosts = &files["/etc/hosts"];
        assert_eq!((hosts.event_count, hosts.read_count, hosts.first_event_id), (2, 2, 2));
        assert_eq!(hosts.name, "/etc/hosts");
    }

    #[test]
    fn paths_outside_the_baseline_are_counted_but_dropped() {
        let baseline = HashSet::from(["/etc/hosts".to_owned()]);
        let mut report = new_report();
        apply(&mut report, Some(&baseline), access(1, i32::MAX, "/tmp/new-file", false));
        apply(&mut report, Some(&baseline), access(2, i32::MAX, "/etc/hosts", true));

        assert_eq!(report.event_count, 2);
        // The process is gone, so no identity, but its files still count.
        assert!(report.processes.is_empty());
        let files: Vec<&str> = report.files().map(|(path, _)| path).collect();
        assert_eq!(files, ["/etc/hosts"]);
    }

    #[tokio::test]
    async fn reader_failure_is_the_terminal_status() {
        let completion = Arc::new(Completion::new());
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(access(1, i32::MAX, "/etc/hosts", true))).await.unwrap();
        tx.send(Err(Error::ResolvePath(std::io::ErrorKind::NotFound.into())))
            .await
            .unwrap();
        consume(rx, None, Arc::clone(&completion)).await;
        let Err(Error::Failed(err)) = completion.status() else {
            panic!("expected failure");
        };
        assert!(matches!(*err, Error::ResolvePath(_)));
    }

    #[tokio::test]
    async fn cancel_before_start_is_terminal() {
        let (errors, _rx) = mpsc::channel(4);
        let watcher = Watcher::new(Watch::default(), &config::Watcher::default(), errors);
        watcher.cancel();
        assert!(watcher.done().is_cancelled());
        assert!(watcher.start().await.is_err());
        assert!(watcher.status().is_err());
    }

    #[tokio::test]
    async fn closed_reader_finishes_with_the_report() {
        let completion = Arc::new(Completion::new());
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(access(1, i32::MAX, "/bin/cat", false))).await.unwrap();
        drop(tx);
        consume(rx, None, Arc::clone(&completion)).await;
        assert_eq!(completion.status().unwrap().event_count, 1);
    }
}
