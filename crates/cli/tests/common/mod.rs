//! Fakes shared by the sensor integration tests.

#![allow(dead_code)]

use ipc::command::{self, StartMonitor};
use ipc::event;
use monitor::{Completion, CompositeMonitor, FileAccessReport, Monitor, SyscallReport};
use sensor::{Artifactor, Error, Execution, MonitorFactory};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A monitor that runs for a while (or until cancelled) and then finishes
/// with a default report.
pub struct FakeMonitor<R> {
    runs_for: Option<Duration>,
    fail_start: bool,
    started: AtomicBool,
    cancel: CancellationToken,
    completion: Arc<Completion<R>>,
}

impl<R> FakeMonitor<R> {
    pub fn new(runs_for: Option<Duration>, fail_start: bool) -> Self {
        Self {
            runs_for,
            fail_start,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            completion: Arc::new(Completion::new()),
        }
    }
}

#[async_trait::async_trait]
impl<R: Default + Send + Sync + 'static> Monitor for FakeMonitor<R> {
    type Report = R;

    async fn start(&self) -> Result<(), monitor::Error> {
        if self.fail_start {
            return Err(self
                .completion
                .fail(monitor::Error::InvalidCommand("refused".into())));
        }
        self.started.store(true, Ordering::SeqCst);
        let completion = Arc::clone(&self.completion);
        let cancel = self.cancel.clone();
        let runs_for = self.runs_for;
        tokio::spawn(async move {
            match runs_for {
                Some(duration) => tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(duration) => {}
                },
                None => cancel.cancelled().await,
            }
            completion.finish(Ok(R::default()));
        });
        Ok(())
    }

    fn cancel(&self) {
        self.cancel.cancel();
        if !self.started.load(Ordering::SeqCst) {
            self.completion.finish(Err(monitor::Error::Cancelled));
        }
    }

    fn done(&self) -> CancellationToken {
        self.completion.done()
    }

    fn done_at(&self) -> Option<Instant> {
        self.completion.done_at()
    }

    fn status(&self) -> Result<Arc<R>, monitor::Error> {
        self.completion.status()
    }
}

/// Builds fake monitors. The tracer stands in for the target: it runs for
/// `target_runs_for`, or until the run is stopped.
#[derive(Debug, Clone, Default)]
pub struct FakeMonitors {
    pub target_runs_for: Option<Duration>,
    pub fail_start: bool,
    /// Non-critical errors queued on the error stream of every run.
    pub errors: Vec<String>,
}

impl MonitorFactory for FakeMonitors {
    type Tracer = FakeMonitor<SyscallReport>;
    type Watcher = FakeMonitor<FileAccessReport>;

    fn create(
        &self,
        command: StartMonitor,
        _baseline: Option<Arc<HashSet<String>>>,
    ) -> Result<CompositeMonitor<Self::Tracer, Self::Watcher>, Error> {
        let (errors_tx, errors) = mpsc::channel(8);
        for err in &self.errors {
            let _ = errors_tx.try_send(monitor::Error::non_critical(err));
        }
        let config = config::Monitor {
            min_passive: Duration::ZERO,
            error_drain: Duration::from_millis(50),
            ..Default::default()
        };
        Ok(CompositeMonitor::with_monitors(
            command,
            FakeMonitor::new(self.target_runs_for, self.fail_start),
            FakeMonitor::new(None, false),
            None,
            errors,
            &config,
        ))
    }
}

/// Commands come from a test-held sender, events go to a test-held
/// receiver.
pub struct ScriptedExecution {
    commands: mpsc::Receiver<command::Message>,
    events: mpsc::UnboundedSender<event::Message>,
}

pub struct Controller {
    pub commands: mpsc::Sender<command::Message>,
    pub events: mpsc::UnboundedReceiver<event::Message>,
}

impl Controller {
    pub async fn send(&self, command: command::Message) {
        self.commands.send(command).await.unwrap();
    }

    pub async fn next_event(&mut self) -> event::Message {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("no event within 5s")
            .expect("event stream closed")
    }
}

pub fn scripted() -> (ScriptedExecution, Controller) {
    let (commands_tx, commands) = mpsc::channel(8);
    let (events_tx, events) = mpsc::unbounded_channel();
    (
        ScriptedExecution {
            commands,
            events: events_tx,
        },
        Controller {
            commands: commands_tx,
            events,
        },
    )
}

#[async_trait::async_trait]
impl Execution for ScriptedExecution {
    async fn next_command(&mut self) -> Option<command::Message> {
        self.commands.recv().await
    }

    async fn publish(&mut self, event: &event::Message) -> Result<(), Error> {
        let _ = self.events.send(event.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.commands.close();
    }
}

pub fn artifactor(root: &Path) -> Artifactor {
    let sensor = config::Sensor {
        mount_point: root.to_path_buf(),
        artifacts_dir: root.join("artifacts"),
        ..Default::default()
    };
    Artifactor::new(&sensor, vec!["sensor".into()])
}

pub fn start(app_name: &str) -> command::Message {
    command::Message::StartMonitor(StartMonitor {
        app_name: app_name.into(),
        ..Default::default()
    })
}
