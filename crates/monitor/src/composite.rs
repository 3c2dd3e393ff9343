//! One run: a tracer and a watcher with a fixed shutdown order.
//!
//! The tracer decides when the target is finished. The watcher has no
//! notion of that and is only ever stopped by the coordinator after the
//! tracer is done:
//!
//! ```text
//! Created -> Started -> AwaitingTracer -> AwaitingWatcherCancel
//!         -> AwaitingWatcherDone -> Done
//! ```

use crate::error::Error;
use crate::lifecycle::Monitor;
use crate::report::{FileAccessReport, MonitorReports, SyscallReport};
use crate::tracer::{Launch, Tracer};
use crate::watcher::{Watch, Watcher};
use ipc::command::StartMonitor;
use nix::sys::signal::Signal;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Created,
    Started,
    AwaitingTracer,
    AwaitingWatcherCancel,
    AwaitingWatcherDone,
    Done,
}

pub struct CompositeMonitor<T = Tracer, W = Watcher> {
    command: StartMonitor,
    tracer: Arc<T>,
    watcher: Arc<W>,
    signals: Option<mpsc::Sender<Signal>>,
    errors: mpsc::Receiver<Error>,
    error_drain: Duration,
    min_passive: Duration,
    cancel: CancellationToken,
    done: CancellationToken,
    phase: watch::Sender<Phase>,
    coordinator: Once,
}

impl CompositeMonitor<Tracer, Watcher> {
    /// Build both monitors for one run of `command`.
    pub fn new(command: StartMonitor, launch: Launch, watch: Watch, config: &config::Config) -> Self {
        let (errors_tx, errors) = mpsc::channel(config.monitor.error_queue.max(1));
        let tracer = Tracer::new(launch, &config.tracer, errors_tx.clone());
        let watcher = Watcher::new(watch, &config.watcher, errors_tx);
        let signals = Some(tracer.signal_sender());
        Self::with_monitors(command, tracer, watcher, signals, errors, &config.monitor)
    }
}

impl<T, W> CompositeMonitor<T, W>
where
    T: Monitor<Report = SyscallReport>,
    W: Monitor<Report = FileAccessReport>,
{
    /// `errors` is the receiving end of the stream both monitors report
    /// non-fatal conditions on.
    pub fn with_monitors(
        command: StartMonitor,
        tracer: T,
        watcher: W,
        signals: Option<mpsc::Sender<Signal>>,
        errors: mpsc::Receiver<Error>,
        config: &config::Monitor,
    ) -> Self {
        Self {
            command,
            tracer: Arc::new(tracer),
            watcher: Arc::new(watcher),
            signals,
            errors,
            error_drain: config.error_drain,
            min_passive: config.min_passive,
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            phase: watch::Sender::new(Phase::Created),
            coordinator: Once::new(),
        }
    }

    /// Start the watcher, then the tracer. A monitor that fails to start
    /// stops the other one.
    pub async fn start(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if *self.phase.borrow() != Phase::Created {
            return Err(Error::AlreadyStarted);
        }
        self.coordinate();

        if let Err(err) = self.watcher.start().await {
            warn!(%err, "file-access watcher failed to start");
            self.tracer.cancel();
            return Err(err);
        }
        if let Err(err) = self.tracer.start().await {
            warn!(%err, "syscall tracer failed to start");
            self.watcher.cancel();
            return Err(err);
        }
        info!(app = %self.command.app_name, "monitors started");
        Ok(())
    }

    pub fn start_command(&self) -> &StartMonitor {
        &self.command
    }

    /// Stop the run. Never blocks; observe `done` for completion.
    ///
    /// Only the tracer is cancelled here. The watcher keeps recording while
    /// the target shuts down and is stopped by the coordinator once the
    /// tracer is done.
    pub fn cancel(&self) {
        debug!("cancelling monitors");
        self.cancel.cancel();
        self.coordinate();
        self.tracer.cancel();
    }

    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn tracer_done_at(&self) -> Option<Instant> {
        self.tracer.done_at()
    }

    pub fn watcher_done_at(&self) -> Option<Instant> {
        self.watcher.done_at()
    }

    /// Merged report, once `done` fired.
    pub fn status(&self) -> Result<MonitorReports, Error> {
        if !self.done.is_cancelled() {
            return Err(Error::NotDone);
        }
        match (self.watcher.status(), self.tracer.status()) {
            (Ok(file_access), Ok(syscalls)) => Ok(MonitorReports {
                file_access: (*file_access).clone(),
                syscalls: (*syscalls).clone(),
            }),
            (watcher, tracer) => Err(Error::MonitorsFailed {
                watcher: describe(&watcher),
                tracer: describe(&tracer),
            }),
        }
    }

    /// Forward `signal` to the target.
    pub async fn signal_target_app(&self, signal: Signal) -> Result<(), Error> {
        let Some(signals) = &self.signals else {
            debug!(%signal, "no target to signal");
            return Ok(());
        };
        signals.send(signal).await.map_err(|_| Error::WorkerGone)
    }

    /// Next non-fatal condition from either monitor.
    pub async fn next_error(&mut self) -> Option<Error> {
        self.errors.recv().await
    }

    /// Non-fatal conditions still arriving within the drain window.
    pub async fn drain_errors(&mut self) -> Vec<Error> {
        let deadline = tokio::time::Instant::now() + self.error_drain;
        let mut drained = Vec::new();
        while let Ok(Some(err)) = tokio::time::timeout_at(deadline, self.errors.recv()).await {
            drained.push(err);
        }
        drained
    }

    /// Spawn the coordinator on first use.
    fn coordinate(&self) {
        self.coordinator.call_once(|| {
            self.phase.send_replace(Phase::Started);
            tokio::spawn(coordinate(
                Arc::clone(&self.tracer),
                Arc::clone(&self.watcher),
                self.phase.clone(),
                self.cancel.clone(),
                self.done.clone(),
                self.min_passive,
            ));
        });
    }
}

async fn coordinate<T, W>(
    tracer: Arc<T>,
    watcher: Arc<W>,
    phase: watch::Sender<Phase>,
    cancel: CancellationToken,
    done: CancellationToken,
    min_passive: Duration,
) where
    T: Monitor<Report = SyscallReport>,
    W: Monitor<Report = FileAccessReport>,
{
    let started_at = Instant::now();
    phase.send_replace(Phase::AwaitingTracer);
    tracer.done().cancelled().await;
    debug!("tracer done");

    // Short-lived targets still get a minimal file-access window, unless
    // the run was stopped on purpose.
    let remaining = min_passive.saturating_sub(started_at.elapsed());
    if tracer.status().is_ok() && !remaining.is_zero() {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(remaining) => {}
        }
    }

    phase.send_replace(Phase::AwaitingWatcherCancel);
    watcher.cancel();
    phase.send_replace(Phase::AwaitingWatcherDone);
    watcher.done().cancelled().await;
    debug!("watcher done");

    phase.send_replace(Phase::Done);
    done.cancel();
}

fn describe<R>(status: &Result<Arc<R>, Error>) -> String {
    match status {
        Ok(_) => "none".to_owned(),
        Err(err) => err.to_string(),
    }
}
