//! Syscall tracer: launches the target under ptrace and counts every syscall
//! made by the target and its descendants.

mod calls;
mod launcher;
mod relay;
mod worker;

pub use launcher::Launch;

use crate::arch;
use crate::error::Error;
use crate::lifecycle::{Completion, Monitor};
use crate::report::SyscallReport;
use calls::CallKind;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use worker::{Control, SyscallEvent, Update, Worker};

pub struct Tracer {
    launch: Launch,
    config: config::Tracer,
    cancel: CancellationToken,
    completion: Arc<Completion<SyscallReport>>,
    started: AtomicBool,
    signals: mpsc::Sender<Signal>,
    pending_signals: Mutex<Option<mpsc::Receiver<Signal>>>,
    errors: mpsc::Sender<Error>,
    target: OnceLock<Pid>,
}

impl Tracer {
    pub fn new(launch: Launch, config: &config::Tracer, errors: mpsc::Sender<Error>) -> Self {
        let (signals, pending_signals) = mpsc::channel(config.signal_queue.max(1));
        Self {
            launch,
            config: config.clone(),
            cancel: CancellationToken::new(),
            completion: Arc::new(Completion::new()),
            started: AtomicBool::new(false),
            signals,
            pending_signals: Mutex::new(Some(pending_signals)),
            errors,
            target: OnceLock::new(),
        }
    }

    /// Queue a signal for the target. Signals sent before `start` are
    /// delivered once the target runs.
    pub fn signal_sender(&self) -> mpsc::Sender<Signal> {
        self.signals.clone()
    }

    pub fn target(&self) -> Option<Pid> {
        self.target.get().copied()
    }

    pub fn launch(&self) -> &Launch {
        &self.launch
    }
}

#[async_trait::async_trait]
impl Monitor for Tracer {
    type Report = SyscallReport;

    async fn start(&self) -> Result<(), Error> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        if self.cancel.is_cancelled() {
            return Err(self.completion.fail(Error::Cancelled));
        }
        let signals = {
            let mut guard = match self.pending_signals.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take().ok_or(Error::AlreadyStarted)?
        };

        let (updates_tx, updates) = mpsc::channel(self.config.event_queue.max(1));
        let (started_tx, started) = oneshot::channel();
        let worker = match Worker::spawn(self.errors.clone()) {
            Ok(worker) => worker,
            Err(err) => return Err(self.completion.fail(err)),
        };
        let control = Control::Launch {
            launch: self.launch.clone(),
            started: started_tx,
            updates: updates_tx,
        };
        if let Err(err) = worker.send(control) {
            return Err(self.completion.fail(err));
        }

        let target = match started.await {
            Ok(Ok(pid)) => pid,
            Ok(Err(err)) => return Err(self.completion.fail(err)),
            Err(_) => return Err(self.completion.fail(Error::WorkerGone)),
        };
        let _ = self.target.set(target);

        let done = self.completion.done();
        tokio::spawn(relay::relay_signals(
            signals,
            target,
            self.config.stop_signal,
            self.config.stop_grace,
            done,
            self.errors.clone(),
        ));
        tokio::spawn(collect(
            worker,
            updates,
            Stop {
                target,
                signal: self.config.stop_signal,
                grace: self.config.stop_grace,
            },
            self.cancel.clone(),
            SyscallReport::new(self.launch.traced, arch::ARCH_NAME),
            Arc::clone(&self.completion),
        ));
        Ok(())
    }

    fn cancel(&self) {
        self.cancel.cancel();
        // A tracer that never ran has nothing left to finish.
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

    fn status(&self) -> Result<Arc<SyscallReport>, Error> {
        self.completion.status()
    }
}

#[derive(Debug, Clone, Copy)]
struct Stop {
    target: Pid,
    signal: Signal,
    grace: Duration,
}

enum Phase {
    Running,
    Stopping(tokio::time::Instant),
    Killed,
}

/// Fold worker updates into the report until the last tracee is gone.
async fn collect(
    _worker: Worker,
    mut updates: mpsc::Receiver<Update>,
    stop: Stop,
    cancel: CancellationToken,
    mut report: SyscallReport,
    completion: Arc<Completion<SyscallReport>>,
) {
    let mut phase = Phase::Running;
    let outcome = loop {
        let deadline = match phase {
            Phase::Stopping(deadline) => Some(deadline),
            Phase::Running | Phase::Killed => None,
        };
        tokio::select! {
            _ = cancel.cancelled(), if matches!(phase, Phase::Running) => {
                info!(pid = stop.target.as_raw(), signal = %stop.signal, "stopping target");
                match kill(stop.target, stop.signal) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(err) => warn!(%err, "failed to signal target"),
                }
                phase = Phase::Stopping(tokio::time::Instant::now() + stop.grace);
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)), if deadline.is_some() => {
                info!(pid = stop.target.as_raw(), "target ignored the stop signal, killing");
                relay::kill_group(stop.target);
                phase = Phase::Killed;
            }
            update = updates.recv() => match update {
                Some(Update::Syscall(event)) => record(&mut report, event),
                Some(Update::Finished(result)) => break result,
                None => break Err(Error::WorkerGone),
            },
        }
    };

    report.prune_parent_dirs();
    debug!(
        syscalls = report.syscall_count,
        distinct = report.syscall_num,
        paths = report.fs_activity.len(),
        "syscall report ready"
    );
    completion.finish(outcome.map(|()| report));
}

fn record(report: &mut SyscallReport, event: SyscallEvent) {
    report.record_syscall(event.number);
    let Some((kind, path)) = event.path else {
        return;
    };
    if kind.succeeded(event.ret) && !calls::is_ignored(&path) {
        report.record_fs_activity(&path, event.number, event.pid, kind == CallKind::CheckFile);
    }
}
