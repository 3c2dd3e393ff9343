//! The thread that owns every ptrace call.
//!
//! The kernel ties a tracee to the thread that attached it, so launching,
//! waiting, reading registers, and resuming all happen here. Other tasks only
//! talk to the worker through its inbox and reach the target with signals.

use super::calls::{CallKind, PathCalls};
use super::launcher::{self, Launch};
use crate::arch::{self, RegisterView};
use crate::error::Error;
use nix::errno::Errno;
use nix::sys::ptrace::{self, Event, Options};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// One completed syscall, as seen at its exit stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyscallEvent {
    pub pid: i32,
    pub number: u32,
    pub ret: i64,
    pub path: Option<(CallKind, String)>,
}

#[derive(Debug)]
pub(crate) enum Update {
    Syscall(SyscallEvent),
    /// The last tracee is gone, or tracing failed.
    Finished(Result<(), Error>),
}

pub(crate) enum Control {
    Launch {
        launch: Launch,
        started: oneshot::Sender<Result<Pid, Error>>,
        updates: mpsc::Sender<Update>,
    },
}

/// Handle to the trace thread. Dropping it lets the thread exit once it is
/// idle.
#[derive(Debug)]
pub(crate) struct Worker {
    inbox: std_mpsc::Sender<Control>,
}

impl Worker {
    pub fn spawn(errors: mpsc::Sender<Error>) -> Result<Self, Error> {
        let (inbox, requests) = std_mpsc::channel();
        std::thread::Builder::new()
            .name("ptrace-worker".into())
            .spawn(move || {
                for request in requests {
                    match request {
                        Control::Launch {
                            launch,
                            started,
                            updates,
                        } => run(&launch, started, &updates, &errors),
                    }
                }
                trace!("ptrace worker exited");
            })
            .map_err(|err| Error::Spawn("ptrace-worker", err))?;
        Ok(Self { inbox })
    }

    pub fn send(&self, control: Control) -> Result<(), Error> {
        self.inbox.send(control).map_err(|_| Error::WorkerGone)
    }
}

fn run(
    launch: &Launch,
    started: oneshot::Sender<Result<Pid, Error>>,
    updates: &mpsc::Sender<Update>,
    errors: &mpsc::Sender<Error>,
) {
    let target = match launcher::spawn(launch).and_then(|pid| {
        if launch.traced {
            attach(pid)?;
        }
        Ok(pid)
    }) {
        Ok(pid) => pid,
        Err(err) => {
            let _ = started.send(Err(err));
            return;
        }
    };
    if started.send(Ok(target)).is_err() {
        // Nobody will consume the report.
        let _ = kill(target, Signal::SIGKILL);
        return;
    }

    let outcome = if launch.traced {
        Tracing::new(target, launch.report_on_target_exit, updates, errors).run()
    } else {
        supervise(target)
    };
    if let Err(err) = &outcome {
        warn!(%err, "syscall tracing failed");
    }
    let _ = updates.blocking_send(Update::Finished(outcome));
}

/// Consume the post-exec SIGTRAP stop and set trace options.
fn attach(pid: Pid) -> Result<(), Error> {
    match waitpid(pid, Some(WaitPidFlag::__WALL)) {
        Ok(WaitStatus::Stopped(_, Signal::SIGTRAP)) => {}
        Ok(WaitStatus::Exited(_, code)) => {
            return Err(Error::TargetExited(format!("exited with status {code}")));
        }
        Ok(WaitStatus::Signaled(_, signal, _)) => {
            return Err(Error::TargetExited(format!("killed by {signal}")));
        }
        Ok(other) => {
            let _ = kill(pid, Signal::SIGKILL);
            return Err(Error::TargetExited(format!("unexpected first stop {other:?}")));
        }
        Err(err) => return Err(Error::Wait(err)),
    }

    let options = Options::PTRACE_O_TRACESYSGOOD
        | Options::PTRACE_O_TRACECLONE
        | Options::PTRACE_O_TRACEFORK
        | Options::PTRACE_O_TRACEVFORK
        | Options::PTRACE_O_TRACEEXEC
        | Options::PTRACE_O_TRACEEXIT
        | Options::PTRACE_O_EXITKILL;
    ptrace::setoptions(pid, options).map_err(|err| {
        let _ = kill(pid, Signal::SIGKILL);
        Error::from_kernel(err, Error::Ptrace)
    })
}

/// Wait for an untraced target without looking inside it.
fn supervise(target: Pid) -> Result<(), Error> {
    loop {
        match waitpid(target, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                info!(pid = target.as_raw(), code, "target exited");
                return Ok(());
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                info!(pid = target.as_raw(), %signal, "target killed");
                return Ok(());
            }
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return Ok(()),
            Err(err) => return Err(Error::Wait(err)),
        }
    }
}

#[derive(Debug, Default)]
struct Tracee {
    /// Syscall number and path captured at the entry stop.
    pending: Option<(u64, Option<(CallKind, String)>)>,
    /// New tracees start with a SIGSTOP that must not be delivered.
    fresh: bool,
}

impl Tracee {
    fn fresh() -> Self {
        Self {
            pending: None,
            fresh: true,
        }
    }
}

struct Tracing<'a> {
    target: Pid,
    report_on_target_exit: bool,
    /// The report went out early; later syscalls have no consumer.
    reported: bool,
    tracees: HashMap<Pid, Tracee>,
    calls: PathCalls,
    updates: &'a mpsc::Sender<Update>,
    errors: &'a mpsc::Sender<Error>,
}

impl<'a> Tracing<'a> {
    fn new(
        target: Pid,
        report_on_target_exit: bool,
        updates: &'a mpsc::Sender<Update>,
        errors: &'a mpsc::Sender<Error>,
    ) -> Self {
        Self {
            target,
            report_on_target_exit,
            reported: false,
            tracees: HashMap::from([(target, Tracee::default())]),
            calls: PathCalls::for_current_arch(),
            updates,
            errors,
        }
    }

    fn run(mut self) -> Result<(), Error> {
        let mut resume = Some((self.target, None));
        loop {
            if let Some((pid, signal)) = resume.take() {
                self.resume(pid, signal);
            }

            let status = match waitpid(None, Some(WaitPidFlag::__WALL)) {
                Ok(status) => status,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    debug!("no tracees left");
                    return Ok(());
                }
                Err(err) => return Err(Error::Wait(err)),
            };

            match status {
                WaitStatus::PtraceSyscall(pid) => {
                    if !self.on_syscall_stop(pid)? {
                        continue;
                    }
                    resume = Some((pid, None));
                }
                WaitStatus::PtraceEvent(pid, _, event) => {
                    if is_spawn_event(event) {
                        match ptrace::getevent(pid) {
                            Ok(child) => {
                                let child = Pid::from_raw(child as i32);
                                trace!(parent = pid.as_raw(), child = child.as_raw(), "new tracee");
                                self.tracees.entry(child).or_insert_with(Tracee::fresh);
                            }
                            Err(err) => debug!(pid = pid.as_raw(), %err, "failed to read new tracee id"),
                        }
                    }
                    resume = Some((pid, None));
                }
                WaitStatus::Stopped(pid, signal) => {
                    // A child can report its first stop before its parent's
                    // clone event.
                    let tracee = self.tracees.entry(pid).or_insert_with(Tracee::fresh);
                    let inject = if tracee.fresh && signal == Signal::SIGSTOP {
                        None
                    } else {
                        Some(signal)
                    };
                    tracee.fresh = false;
                    resume = Some((pid, inject));
                }
                WaitStatus::Exited(pid, code) => {
                    if pid == self.target {
                        info!(pid = pid.as_raw(), code, "target exited");
                    }
                    if self.forget(pid) {
                        return Ok(());
                    }
                }
                WaitStatus::Signaled(pid, signal, _) => {
                    if pid == self.target {
                        info!(pid = pid.as_raw(), %signal, "target killed");
                    }
                    if self.forget(pid) {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }

    /// Returns false when the tracee vanished and must not be resumed.
    fn on_syscall_stop(&mut self, pid: Pid) -> Result<bool, Error> {
        let regs = match arch::read_registers(pid) {
            Ok(regs) => regs,
            Err(Errno::ESRCH) => {
                debug!(pid = pid.as_raw(), "tracee gone before its registers were read");
                return Ok(false);
            }
            Err(source) => {
                return Err(Error::Registers {
                    pid: pid.as_raw(),
                    source,
                });
            }
        };

        let tracee = self.tracees.entry(pid).or_default();
        tracee.fresh = false;
        match tracee.pending.take() {
            None => {
                let number = regs.syscall_number();
                tracee.pending = Some((number, self.calls.read_path(pid, number, &regs)));
            }
            Some((number, path)) => {
                // Restarted or interrupted syscalls report -1.
                let Ok(number) = u32::try_from(number) else {
                    return Ok(true);
                };
                let event = SyscallEvent {
                    pid: pid.as_raw(),
                    number,
                    ret: regs.return_value(),
                    path,
                };
                if self.updates.blocking_send(Update::Syscall(event)).is_err() && !self.reported {
                    return Err(Error::WorkerGone);
                }
            }
        }
        Ok(true)
    }

    fn resume(&self, pid: Pid, signal: Option<Signal>) {
        match ptrace::syscall(pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => {
                warn!(pid = pid.as_raw(), %err, "failed to resume tracee");
                let _ = self
                    .errors
                    .try_send(Error::non_critical(format!("resume of tracee {pid} failed: {err}")));
            }
        }
    }

    /// Returns true once the last known tracee is gone.
    fn forget(&mut self, pid: Pid) -> bool {
        self.tracees.remove(&pid);
        if self.tracees.is_empty() {
            return true;
        }
        if pid == self.target && self.report_on_target_exit && !self.reported {
            debug!(left = self.tracees.len(), "reporting on target exit");
            self.reported = true;
            let _ = self.updates.blocking_send(Update::Finished(Ok(())));
        }
        false
    }
}

fn is_spawn_event(event: i32) -> bool {
    event == Event::PTRACE_EVENT_FORK as i32
        || event == Event::PTRACE_EVENT_VFORK as i32
        || event == Event::PTRACE_EVENT_CLONE as i32
}
