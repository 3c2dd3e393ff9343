use crate::error::Error;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Forward signals received by the sensor to the target. The stop signal
/// also arms a timer that kills the target's process group if it is still
/// running when the grace period ends.
pub(crate) async fn relay_signals(
    mut signals: mpsc::Receiver<Signal>,
    target: Pid,
    stop_signal: Signal,
    grace: Duration,
    done: CancellationToken,
    errors: mpsc::Sender<Error>,
) {
    loop {
        let signal = tokio::select! {
            _ = done.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };
        if signal == Signal::SIGCHLD {
            continue;
        }

        debug!(%signal, pid = target.as_raw(), "relaying signal to target");
        match kill(target, signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => {
                warn!(%signal, %err, "failed to relay signal");
                let _ = errors.try_send(Error::non_critical(format!(
                    "relaying {signal} to target failed: {err}"
                )));
            }
        }
        if signal == stop_signal {
            tokio::spawn(kill_after(target, grace, done.clone()));
        }
    }
}

/// Kill the target's process group unless `done` fires within `grace`.
pub(crate) async fn kill_after(target: Pid, grace: Duration, done: CancellationToken) {
    tokio::select! {
        _ = done.cancelled() => {}
        _ = tokio::time::sleep(grace) => {
            info!(pid = target.as_raw(), ?grace, "target outlived its stop grace, killing");
            kill_group(target);
        }
    }
}

/// The target leads its own process group.
pub(crate) fn kill_group(target: Pid) {
    match killpg(target, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(pid = target.as_raw(), %err, "failed to kill target process group"),
    }
}
