//! Process signals the sensor listens for.

use nix::sys::signal::Signal;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::trace;

/// Signals relayed by [`relay_signals`]. SIGCHLD is left alone: a tracer
/// gets one for every tracee stop.
pub const RELAYED: [Signal; 6] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
];

/// Install handlers for [`RELAYED`] and send every delivery into `tx`.
///
/// The relays stop when the returned set is dropped or the receiver goes
/// away.
pub fn relay_signals(tx: mpsc::Sender<Signal>) -> std::io::Result<JoinSet<()>> {
    let mut relays = JoinSet::new();
    for sig in RELAYED {
        let mut deliveries = signal(SignalKind::from_raw(sig as i32))?;
        let tx = tx.clone();
        relays.spawn(async move {
            while deliveries.recv().await.is_some() {
                trace!(%sig, "signal received");
                if tx.send(sig).await.is_err() {
                    break;
                }
            }
        });
    }
    Ok(relays)
}

/// Whether `sig` asks a controlled sensor to go away.
pub fn is_shutdown(sig: Signal) -> bool {
    matches!(sig, Signal::SIGINT | Signal::SIGTERM | Signal::SIGQUIT)
}
