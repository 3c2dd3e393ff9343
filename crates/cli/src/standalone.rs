//! Standalone sensor: one run driven by a command file.
//!
//! The run ends when the target exits. Process signals the sensor receives
//! meanwhile are relayed to the target.

use crate::artifact::Artifactor;
use crate::error::Error;
use crate::execution::{self, Execution, MonitorFactory, normalize};
use crate::session::{Session, report_error};
use ipc::command::Message;
use ipc::event;
use nix::sys::signal::Signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Run the target named by the start command to completion.
///
/// `cmd_override` replaces the command's image cmd. A failure is published
/// as an error event; the shutdown event is published either way.
pub async fn run<E, F>(
    exe: &mut E,
    factory: &F,
    artifactor: &Artifactor,
    cmd_override: &[String],
    signals: mpsc::Receiver<Signal>,
) -> Result<(), Error>
where
    E: Execution + ?Sized,
    F: MonitorFactory,
{
    let result = run_target(exe, factory, artifactor, cmd_override, signals).await;
    if let Err(err) = &result {
        error!(%err, "sensor run failed");
        execution::publish(exe, event::Message::error(err.to_string())).await;
    }
    execution::publish(exe, event::Message::ShutdownSensorDone).await;
    result
}

async fn run_target<E, F>(
    exe: &mut E,
    factory: &F,
    artifactor: &Artifactor,
    cmd_override: &[String],
    mut signals: mpsc::Receiver<Signal>,
) -> Result<(), Error>
where
    E: Execution + ?Sized,
    F: MonitorFactory,
{
    let start = match exe.next_command().await {
        Some(Message::StartMonitor(start)) => normalize(start, cmd_override)?,
        Some(other) => {
            warn!(name = other.name(), "expected a start command");
            return Err(Error::UnexpectedCommand("waiting for the start command"));
        }
        None => return Err(Error::CommandsClosed("waiting for the start command")),
    };

    let mut session = Session::start(start, factory, artifactor).await?;
    execution::publish(exe, event::Message::StartMonitorDone).await;

    let done = session.done();
    let mut commands_open = true;
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            Some(err) = session.next_error() => report_error(exe, &err).await,
            Some(signal) = signals.recv() => {
                debug!(%signal, "forwarding signal to target app");
                session.signal_target_app(signal).await;
            }
            command = exe.next_command(), if commands_open => match command {
                Some(Message::StopMonitor) => {
                    info!("stop command received");
                    session.cancel();
                }
                Some(other) => warn!(name = other.name(), "ignoring unexpected command"),
                None => commands_open = false,
            },
        }
    }
    info!("target app is done");

    session.finish(exe, artifactor).await?;
    execution::publish(exe, event::Message::StopMonitorDone).await;
    Ok(())
}
