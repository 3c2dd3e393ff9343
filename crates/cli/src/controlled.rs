//! Remote-controlled sensor.
//!
//! The controller starts and stops monitoring runs over the command
//! channel and follows them on the event channel. Between runs the sensor
//! idles until the next start command or a shutdown.

use crate::artifact::Artifactor;
use crate::error::Error;
use crate::execution::{self, Execution, MonitorFactory, normalize};
use crate::session::{Session, report_error};
use ipc::command::Message;
use ipc::event;
use monitor::{FileAccessReport, Monitor, SyscallReport};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// The controller stopped the run.
    Stopped,
    /// The sensor is going away. Results are still saved.
    Interrupted,
}

/// Serve commands until a shutdown command, a closed command channel or
/// `shutdown` fires.
///
/// Fatal conditions are published as an error event before they are
/// returned.
pub async fn run<E, F>(
    exe: &mut E,
    factory: &F,
    artifactor: &Artifactor,
    shutdown: CancellationToken,
) -> Result<(), Error>
where
    E: Execution + ?Sized,
    F: MonitorFactory,
{
    info!("waiting for commands");
    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => None,
            command = exe.next_command() => command,
        };
        let start = match command {
            None => {
                info!("no more commands, exiting");
                return Ok(());
            }
            Some(Message::ShutdownSensor) => {
                info!("shutdown requested");
                execution::publish(exe, event::Message::ShutdownSensorDone).await;
                return Ok(());
            }
            Some(Message::StopMonitor) => {
                warn!("no monitor is running, ignoring the stop command");
                continue;
            }
            Some(Message::StartMonitor(start)) => start,
        };

        let started = match normalize(start, &[]) {
            Ok(start) => Session::start(start, factory, artifactor).await,
            Err(err) => Err(err),
        };
        let session = match started {
            Ok(session) => session,
            Err(err) => {
                error!(%err, "failed to start monitoring");
                execution::publish(exe, event::Message::error(err.to_string())).await;
                return Err(err);
            }
        };
        execution::publish(exe, event::Message::StartMonitorDone).await;

        match supervise(exe, session, artifactor, &shutdown).await {
            Ok(outcome) => {
                execution::publish(exe, event::Message::StopMonitorDone).await;
                if outcome == Outcome::Interrupted {
                    return Ok(());
                }
            }
            Err(Error::PrematureShutdown) => {
                warn!("shutdown before the monitor was stopped, results are abandoned");
                execution::publish(exe, event::Message::ShutdownSensorDone).await;
                return Err(Error::PrematureShutdown);
            }
            Err(err) => {
                error!(%err, "monitoring failed");
                execution::publish(exe, event::Message::error(err.to_string())).await;
                return Err(err);
            }
        }
    }
}

/// Follow one run until the controller stops it, then collect the results.
async fn supervise<E, T, W>(
    exe: &mut E,
    mut session: Session<T, W>,
    artifactor: &Artifactor,
    shutdown: &CancellationToken,
) -> Result<Outcome, Error>
where
    E: Execution + ?Sized,
    T: Monitor<Report = SyscallReport>,
    W: Monitor<Report = FileAccessReport>,
{
    let done = session.done();
    let mut target_done = false;
    let outcome = loop {
        tokio::select! {
            _ = done.cancelled(), if !target_done => {
                info!("target app is done, waiting for the stop command");
                target_done = true;
            }
            Some(err) = session.next_error() => report_error(exe, &err).await,
            _ = shutdown.cancelled() => {
                session.cancel();
                break Outcome::Interrupted;
            }
            command = exe.next_command() => match command {
                Some(Message::StopMonitor) => {
                    debug!("stop command received");
                    session.cancel();
                    break Outcome::Stopped;
                }
                Some(Message::ShutdownSensor) => {
                    session.cancel();
                    return Err(Error::PrematureShutdown);
                }
                Some(Message::StartMonitor(_)) if target_done => {
                    return Err(Error::UnexpectedCommand("waiting for the stop command"));
                }
                Some(Message::StartMonitor(_)) => {
                    warn!(app = %session.command().app_name, "monitor already running, ignoring the start command");
                }
                None => {
                    session.cancel();
                    break Outcome::Interrupted;
                }
            },
        }
    };
    session.finish(exe, artifactor).await?;
    Ok(outcome)
}
