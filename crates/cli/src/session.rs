//! One monitored run of the target, from start command to saved report.

use crate::artifact::{Artifactor, ContainerReport};
use crate::error::Error;
use crate::execution::{self, Execution, MonitorFactory};
use ipc::command::StartMonitor;
use ipc::event;
use monitor::{CompositeMonitor, FileAccessReport, Monitor, SyscallReport};
use nix::sys::signal::Signal;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Session<T, W> {
    command: StartMonitor,
    monitor: CompositeMonitor<T, W>,
    baseline: Option<Arc<HashSet<String>>>,
}

impl<T, W> Session<T, W>
where
    T: Monitor<Report = SyscallReport>,
    W: Monitor<Report = FileAccessReport>,
{
    /// Prepare the artifacts dir, snapshot the baseline if new paths are to
    /// be ignored, then build and start the monitors.
    pub async fn start<F>(
        command: StartMonitor,
        factory: &F,
        artifactor: &Artifactor,
    ) -> Result<Self, Error>
    where
        F: MonitorFactory<Tracer = T, Watcher = W>,
    {
        artifactor.prepare()?;
        let baseline = if command.include_new {
            None
        } else {
            Some(Arc::new(artifactor.current_paths(&command.excludes)?))
        };
        let monitor = factory.create(command.clone(), baseline.clone())?;
        monitor.start().await?;
        info!(app = %command.app_name, args = ?command.app_args, "monitor started");
        Ok(Self {
            command,
            monitor,
            baseline,
        })
    }

    pub fn command(&self) -> &StartMonitor {
        &self.command
    }

    pub fn done(&self) -> CancellationToken {
        self.monitor.done()
    }

    pub fn cancel(&self) {
        self.monitor.cancel();
    }

    pub async fn next_error(&mut self) -> Option<monitor::Error> {
        self.monitor.next_error().await
    }

    pub async fn signal_target_app(&self, signal: Signal) {
        if let Err(err) = self.monitor.signal_target_app(signal).await {
            warn!(%signal, %err, "failed to forward signal to target app");
        }
    }

    /// Wait for the run to end, publish the late non-fatal errors, then
    /// save the report.
    pub async fn finish<E>(mut self, exe: &mut E, artifactor: &Artifactor) -> Result<ContainerReport, Error>
    where
        E: Execution + ?Sized,
    {
        self.monitor.done().cancelled().await;
        for err in self.monitor.drain_errors().await {
            report_error(exe, &err).await;
        }
        info!("composite monitor is done, checking status");
        let reports = self
            .monitor
            .status()
            .inspect_err(|err| error!(%err, "composite monitor failed"))?;
        artifactor.write_report(&self.command, &reports, self.baseline.as_deref())
    }
}

/// Publish a non-fatal monitor condition as an error event.
pub async fn report_error<E: Execution + ?Sized>(exe: &mut E, err: &monitor::Error) {
    warn!(%err, "non-critical monitor error condition");
    execution::publish(exe, event::Message::error(err.to_string())).await;
}
