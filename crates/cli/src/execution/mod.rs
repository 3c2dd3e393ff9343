//! Where commands come from and where events go.
//!
//! A controlled sensor talks to a remote controller over the IPC channels,
//! a standalone one reads its start command from a file and appends events
//! to another. Both drive the same monitors, built by a [`MonitorFactory`].

mod file;
mod ipc_channels;

pub use file::FileExecution;
pub use ipc_channels::IpcExecution;

use crate::error::Error;
use ipc::command::{self, StartMonitor};
use ipc::event;
use monitor::{
    CompositeMonitor, FileAccessReport, Launch, Monitor, SyscallReport, Tracer, Watch, Watcher,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Redirect target for the target's stdout, relative to the artifacts dir.
pub const APP_STDOUT_FILE: &str = "app_stdout.log";
/// Redirect target for the target's stderr, relative to the artifacts dir.
pub const APP_STDERR_FILE: &str = "app_stderr.log";

#[async_trait::async_trait]
pub trait Execution: Send {
    /// Next command, or `None` once no further command can arrive.
    async fn next_command(&mut self) -> Option<command::Message>;

    async fn publish(&mut self, event: &event::Message) -> Result<(), Error>;

    /// Stop accepting commands and release the event sink.
    fn close(&mut self);
}

/// Publish `event`, logging instead of failing. Events are best effort.
pub async fn publish<E: Execution + ?Sized>(exe: &mut E, event: event::Message) {
    if let Err(err) = exe.publish(&event).await {
        warn!(name = event.name(), %err, "failed to publish event");
    }
}

/// Builds the monitors for one run.
pub trait MonitorFactory: Send + Sync {
    type Tracer: Monitor<Report = SyscallReport>;
    type Watcher: Monitor<Report = FileAccessReport>;

    /// `baseline` holds the paths present before the run when new paths are
    /// to be left out of the report.
    fn create(
        &self,
        command: StartMonitor,
        baseline: Option<Arc<HashSet<String>>>,
    ) -> Result<CompositeMonitor<Self::Tracer, Self::Watcher>, Error>;
}

/// Monitors backed by ptrace and fanotify.
#[derive(Debug, Clone)]
pub struct KernelMonitors {
    config: config::Config,
}

impl KernelMonitors {
    pub fn new(config: config::Config) -> Self {
        Self { config }
    }
}

impl MonitorFactory for KernelMonitors {
    type Tracer = Tracer;
    type Watcher = Watcher;

    fn create(
        &self,
        command: StartMonitor,
        baseline: Option<Arc<HashSet<String>>>,
    ) -> Result<CompositeMonitor<Tracer, Watcher>, Error> {
        if command.app_name.is_empty() {
            return Err(Error::MissingApp);
        }
        let sensor = &self.config.sensor;
        let launch = launch_for(&command, &sensor.artifacts_dir);
        debug!(?launch, "launch prepared");
        let watch = Watch {
            mount_point: sensor.mount_point.clone(),
            artifacts_dir: sensor.artifacts_dir.clone(),
            baseline,
        };
        Ok(CompositeMonitor::new(command, launch, watch, &self.config))
    }
}

/// How the target is started for `command`.
pub fn launch_for(command: &StartMonitor, artifacts_dir: &Path) -> Launch {
    let user = (command.run_tas_user && !command.app_user.is_empty())
        .then(|| command.app_user.clone());
    Launch {
        app_name: command.app_name.clone(),
        app_args: command.app_args.clone(),
        user,
        traced: command.rta_source_ptrace,
        report_on_target_exit: command.report_on_main_pid_exit,
        stdout: command
            .app_stdout_to_file
            .then(|| artifacts_dir.join(APP_STDOUT_FILE)),
        stderr: command
            .app_stderr_to_file
            .then(|| artifacts_dir.join(APP_STDERR_FILE)),
    }
}

/// Resolve the entrypoint/cmd form of a start command into `app_name` and
/// `app_args`. A non-empty `cmd_override` replaces `app_cmd` first.
///
/// The two forms are mutually exclusive; the resolved command keeps its
/// entrypoint and cmd for the report.
pub fn normalize(mut command: StartMonitor, cmd_override: &[String]) -> Result<StartMonitor, Error> {
    if !cmd_override.is_empty() {
        command.app_cmd = cmd_override.to_vec();
    }

    if !command.app_entrypoint.is_empty() || !command.app_cmd.is_empty() {
        if !command.app_name.is_empty() || !command.app_args.is_empty() {
            return Err(Error::AmbiguousCommand);
        }
        let mut parts = command.app_entrypoint.iter().chain(&command.app_cmd).cloned();
        let name = parts.next().unwrap_or_default();
        let args = parts.collect();
        command.app_name = name;
        command.app_args = args;
    }

    if command.app_name.is_empty() {
        return Err(Error::MissingApp);
    }
    Ok(command)
}
