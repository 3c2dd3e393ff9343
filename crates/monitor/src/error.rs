use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Monitor has not finished yet")]
    NotDone,

    #[error("Monitor was already started")]
    AlreadyStarted,

    #[error("Monitor was cancelled before it started")]
    Cancelled,

    #[error("Invalid start command: {0}")]
    InvalidCommand(String),

    #[error("Unknown user or group: {0}")]
    UnknownUser(String),

    #[error("Failed to launch {app}: {source}")]
    Launch {
        app: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Target stopped before tracing began: {0}")]
    TargetExited(String),

    #[error("Failed to read registers of tracee {pid}: {source}")]
    Registers { pid: i32, source: nix::Error },

    #[error("Trace control failed: {0}")]
    Ptrace(nix::Error),

    #[error("Waiting for tracees failed: {0}")]
    Wait(nix::Error),

    #[error("Fanotify failed: {0}")]
    Fanotify(nix::Error),

    #[error("Failed to resolve event path: {0}")]
    ResolvePath(std::io::Error),

    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("Failed to spawn {0} thread: {1}")]
    Spawn(&'static str, std::io::Error),

    #[error("Worker thread stopped unexpectedly")]
    WorkerGone,

    #[error("one or more monitors failed: watcher.error={watcher}, tracer.error={tracer}")]
    MonitorsFailed { watcher: String, tracer: String },

    #[error("non-critical monitor error: {0}")]
    NonCritical(String),

    /// A terminal status shared by every caller of `status()`.
    #[error("{0}")]
    Failed(Arc<Error>),

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Kernel facilities answer EPERM when the sensor lacks the capability
    /// they need; report that as a permission problem.
    pub(crate) fn from_kernel(err: nix::Error, wrap: fn(nix::Error) -> Error) -> Self {
        match err {
            nix::errno::Errno::EPERM => Error::InsufficientPermissions(err.desc().to_owned()),
            err => wrap(err),
        }
    }

    pub fn non_critical(err: impl std::fmt::Display) -> Self {
        Error::NonCritical(err.to_string())
    }
}
