use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),

    #[error(transparent)]
    Ipc(#[from] ipc::Error),

    #[error(transparent)]
    Monitor(#[from] monitor::Error),

    #[error(
        "ambiguous start command: cannot use [app_name,app_args] and [app_entrypoint,app_cmd] simultaneously"
    )]
    AmbiguousCommand,

    #[error("start command names no application to run")]
    MissingApp,

    #[error("sensor shutdown before monitor stop")]
    PrematureShutdown,

    #[error("unexpected command while {0}")]
    UnexpectedCommand(&'static str),

    #[error("command channel closed while {0}")]
    CommandsClosed(&'static str),

    #[error("cannot read command file {path:?}: {source}")]
    CommandFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot decode start command: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid exclude pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}
