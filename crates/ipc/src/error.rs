use crate::frame::FrameType;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no data")]
    NoData,

    #[error("frame TID mismatch: expected {expected}, got {actual}")]
    FrameTidMismatch { expected: String, actual: String },

    #[error("unexpected frame type: {0}")]
    FrameUnexpected(FrameType),

    #[error("remote error: {0}")]
    RemoteError(String),

    #[error("wait timeout")]
    WaitTimeout,

    #[error("malformed frame")]
    FrameMalformed,

    #[error("undecodable frame {tid}: {source}")]
    FrameUndecodable {
        tid: String,
        source: serde_json::Error,
    },

    #[error("{op} timed out after {attempts} attempt(s)")]
    Timeout { op: &'static str, attempts: u32 },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("unknown message name: {0}")]
    UnknownMessage(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON failure: {0}")]
    Json(#[from] serde_json::Error),
}
