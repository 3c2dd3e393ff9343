use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const FRAME_HEADER: &[u8] = b"[<|]";
pub const FRAME_TRAILER: &[u8] = b"[|>]\n";

/// Byte that ends every frame on the wire. It is the last byte of
/// [`FRAME_TRAILER`].
pub const FRAME_DELIMITER: u8 = b'\n';

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    #[serde(rename = "ft.request")]
    Request,
    #[serde(rename = "ft.response")]
    Response,
    #[serde(rename = "ft.event")]
    Event,
    #[serde(rename = "ft.error")]
    Error,
    /// Carries no body. Only used to check that a freshly dialed command
    /// channel is answered by a peer speaking this protocol.
    #[serde(rename = "ft.control")]
    Control,
}

impl FrameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "ft.request",
            Self::Response => "ft.response",
            Self::Event => "ft.event",
            Self::Error => "ft.error",
            Self::Control => "ft.control",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub tid: String,
    #[serde(rename = "type")]
    pub kind: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Box<RawValue>>,
}

impl Frame {
    /// Build a frame. A fresh transaction id is generated unless `tid` is
    /// given, which is how replies echo the id of the frame they answer.
    pub fn new(kind: FrameType, body: Option<Box<RawValue>>, tid: Option<&str>) -> Self {
        Self {
            tid: tid.map_or_else(generate_tid, str::to_owned),
            kind,
            body,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let json = serde_json::to_vec(self)?;
        let mut raw = Vec::with_capacity(FRAME_HEADER.len() + json.len() + FRAME_TRAILER.len());
        raw.extend_from_slice(FRAME_HEADER);
        raw.extend_from_slice(&json);
        raw.extend_from_slice(FRAME_TRAILER);
        Ok(raw)
    }

    /// Decode one delimited frame. Input without both the header and the
    /// trailer is rejected before any JSON is parsed.
    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() <= FRAME_HEADER.len() + FRAME_TRAILER.len()
            || !raw.starts_with(FRAME_HEADER)
            || !raw.ends_with(FRAME_TRAILER)
        {
            return Err(Error::FrameMalformed);
        }
        let json = &raw[FRAME_HEADER.len()..raw.len() - FRAME_TRAILER.len()];
        Ok(serde_json::from_slice(json)?)
    }

    pub fn body_str(&self) -> &str {
        self.body.as_deref().map_or("", RawValue::get)
    }
}

/// Transaction id of a well-delimited frame whose JSON does not decode as a
/// [`Frame`], so that the sender can still be answered.
pub fn salvage_tid(raw: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct Tid {
        tid: String,
    }
    let json = raw.strip_prefix(FRAME_HEADER)?.strip_suffix(FRAME_TRAILER)?;
    serde_json::from_slice::<Tid>(json).ok().map(|t| t.tid)
}

/// `<unix-nanos>.<16 hex chars>`
pub fn generate_tid() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let random = uuid::Uuid::new_v4();
    let hex: String = random.as_bytes()[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("{nanos}.{hex}")
}
