//! Framed byte-stream channels.
//!
//! A command channel carries request/response pairs correlated by
//! transaction id. An event channel carries one-way event frames from the
//! sensor to every subscribed controller.

mod client;
mod server;

pub use client::{Client, CommandClient, EventClient};
pub use server::{CommandServer, EventServer, RequestHandler};

use crate::error::Error;
use crate::frame::{FRAME_DELIMITER, Frame, salvage_tid};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Read one frame, retrying timed-out reads up to `retries` extra times.
///
/// `buf` must be kept by the caller between calls: bytes read before a
/// timeout stay in it and the next attempt continues the same frame.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    timeout: Duration,
    retries: u32,
) -> Result<Frame, Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut timeouts = 0;
    loop {
        match tokio::time::timeout(timeout, reader.read_until(FRAME_DELIMITER, buf)).await {
            Err(_) => {
                timeouts += 1;
                debug!(timeouts, "frame read timed out");
                if timeouts > retries {
                    return Err(Error::Timeout {
                        op: "read",
                        attempts: timeouts,
                    });
                }
            }
            Ok(Ok(0)) if buf.is_empty() => return Err(Error::ConnectionClosed),
            Ok(Ok(_)) => {
                let raw = std::mem::take(buf);
                return Frame::decode(&raw).map_err(|err| match (err, salvage_tid(&raw)) {
                    (Error::Json(source), Some(tid)) => Error::FrameUndecodable { tid, source },
                    (err, _) => err,
                });
            }
            Ok(Err(err)) => return Err(err.into()),
        }
    }
}

/// Write one encoded frame, retrying timed-out writes up to `retries`
/// extra times.
pub(crate) async fn write_frame<W>(
    writer: &mut W,
    frame: &Frame,
    timeout: Duration,
    retries: u32,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let raw = frame.encode()?;
    let mut timeouts = 0;
    loop {
        match tokio::time::timeout(timeout, writer.write_all(&raw)).await {
            Err(_) => {
                timeouts += 1;
                debug!(timeouts, tid = %frame.tid, "frame write timed out");
                if timeouts > retries {
                    return Err(Error::Timeout {
                        op: "write",
                        attempts: timeouts,
                    });
                }
            }
            Ok(result) => return Ok(result?),
        }
    }
}
