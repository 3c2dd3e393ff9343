use super::{read_frame, write_frame};
use crate::error::Error;
use crate::frame::{Frame, FrameType};
use serde_json::value::RawValue;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Answers request frames arriving on a command channel.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Produce the body of the response frame. An error is reported to the
    /// caller as an error frame carrying its text.
    async fn on_request(&self, body: Option<&RawValue>) -> Result<Box<RawValue>, Error>;
}

/// Accepts command connections and serves request/response exchanges on
/// each of them until the shutdown token fires.
#[derive(Debug)]
pub struct CommandServer {
    local_addr: SocketAddr,
    connected: watch::Receiver<usize>,
}

impl CommandServer {
    pub async fn start(
        addr: SocketAddr,
        handler: Arc<dyn RequestHandler>,
        write_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (connected_tx, connected) = watch::channel(0);
        info!(%local_addr, "command channel listening");

        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "command channel connection");
                            stream
                        }
                        Err(err) => {
                            warn!(?err, "command channel accept failed");
                            continue;
                        }
                    },
                };
                connected_tx.send_modify(|count| *count += 1);
                tokio::spawn(serve_commands(
                    stream,
                    Arc::clone(&handler),
                    write_timeout,
                    shutdown.clone(),
                ));
            }
            trace!("command channel accept loop exited");
        });

        Ok(Self {
            local_addr,
            connected,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves once at least one controller has connected.
    pub async fn wait_for_connection(&self) {
        let mut connected = self.connected.clone();
        let _ = connected.wait_for(|count| *count > 0).await;
    }
}

async fn serve_commands(
    stream: TcpStream,
    handler: Arc<dyn RequestHandler>,
    write_timeout: Duration,
    shutdown: CancellationToken,
) {
    let peer = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        // No read deadline: an idle controller is not an error.
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read_frame(&mut reader, &mut buf, Duration::MAX, 0) => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(Error::ConnectionClosed) => {
                debug!(?peer, "command channel closed by peer");
                break;
            }
            Err(Error::Io(err)) => {
                warn!(?peer, ?err, "command channel read failed");
                break;
            }
            Err(Error::FrameUndecodable { tid, source }) => {
                warn!(?peer, %tid, %source, "undecodable command frame");
                let reply = error_frame(&Error::Json(source), &tid);
                if let Err(err) = write_frame(&mut writer, &reply, write_timeout, 0).await {
                    warn!(?peer, ?err, "command channel reply failed");
                    break;
                }
                continue;
            }
            Err(err) => {
                warn!(?peer, ?err, "dropping undecodable command frame");
                continue;
            }
        };

        let reply = match frame.kind {
            FrameType::Control => Frame::new(FrameType::Control, None, Some(&frame.tid)),
            FrameType::Request => match handler.on_request(frame.body.as_deref()).await {
                Ok(body) => Frame::new(FrameType::Response, Some(body), Some(&frame.tid)),
                Err(err) => {
                    warn!(tid = %frame.tid, ?err, "request handler failed");
                    error_frame(&err, &frame.tid)
                }
            },
            other => {
                warn!(tid = %frame.tid, kind = %other, "unexpected frame on command channel");
                error_frame(&Error::FrameUnexpected(other), &frame.tid)
            }
        };

        if let Err(err) = write_frame(&mut writer, &reply, write_timeout, 0).await {
            warn!(?peer, ?err, "command channel reply failed");
            break;
        }
    }
}

fn error_frame(err: &Error, tid: &str) -> Frame {
    let body = serde_json::value::to_raw_value(&err.to_string()).ok();
    Frame::new(FrameType::Error, body, Some(tid))
}

/// Accepts event subscribers and fans published events out to all of them.
#[derive(Debug)]
pub struct EventServer {
    local_addr: SocketAddr,
    links: Arc<Mutex<Vec<Link>>>,
    connected: watch::Receiver<usize>,
    write_timeout: Duration,
}

#[derive(Debug)]
struct Link {
    peer: SocketAddr,
    writer: OwnedWriteHalf,
}

impl EventServer {
    pub async fn start(
        addr: SocketAddr,
        write_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let links = Arc::new(Mutex::new(Vec::new()));
        let (connected_tx, connected) = watch::channel(0);
        info!(%local_addr, "event channel listening");

        let accepted_links = Arc::clone(&links);
        tokio::spawn(async move {
            loop {
                let (stream, peer) = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(?err, "event channel accept failed");
                            continue;
                        }
                    },
                };
                debug!(%peer, "event channel subscriber");
                // Subscribers never send anything; the read half is dropped.
                let (_, writer) = stream.into_split();
                accepted_links.lock().await.push(Link { peer, writer });
                connected_tx.send_modify(|count| *count += 1);
            }
            accepted_links.lock().await.clear();
            trace!("event channel accept loop exited");
        });

        Ok(Self {
            local_addr,
            links,
            connected,
            write_timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves once at least one subscriber has connected.
    pub async fn wait_for_connection(&self) {
        let mut connected = self.connected.clone();
        let _ = connected.wait_for(|count| *count > 0).await;
    }

    /// Send one event frame to every subscriber. Subscribers whose socket
    /// fails are dropped; timed-out writes are retried.
    pub async fn publish(&self, body: Box<RawValue>, retries: u32) -> Result<(), Error> {
        let frame = Frame::new(FrameType::Event, Some(body), None);
        let mut links = self.links.lock().await;
        let mut last_err = None;
        let mut alive = Vec::with_capacity(links.len());
        for mut link in links.drain(..) {
            match write_frame(&mut link.writer, &frame, self.write_timeout, retries).await {
                Ok(()) => alive.push(link),
                Err(err @ Error::Timeout { .. }) => {
                    warn!(peer = %link.peer, ?err, "event publish timed out");
                    alive.push(link);
                    last_err = Some(err);
                }
                Err(err) => {
                    warn!(peer = %link.peer, ?err, "dropping event subscriber");
                    last_err = Some(err);
                }
            }
        }
        *links = alive;
        trace!(tid = %frame.tid, subscribers = links.len(), "event published");
        match last_err {
            Some(err) if links.is_empty() => Err(err),
            _ => Ok(()),
        }
    }
}
