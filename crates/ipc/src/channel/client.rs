use super::{read_frame, write_frame};
use crate::error::Error;
use crate::frame::{Frame, FrameType};
use config::Transport;
use serde_json::value::RawValue;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, trace};

const REDIAL_DELAY: Duration = Duration::from_secs(2);
const REVERIFY_DELAY: Duration = Duration::from_secs(5);

/// One dialed channel with its own read buffer and deadlines.
#[derive(Debug)]
pub struct Client {
    peer: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    buf: Vec<u8>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Client {
    /// Dial `addr`, redialing refused connections until the configured
    /// connect wait elapses.
    pub async fn connect(addr: SocketAddr, opts: &Transport) -> Result<Self, Error> {
        let started = Instant::now();
        loop {
            match tokio::time::timeout(opts.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!(%addr, waited = ?started.elapsed(), "channel connected");
                    let (reader, writer) = stream.into_split();
                    return Ok(Self {
                        peer: addr,
                        reader: BufReader::new(reader),
                        writer,
                        buf: Vec::new(),
                        read_timeout: opts.read_timeout,
                        write_timeout: opts.write_timeout,
                    });
                }
                Ok(Err(err)) => trace!(%addr, ?err, "channel dial failed"),
                Err(_) => trace!(%addr, "channel dial timed out"),
            }
            if started.elapsed() + REDIAL_DELAY > opts.connect_wait {
                debug!(%addr, waited = ?started.elapsed(), "gave up dialing channel");
                return Err(Error::WaitTimeout);
            }
            tokio::time::sleep(REDIAL_DELAY).await;
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn write(&mut self, frame: &Frame, retries: u32) -> Result<(), Error> {
        write_frame(&mut self.writer, frame, self.write_timeout, retries).await
    }

    pub async fn read(&mut self, retries: u32) -> Result<Frame, Error> {
        read_frame(&mut self.reader, &mut self.buf, self.read_timeout, retries).await
    }
}

/// Controller side of a command channel.
#[derive(Debug)]
pub struct CommandClient {
    client: Client,
}

impl CommandClient {
    /// Dial and verify the command channel. A peer that accepts the
    /// connection but does not answer the control frame is redialed until
    /// the connect wait elapses.
    pub async fn connect(addr: SocketAddr, opts: &Transport) -> Result<Self, Error> {
        let started = Instant::now();
        loop {
            let mut client = Client::connect(addr, opts).await?;
            match verify(&mut client, opts.retries).await {
                Ok(()) => return Ok(Self { client }),
                Err(err) => debug!(%addr, ?err, "command channel verification failed"),
            }
            if started.elapsed() + REVERIFY_DELAY > opts.connect_wait {
                return Err(Error::WaitTimeout);
            }
            tokio::time::sleep(REVERIFY_DELAY).await;
        }
    }

    /// Send one request and wait for its response body.
    pub async fn call(
        &mut self,
        body: Box<RawValue>,
        retries: u32,
    ) -> Result<Option<Box<RawValue>>, Error> {
        let request = Frame::new(FrameType::Request, Some(body), None);
        self.client.write(&request, retries).await?;
        let reply = self.client.read(retries).await?;
        match reply.kind {
            FrameType::Error => return Err(Error::RemoteError(reply.body_str().to_owned())),
            FrameType::Response => {}
            other => return Err(Error::FrameUnexpected(other)),
        }
        if reply.tid != request.tid {
            return Err(Error::FrameTidMismatch {
                expected: request.tid,
                actual: reply.tid,
            });
        }
        Ok(reply.body)
    }
}

async fn verify(client: &mut Client, retries: u32) -> Result<(), Error> {
    let probe = Frame::new(FrameType::Control, None, None);
    client.write(&probe, retries).await?;
    let reply = client.read(retries).await?;
    if reply.kind != FrameType::Control {
        return Err(Error::FrameUnexpected(reply.kind));
    }
    if reply.tid != probe.tid {
        return Err(Error::FrameTidMismatch {
            expected: probe.tid,
            actual: reply.tid,
        });
    }
    Ok(())
}

/// Controller side of an event channel.
#[derive(Debug)]
pub struct EventClient {
    client: Client,
}

impl EventClient {
    pub async fn connect(addr: SocketAddr, opts: &Transport) -> Result<Self, Error> {
        Ok(Self {
            client: Client::connect(addr, opts).await?,
        })
    }

    /// Wait for the next event, returning its body and transaction id.
    pub async fn next(&mut self, retries: u32) -> Result<(Box<RawValue>, String), Error> {
        let frame = self.client.read(retries).await?;
        if frame.kind != FrameType::Event {
            return Err(Error::FrameUnexpected(frame.kind));
        }
        let body = frame.body.ok_or(Error::NoData)?;
        Ok((body, frame.tid))
    }
}
