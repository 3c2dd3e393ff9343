use crate::channel::{CommandServer, EventServer, RequestHandler};
use crate::command::{self, Response, ResponseStatus};
use crate::error::Error;
use crate::event;
use config::Transport;
use serde_json::value::RawValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const COMMAND_QUEUE: usize = 10;

/// Sensor end of the transport: decoded commands come out of
/// [`Server::next_command`], events go in through [`Server::publish`].
#[derive(Debug)]
pub struct Server {
    commands: mpsc::Receiver<command::Message>,
    cmd_channel: CommandServer,
    evt_channel: EventServer,
    shutdown: CancellationToken,
    retries: u32,
}

struct Dispatcher {
    commands: mpsc::Sender<command::Message>,
}

#[async_trait::async_trait]
impl RequestHandler for Dispatcher {
    async fn on_request(&self, body: Option<&RawValue>) -> Result<Box<RawValue>, Error> {
        let status = match body.ok_or(Error::NoData).and_then(command::Message::decode) {
            Ok(cmd) => {
                debug!(name = cmd.name(), "command received");
                match self.commands.send(cmd).await {
                    Ok(()) => ResponseStatus::Ok,
                    Err(_) => {
                        warn!("command dropped, sensor is no longer reading commands");
                        ResponseStatus::Error
                    }
                }
            }
            Err(err) => {
                warn!(?err, "rejecting undecodable command");
                ResponseStatus::Error
            }
        };
        Ok(serde_json::value::to_raw_value(&Response { status })?)
    }
}

impl Server {
    /// Bind both channels. They stop accepting once `shutdown` fires or
    /// [`Server::stop`] is called.
    pub async fn start(opts: &Transport, shutdown: CancellationToken) -> Result<Self, Error> {
        let shutdown = shutdown.child_token();
        let (tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let evt_channel =
            EventServer::start(opts.evt_addr(), opts.write_timeout, shutdown.clone()).await?;
        let cmd_channel = CommandServer::start(
            opts.cmd_addr(),
            Arc::new(Dispatcher { commands: tx }),
            opts.write_timeout,
            shutdown.clone(),
        )
        .await?;
        Ok(Self {
            commands,
            cmd_channel,
            evt_channel,
            shutdown,
            retries: opts.retries,
        })
    }

    pub fn cmd_addr(&self) -> SocketAddr {
        self.cmd_channel.local_addr()
    }

    pub fn evt_addr(&self) -> SocketAddr {
        self.evt_channel.local_addr()
    }

    /// Resolves once a controller is connected to both channels.
    pub async fn wait_for_connections(&self) {
        self.cmd_channel.wait_for_connection().await;
        self.evt_channel.wait_for_connection().await;
    }

    /// Next decoded command, or `None` once the server is stopped.
    pub async fn next_command(&mut self) -> Option<command::Message> {
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            cmd = self.commands.recv() => cmd,
        }
    }

    pub async fn publish(&self, event: &event::Message) -> Result<(), Error> {
        debug!(name = event.name(), "publishing event");
        self.evt_channel.publish(event.encode()?, self.retries).await
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
