use crate::channel::{CommandClient, EventClient};
use crate::command::{self, Response};
use crate::error::Error;
use crate::event;
use config::Transport;
use std::net::SocketAddr;

/// Controller end of the transport.
#[derive(Debug)]
pub struct Client {
    commands: CommandClient,
    events: EventClient,
    retries: u32,
}

impl Client {
    pub async fn connect(opts: &Transport) -> Result<Self, Error> {
        Self::connect_to(opts.cmd_addr(), opts.evt_addr(), opts).await
    }

    /// The event channel is dialed first so no event published in reply to
    /// the first command can be missed.
    pub async fn connect_to(
        cmd_addr: SocketAddr,
        evt_addr: SocketAddr,
        opts: &Transport,
    ) -> Result<Self, Error> {
        let events = EventClient::connect(evt_addr, opts).await?;
        let commands = CommandClient::connect(cmd_addr, opts).await?;
        Ok(Self {
            commands,
            events,
            retries: opts.retries,
        })
    }

    pub async fn send_command(&mut self, cmd: &command::Message) -> Result<Response, Error> {
        let body = self
            .commands
            .call(cmd.encode()?, self.retries)
            .await?
            .ok_or(Error::NoData)?;
        Ok(serde_json::from_str(body.get())?)
    }

    pub async fn get_event(&mut self) -> Result<event::Message, Error> {
        let (body, _tid) = self.events.next(self.retries).await?;
        event::Message::decode(&body)
    }
}
