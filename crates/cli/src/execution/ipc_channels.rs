use super::Execution;
use crate::error::Error;
use config::Transport;
use ipc::command;
use ipc::{Server, event};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Commands and events over the controller's IPC channels.
#[derive(Debug)]
pub struct IpcExecution {
    server: Server,
}

impl IpcExecution {
    pub async fn start(opts: &Transport, shutdown: CancellationToken) -> Result<Self, Error> {
        let server = Server::start(opts, shutdown).await?;
        info!(cmd = %server.cmd_addr(), evt = %server.evt_addr(), "waiting for a controller");
        Ok(Self { server })
    }

    pub fn cmd_addr(&self) -> SocketAddr {
        self.server.cmd_addr()
    }

    pub fn evt_addr(&self) -> SocketAddr {
        self.server.evt_addr()
    }

    /// Resolves once a controller holds both channels.
    pub async fn wait_for_controller(&self) {
        self.server.wait_for_connections().await;
    }
}

#[async_trait::async_trait]
impl Execution for IpcExecution {
    async fn next_command(&mut self) -> Option<command::Message> {
        self.server.next_command().await
    }

    async fn publish(&mut self, event: &event::Message) -> Result<(), Error> {
        Ok(self.server.publish(event).await?)
    }

    fn close(&mut self) {
        self.server.stop();
    }
}
