use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const CMD_PORT: u16 = 65501;
pub const EVT_PORT: u16 = 65502;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Transport {
    /// Address both channels listen on (sensor) or dial (controller).
    pub host: IpAddr,

    /// Port of the request/response channel.
    pub cmd_port: u16,

    /// Port of the event channel.
    pub evt_port: u16,

    /// **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub connect_timeout: Duration,

    /// **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub read_timeout: Duration,

    /// **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub write_timeout: Duration,

    /// How long a client keeps redialing a channel that refuses
    /// connections. **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub connect_wait: Duration,

    /// Extra attempts after a timed-out read or write.
    pub retries: u32,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            cmd_port: CMD_PORT,
            evt_port: EVT_PORT,
            connect_timeout: Duration::from_secs(11),
            read_timeout: Duration::from_secs(11),
            write_timeout: Duration::from_secs(11),
            connect_wait: Duration::from_secs(60),
            retries: 3,
        }
    }
}

impl Transport {
    pub fn cmd_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.cmd_port)
    }

    pub fn evt_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.evt_port)
    }
}
