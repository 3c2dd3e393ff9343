//! Events published by the sensor on the event channel.

use crate::envelope::{self, Envelope};
use crate::error::Error;
use serde_json::value::RawValue;

pub const START_MONITOR_DONE: &str = "event.monitor.start.done";
pub const STOP_MONITOR_DONE: &str = "event.monitor.stop.done";
pub const SHUTDOWN_SENSOR_DONE: &str = "event.sensor.shutdown.done";
pub const ERROR: &str = "event.error";

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    StartMonitorDone,
    StopMonitorDone,
    ShutdownSensorDone,
    /// Diagnostic payload, usually a string.
    Error(serde_json::Value),
}

impl Message {
    pub fn error(text: impl Into<String>) -> Self {
        Self::Error(serde_json::Value::String(text.into()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StartMonitorDone => START_MONITOR_DONE,
            Self::StopMonitorDone => STOP_MONITOR_DONE,
            Self::ShutdownSensorDone => SHUTDOWN_SENSOR_DONE,
            Self::Error(_) => ERROR,
        }
    }

    pub fn encode(&self) -> Result<Box<RawValue>, Error> {
        match self {
            Self::Error(data) => envelope::encode(self.name(), Some(data)),
            _ => envelope::encode::<()>(self.name(), None),
        }
    }

    pub fn decode(raw: &RawValue) -> Result<Self, Error> {
        let envelope = Envelope::parse(raw)?;
        match envelope.name.as_str() {
            START_MONITOR_DONE => Ok(Self::StartMonitorDone),
            STOP_MONITOR_DONE => Ok(Self::StopMonitorDone),
            SHUTDOWN_SENSOR_DONE => Ok(Self::ShutdownSensorDone),
            ERROR => Ok(Self::Error(envelope.data()?)),
            _ => Err(Error::UnknownMessage(envelope.name)),
        }
    }
}
