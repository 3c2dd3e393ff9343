//! Commands sent by the controller to the sensor.

use crate::envelope::{self, Envelope};
use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use std::collections::BTreeMap;

pub const START_MONITOR: &str = "cmd.monitor.start";
pub const STOP_MONITOR: &str = "cmd.monitor.stop";
pub const SHUTDOWN_SENSOR: &str = "cmd.sensor.shutdown";

/// Everything the sensor needs to launch and observe the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartMonitor {
    /// Executable of the target. Mutually exclusive with the
    /// entrypoint/cmd pair.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub app_args: Vec<String>,
    /// Image entrypoint, resolved into `app_name`/`app_args` by the sensor.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub app_entrypoint: Vec<String>,
    /// Image cmd, appended to the entrypoint or run on its own.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub app_cmd: Vec<String>,
    /// `user`, `user:group` or numeric ids. Only applied with `run_tas_user`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_user: String,
    pub run_tas_user: bool,
    /// Trace syscalls of the target. Without it the target only runs under
    /// the file-access watcher.
    pub rta_source_ptrace: bool,
    pub app_stdout_to_file: bool,
    pub app_stderr_to_file: bool,
    /// Glob patterns of paths left out of the report.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,
    /// Paths always listed in the report, accessed or not. Keyed by path;
    /// a plain list of paths is accepted too.
    #[serde(
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "paths_or_map"
    )]
    pub includes: BTreeMap<String, Option<AccessInfo>>,
    /// Record paths created after the run started. Absent means `false`.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub include_new: bool,
    /// End the run as soon as the main target process exits, even if its
    /// children are still running.
    pub report_on_main_pid_exit: bool,
}

/// Ownership and mode override attached to an included path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessInfo {
    #[serde(rename = "Flags")]
    pub flags: u32,
    #[serde(rename = "PermsOnly")]
    pub perms_only: bool,
    #[serde(rename = "UID")]
    pub uid: i64,
    #[serde(rename = "GID")]
    pub gid: i64,
}

fn paths_or_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Option<AccessInfo>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Includes {
        Map(BTreeMap<String, Option<AccessInfo>>),
        Paths(Vec<String>),
    }

    Ok(match Option::<Includes>::deserialize(deserializer)? {
        None => BTreeMap::new(),
        Some(Includes::Map(map)) => map,
        Some(Includes::Paths(paths)) => paths.into_iter().map(|path| (path, None)).collect(),
    })
}

impl Default for StartMonitor {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            app_args: Vec::new(),
            app_entrypoint: Vec::new(),
            app_cmd: Vec::new(),
            app_user: String::new(),
            run_tas_user: false,
            rta_source_ptrace: true,
            app_stdout_to_file: false,
            app_stderr_to_file: false,
            excludes: Vec::new(),
            includes: BTreeMap::new(),
            include_new: false,
            report_on_main_pid_exit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    StartMonitor(StartMonitor),
    StopMonitor,
    ShutdownSensor,
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartMonitor(_) => START_MONITOR,
            Self::StopMonitor => STOP_MONITOR,
            Self::ShutdownSensor => SHUTDOWN_SENSOR,
        }
    }

    pub fn encode(&self) -> Result<Box<RawValue>, Error> {
        match self {
            Self::StartMonitor(data) => envelope::encode(self.name(), Some(data)),
            Self::StopMonitor | Self::ShutdownSensor => envelope::encode::<()>(self.name(), None),
        }
    }

    pub fn decode(raw: &RawValue) -> Result<Self, Error> {
        let envelope = Envelope::parse(raw)?;
        match envelope.name.as_str() {
            START_MONITOR => Ok(Self::StartMonitor(envelope.data()?)),
            STOP_MONITOR => Ok(Self::StopMonitor),
            SHUTDOWN_SENSOR => Ok(Self::ShutdownSensor),
            _ => Err(Error::UnknownMessage(envelope.name)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "error")]
    Error,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
}
