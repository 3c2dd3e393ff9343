use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the sensor receives its commands.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Commands arrive over the command channel and events are published on
    /// the event channel. A remote controller drives the whole lifecycle.
    #[default]
    #[serde(rename = "controlled")]
    Controlled,

    /// A single start command is read from the command file and events are
    /// appended to the event file. The run ends when the target exits.
    #[serde(rename = "standalone")]
    Standalone,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Sensor {
    /// Execution mode, see [`Mode`].
    pub mode: Mode,

    /// Mount point the file-access watcher is scoped to. Also the root of the
    /// baseline walk used when new paths are excluded from the report.
    pub mount_point: PathBuf,

    /// Directory receiving the report and any redirected target output.
    /// Events for paths under it are never recorded.
    pub artifacts_dir: PathBuf,

    /// File name of the report written into the artifacts directory.
    pub report_file: String,

    /// Start command consumed in standalone mode.
    pub command_file: PathBuf,

    /// Event log appended to in standalone mode, one JSON object per line.
    pub event_file: PathBuf,
}

impl Default for Sensor {
    fn default() -> Self {
        Self {
            mode: Mode::Controlled,
            mount_point: PathBuf::from("/"),
            artifacts_dir: PathBuf::from("/opt/_slim/artifacts"),
            report_file: "creport.json".into(),
            command_file: PathBuf::from("/opt/_slim/commands.json"),
            event_file: PathBuf::from("/opt/_slim/events.json"),
        }
    }
}

impl Sensor {
    pub fn report_path(&self) -> PathBuf {
        self.artifacts_dir.join(&self.report_file)
    }
}
