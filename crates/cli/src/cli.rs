use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use config::{Config, Mode};
use std::path::{Path, PathBuf};

/// sensor: in-container dynamic analysis sensor
///
/// Runs a target application under a syscall tracer and a file-access
/// watcher and saves what it touched to a report in the artifacts
/// directory. A controlled sensor waits for a remote controller; a
/// standalone one runs the start command from its command file.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to configuration file.
    ///
    /// If not provided, the default locations are checked. They are
    /// `/etc/sensor/config.toml` and `/etc/sensor/config.d/*.toml`, where
    /// the latter being a glob pattern. If they don't exist, the default
    /// configuration is used.
    #[arg(short, long, value_parser = validate_file)]
    pub config: Option<PathBuf>,

    /// Execution mode: `controlled` or `standalone`.
    #[arg(short, long, value_parser = parse_mode)]
    pub mode: Option<Mode>,

    /// Start command file read in standalone mode.
    #[arg(long)]
    pub command_file: Option<PathBuf>,

    /// Event log appended to in standalone mode.
    #[arg(long)]
    pub event_file: Option<PathBuf>,

    /// Directory receiving the report and redirected target output.
    #[arg(short, long)]
    pub artifacts_dir: Option<PathBuf>,

    /// Mount point watched for file access.
    #[arg(long)]
    pub mount_point: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Replaces the image cmd of the start command (standalone mode).
    #[arg(last = true)]
    pub cmd: Vec<String>,
}

impl Cli {
    /// Command-line settings win over the configuration files.
    pub fn apply(&self, config: &mut Config) {
        let sensor = &mut config.sensor;
        if let Some(mode) = self.mode {
            sensor.mode = mode;
        }
        if let Some(path) = &self.command_file {
            sensor.command_file.clone_from(path);
        }
        if let Some(path) = &self.event_file {
            sensor.event_file.clone_from(path);
        }
        if let Some(path) = &self.artifacts_dir {
            sensor.artifacts_dir.clone_from(path);
        }
        if let Some(path) = &self.mount_point {
            sensor.mount_point.clone_from(path);
        }
    }
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

fn parse_mode(mode: &str) -> Result<Mode, String> {
    match mode {
        "controlled" => Ok(Mode::Controlled),
        "standalone" => Ok(Mode::Standalone),
        _ => Err(format!("`{mode}` is not a sensor mode")),
    }
}
