//! Everything the sensor leaves behind in the artifacts directory.

use crate::error::Error;
use glob::{MatchOptions, Pattern};
use ipc::command::StartMonitor;
use monitor::MonitorReports;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::Metadata;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

const PSEUDO_FS: [&str; 3] = ["/proc", "/sys", "/dev"];

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SensorInfo {
    pub version: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemInfo {
    pub arch: String,
}

/// The start command as the controller sent it, after normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartCommandReport {
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub app_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub app_entrypoint: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub app_cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_user: String,
}

impl From<&StartMonitor> for StartCommandReport {
    fn from(command: &StartMonitor) -> Self {
        Self {
            app_name: command.app_name.clone(),
            app_args: command.app_args.clone(),
            app_entrypoint: command.app_entrypoint.clone(),
            app_cmd: command.app_cmd.clone(),
            app_user: command.app_user.clone(),
        }
    }
}

/// How the target touched a file, as seen by the file-access watcher.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessFlags {
    #[serde(rename = "R")]
    pub read: bool,
    #[serde(rename = "W")]
    pub write: bool,
    #[serde(rename = "X")]
    pub exec: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactProps {
    pub file_path: String,
    pub file_type: String,
    /// Permission bits, see `mode_text` for the readable form.
    pub mode: u32,
    pub mode_text: String,
    pub file_size: u64,
    pub flags: AccessFlags,
}

/// `creport.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerReport {
    pub sensor: SensorInfo,
    pub system: SystemInfo,
    pub start_command: StartCommandReport,
    pub monitors: MonitorReports,
    pub image_files: Vec<ArtifactProps>,
}

#[derive(Debug, Clone)]
pub struct Artifactor {
    mount_point: PathBuf,
    artifacts_dir: PathBuf,
    report_path: PathBuf,
    args: Vec<String>,
}

impl Artifactor {
    /// `args` are the sensor's own command-line arguments, kept for the report.
    pub fn new(sensor: &config::Sensor, args: Vec<String>) -> Self {
        Self {
            mount_point: sensor.mount_point.clone(),
            artifacts_dir: sensor.artifacts_dir.clone(),
            report_path: sensor.report_path(),
            args,
        }
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn prepare(&self) -> Result<(), Error> {
        debug!(dir = ?self.artifacts_dir, "preparing artifacts dir");
        std::fs::create_dir_all(&self.artifacts_dir)?;
        Ok(())
    }

    /// Regular files and symlinks under the mount point right now.
    ///
    /// Pseudo filesystems, the artifacts dir and excluded subtrees are not
    /// entered. Unreadable entries are skipped.
    pub fn current_paths(&self, excludes: &[String]) -> Result<HashSet<String>, Error> {
        let excludes = compile(excludes)?;
        let mut paths = HashSet::new();
        let mut pending = vec![self.mount_point.clone()];
        while let Some(dir) = pending.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    trace!(?dir, %err, "skipping unreadable dir");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if self.is_skipped(&path) || is_excluded(&excludes, &path) {
                    continue;
                }
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() || file_type.is_symlink() {
                    paths.insert(path.to_string_lossy().into_owned());
                }
            }
        }
        debug!(count = paths.len(), root = ?self.mount_point, "baseline paths collected");
        Ok(paths)
    }

    /// Merge what the monitors saw into `creport.json`.
    ///
    /// With a `baseline`, paths created during the run are left out. Paths
    /// that no longer exist are skipped.
    pub fn write_report(
        &self,
        command: &StartMonitor,
        reports: &MonitorReports,
        baseline: Option<&HashSet<String>>,
    ) -> Result<ContainerReport, Error> {
        let excludes = compile(&command.excludes)?;
        let mut candidates: BTreeMap<String, AccessFlags> = BTreeMap::new();

        for (path, info) in reports.file_access.files() {
            let flags = candidates.entry(path.to_owned()).or_default();
            flags.read |= info.read_count > 0;
            flags.write |= info.write_count > 0;
            flags.exec |= info.exe_count > 0;
        }
        for (path, activity) in &reports.syscalls.fs_activity {
            if !activity.is_subdir && activity.ops_all > activity.ops_checkfile {
                candidates.entry(path.clone()).or_default();
            }
        }
        for path in command.includes.keys() {
            candidates.entry(path.clone()).or_default();
        }

        let mut image_files = Vec::with_capacity(candidates.len());
        for (path, flags) in candidates {
            let as_path = Path::new(&path);
            if self.is_skipped(as_path) || is_excluded(&excludes, as_path) {
                continue;
            }
            if baseline.is_some_and(|baseline| !baseline.contains(&path))
                && !command.includes.contains_key(&path)
            {
                trace!(%path, "skipping path created during the run");
                continue;
            }
            let Ok(metadata) = std::fs::symlink_metadata(as_path) else {
                debug!(%path, "skipping path that no longer exists");
                continue;
            };
            image_files.push(props(path, &metadata, flags));
        }

        let report = ContainerReport {
            sensor: SensorInfo {
                version: env!("CARGO_PKG_VERSION").to_owned(),
                args: self.args.clone(),
            },
            system: SystemInfo {
                arch: monitor::arch::ARCH_NAME.to_owned(),
            },
            start_command: command.into(),
            monitors: reports.clone(),
            image_files,
        };

        std::fs::create_dir_all(&self.artifacts_dir)?;
        std::fs::write(&self.report_path, serde_json::to_vec_pretty(&report)?)?;
        info!(path = ?self.report_path, files = report.image_files.len(), "report saved");
        Ok(report)
    }

    fn is_skipped(&self, path: &Path) -> bool {
        path.starts_with(&self.artifacts_dir) || PSEUDO_FS.iter().any(|fs| path.starts_with(fs))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, Error> {
    patterns
        .iter()
        .map(|pattern| Pattern::new(pattern).map_err(Error::from))
        .collect()
}

fn is_excluded(excludes: &[Pattern], path: &Path) -> bool {
    excludes
        .iter()
        .any(|pattern| pattern.matches_path_with(path, MATCH))
}

fn props(file_path: String, metadata: &Metadata, flags: AccessFlags) -> ArtifactProps {
    let file_type = metadata.file_type();
    let kind = if file_type.is_file() {
        "file"
    } else if file_type.is_dir() {
        "dir"
    } else if file_type.is_symlink() {
        "symlink"
    } else if file_type.is_fifo() || file_type.is_socket() {
        "special"
    } else {
        "other"
    };
    let mode = metadata.permissions().mode() & 0o7777;
    ArtifactProps {
        file_path,
        file_type: kind.to_owned(),
        mode,
        mode_text: mode_text(kind, mode),
        file_size: metadata.len(),
        flags,
    }
}

fn mode_text(kind: &str, mode: u32) -> String {
    let mut text = String::with_capacity(10);
    text.push(match kind {
        "dir" => 'd',
        "symlink" => 'L',
        "special" => 'p',
        _ => '-',
    });
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        text.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        text.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        text.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    text
}
