//! Reports produced by the monitors.
//!
//! Each report is built by exactly one collector task and published behind
//! an `Arc` once its monitor is done.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallStatInfo {
    #[serde(rename = "num")]
    pub number: u32,
    pub name: String,
    pub count: u64,
}

/// How a traced path-bearing syscall touched a path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsActivityInfo {
    pub ops_all: u64,
    pub ops_checkfile: u64,
    pub syscalls: BTreeSet<u32>,
    pub pids: BTreeSet<i32>,
    /// Set when another recorded path lives below this one.
    pub is_subdir: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallReport {
    pub enabled: bool,
    pub arch_name: String,
    pub syscall_count: u64,
    pub syscall_num: u32,
    /// Keyed by the decimal syscall number.
    pub syscall_stats: BTreeMap<String, SyscallStatInfo>,
    pub fs_activity: BTreeMap<String, FsActivityInfo>,
}

impl SyscallReport {
    pub fn new(enabled: bool, arch_name: &str) -> Self {
        Self {
            enabled,
            arch_name: arch_name.to_owned(),
            ..Default::default()
        }
    }

    /// Close one syscall observation.
    pub fn record_syscall(&mut self, number: u32) {
        self.syscall_count += 1;
        let stat = self
            .syscall_stats
            .entry(number.to_string())
            .or_insert_with(|| SyscallStatInfo {
                number,
                name: syscall_name(number),
                count: 0,
            });
        stat.count += 1;
        self.syscall_num = self.syscall_stats.len() as u32;
    }

    pub fn record_fs_activity(&mut self, path: &str, number: u32, pid: i32, check_file: bool) {
        let fsa = self.fs_activity.entry(path.to_owned()).or_default();
        fsa.ops_all += 1;
        if check_file {
            fsa.ops_checkfile += 1;
        }
        fsa.syscalls.insert(number);
        fsa.pids.insert(pid);
    }

    /// Drop intermediate directories: entries that only exist because a
    /// deeper path was touched through them.
    pub fn prune_parent_dirs(&mut self) {
        let paths: Vec<String> = self.fs_activity.keys().cloned().collect();
        for (path, fsa) in self.fs_activity.iter_mut() {
            let parent = Path::new(path);
            fsa.is_subdir = paths
                .iter()
                .any(|other| other != path && Path::new(other).starts_with(parent));
        }
        self.fs_activity.retain(|_, fsa| !fsa.is_subdir);
    }

    pub fn counts_are_consistent(&self) -> bool {
        self.syscall_stats.values().map(|s| s.count).sum::<u64>() == self.syscall_count
    }
}

fn syscall_name(number: u32) -> String {
    syscalls::Sysno::new(number as usize)
        .map(|sysno| sysno.name().to_owned())
        .unwrap_or_else(|| format!("unknown_{number}"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: i32,
    pub name: String,
    pub path: String,
    pub cmd: String,
    pub cwd: String,
    pub root: String,
    #[serde(rename = "ppid")]
    pub parent_pid: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub event_count: u32,
    #[serde(rename = "first_eid")]
    pub first_event_id: u32,
    /// Accessed path, repeated from the map key. Kept out of the JSON.
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "reads", default, skip_serializing_if = "is_zero")]
    pub read_count: u32,
    #[serde(rename = "writes", default, skip_serializing_if = "is_zero")]
    pub write_count: u32,
    #[serde(rename = "execs", default, skip_serializing_if = "is_zero")]
    pub exe_count: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAccessReport {
    pub monitor_pid: i32,
    #[serde(rename = "monitor_ppid")]
    pub monitor_parent_pid: i32,
    pub event_count: u32,
    pub main_process: Option<ProcessInfo>,
    /// Keyed by pid.
    pub processes: BTreeMap<String, ProcessInfo>,
    /// Pid, then file path.
    pub process_files: BTreeMap<String, BTreeMap<String, FileInfo>>,
}

impl FileAccessReport {
    /// Every file path any process touched.
    pub fn files(&self) -> impl Iterator<Item = (&str, &FileInfo)> {
        self.process_files
            .values()
            .flat_map(|files| files.iter().map(|(path, info)| (path.as_str(), info)))
    }
}

/// Both sub-reports of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorReports {
    #[serde(rename = "fan")]
    pub file_access: FileAccessReport,
    #[serde(rename = "pt")]
    pub syscalls: SyscallReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn stats_are_keyed_by_number_and_named() {
        let mut report = SyscallReport::new(true, "amd64");
        let read = syscalls::Sysno::read.id() as u32;
        report.record_syscall(read);
        report.record_syscall(read);

        let stat = &report.syscall_stats[&read.to_string()];
        assert_eq!(stat.name, "read");
        assert_eq!(stat.count, 2);
        assert_eq!(report.syscall_num, 1);
        assert_eq!(report.syscall_count, 2);
    }

    #[test]
    fn intermediate_directories_are_pruned() {
        let mut report = SyscallReport::new(true, "amd64");
        report.record_fs_activity("/etc", 4, 1, true);
        report.record_fs_activity("/etc/ssl/certs", 257, 1, false);
        report.record_fs_activity("/etcetera", 4, 1, true);
        report.prune_parent_dirs();

        let paths: Vec<&str> = report.fs_activity.keys().map(String::as_str).collect();
        assert_eq!(paths, ["/etc/ssl/certs", "/etcetera"]);
    }

    #[test]
    fn fs_activity_accumulates() {
        let mut report = SyscallReport::new(true, "aarch64");
        report.record_fs_activity("/bin/cat", 59, 10, false);
        report.record_fs_activity("/bin/cat", 4, 11, true);
        let fsa = &report.fs_activity["/bin/cat"];
        assert_eq!(fsa.ops_all, 2);
        assert_eq!(fsa.ops_checkfile, 1);
        assert_eq!(fsa.pids, BTreeSet::from([10, 11]));
        assert_eq!(fsa.syscalls, BTreeSet::from([4, 59]));
    }

    #[test]
    fn file_info_omits_zero_counters() {
        let info = FileInfo {
            event_count: 1,
            first_event_id: 1,
            name: "/etc/hosts".into(),
            read_count: 1,
            ..Default::default()
        };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"event_count":1,"first_eid":1,"reads":1}"#);
    }

    proptest! {
        #[test]
        fn per_number_counts_sum_to_total(numbers in proptest::collection::vec(0u32..500, 0..400)) {
            let mut report = SyscallReport::new(true, "amd64");
            for number in &numbers {
                report.record_syscall(*number);
            }
            prop_assert!(report.counts_are_consistent());
            prop_assert_eq!(report.syscall_count, numbers.len() as u64);
            let distinct: BTreeSet<u32> = numbers.iter().copied().collect();
            prop_assert_eq!(report.syscall_num as usize, distinct.len());
        }
    }
}
