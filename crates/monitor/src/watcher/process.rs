use crate::report::ProcessInfo;
use procfs::process::Process;
use tracing::trace;

/// Identity of a live process. `None` when any of its links cannot be
/// read, which usually means it already exited.
pub(crate) fn process_info(pid: i32) -> Option<ProcessInfo> {
    let process = Process::new(pid).ok()?;
    let path = process.exe().ok()?;
    let cwd = process.cwd().ok()?;
    let root = process.root().ok()?;
    let cmd = process.cmdline().ok()?.join(" ");

    let (name, parent_pid) = match process.stat() {
        Ok(stat) => (stat.comm, stat.ppid),
        Err(err) => {
            trace!(pid, ?err, "process status unreadable");
            ("unknown".to_owned(), -1)
        }
    };

    Some(ProcessInfo {
        pid,
        name,
        path: path.to_string_lossy().into_owned(),
        cmd,
        cwd: cwd.to_string_lossy().into_owned(),
        root: root.to_string_lossy().into_owned(),
        parent_pid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_resolves() {
        let pid = std::process::id() as i32;
        let info = process_info(pid).unwrap();
        assert_eq!(info.pid, pid);
        assert_eq!(info.parent_pid, nix::unistd::getppid().as_raw());
        assert_eq!(info.root, "/");
        assert!(!info.name.is_empty());
        assert!(info.path.starts_with('/'));
    }

    #[test]
    fn missing_process_is_none() {
        assert!(process_info(i32::MAX).is_none());
    }
}
