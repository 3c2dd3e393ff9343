//! Syscalls whose path argument is worth recording.

use crate::arch::RegisterView;
use nix::sys::ptrace;
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use syscalls::Sysno;
use tracing::debug;

const PATH_MAX: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    /// Looks at a path without opening it (stat, access, chdir, ...).
    CheckFile,
    OpenFile,
    Exec,
}

impl CallKind {
    pub fn succeeded(self, ret: i64) -> bool {
        match self {
            CallKind::CheckFile => ret == 0,
            CallKind::OpenFile | CallKind::Exec => ret >= 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PathArg {
    /// Absolute or cwd-relative path in the first argument.
    First,
    /// Path in the second argument, relative to the directory fd in the first.
    AtDir,
}

const PATH_CALLS: &[(&str, CallKind, PathArg)] = &[
    ("readlink", CallKind::OpenFile, PathArg::First),
    ("utime", CallKind::CheckFile, PathArg::First),
    ("utimes", CallKind::CheckFile, PathArg::First),
    ("chdir", CallKind::CheckFile, PathArg::First),
    ("open", CallKind::OpenFile, PathArg::First),
    ("readlinkat", CallKind::OpenFile, PathArg::AtDir),
    ("openat", CallKind::OpenFile, PathArg::AtDir),
    ("openat2", CallKind::OpenFile, PathArg::AtDir),
    ("futimesat", CallKind::CheckFile, PathArg::AtDir),
    ("access", CallKind::CheckFile, PathArg::First),
    ("faccessat", CallKind::CheckFile, PathArg::AtDir),
    ("faccessat2", CallKind::CheckFile, PathArg::AtDir),
    ("stat", CallKind::CheckFile, PathArg::First),
    ("lstat", CallKind::CheckFile, PathArg::First),
    ("statfs", CallKind::CheckFile, PathArg::First),
    ("statx", CallKind::CheckFile, PathArg::AtDir),
    ("newfstatat", CallKind::CheckFile, PathArg::AtDir),
    ("execve", CallKind::Exec, PathArg::First),
    ("execveat", CallKind::Exec, PathArg::AtDir),
];

#[derive(Debug, Clone, Copy)]
struct PathCall {
    kind: CallKind,
    arg: PathArg,
}

/// Path-bearing syscalls of the running architecture, by number.
#[derive(Debug)]
pub(crate) struct PathCalls(HashMap<u64, PathCall>);

impl PathCalls {
    pub fn for_current_arch() -> Self {
        let mut calls = HashMap::with_capacity(PATH_CALLS.len());
        for (name, kind, arg) in PATH_CALLS {
            match Sysno::from_str(name) {
                Ok(sysno) => {
                    calls.insert(sysno.id() as u64, PathCall { kind: *kind, arg: *arg });
                }
                // Legacy calls such as `open` do not exist on every arch.
                Err(_) => debug!(name, "syscall not available on this architecture"),
            }
        }
        Self(calls)
    }

    /// Read the path argument of a syscall-entry stop, if the call has one.
    pub fn read_path(
        &self,
        pid: Pid,
        number: u64,
        regs: &impl RegisterView,
    ) -> Option<(CallKind, String)> {
        let call = self.0.get(&number)?;
        let (dirfd, addr) = match call.arg {
            PathArg::First => (libc::AT_FDCWD, regs.arg(0)),
            PathArg::AtDir => (regs.arg(0) as i32, regs.arg(1)),
        };
        let raw = read_c_string(pid, addr)?;
        let path = Path::new(&raw);
        let full = if path.is_absolute() {
            clean(path)
        } else {
            clean(&dir_of(pid, dirfd)?.join(path))
        };
        Some((call.kind, full.to_string_lossy().into_owned()))
    }
}

fn dir_of(pid: Pid, dirfd: i32) -> Option<PathBuf> {
    let link = if dirfd == libc::AT_FDCWD {
        format!("/proc/{pid}/cwd")
    } else {
        format!("/proc/{pid}/fd/{dirfd}")
    };
    std::fs::read_link(link).ok()
}

/// NUL-terminated string from tracee memory, one word at a time.
fn read_c_string(pid: Pid, addr: u64) -> Option<String> {
    if addr == 0 {
        return None;
    }
    let word = std::mem::size_of::<libc::c_long>() as u64;
    let mut bytes = Vec::new();
    let mut at = addr;
    while bytes.len() < PATH_MAX {
        let value = ptrace::read(pid, at as ptrace::AddressType).ok()?;
        for byte in value.to_ne_bytes() {
            if byte == 0 {
                return String::from_utf8(bytes).ok();
            }
            bytes.push(byte);
        }
        at += word;
    }
    None
}

/// Lexically normalize an absolute path: drop `.`, resolve `..`.
pub(crate) fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Pseudo filesystems never end up in a report.
pub(crate) fn is_ignored(path: &str) -> bool {
    path == "."
        || path == "/proc"
        || path.starts_with("/proc/")
        || path.starts_with("/sys/")
        || path.starts_with("/dev/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_resolves_dots() {
        assert_eq!(clean(Path::new("/usr/./lib/../bin/cat")), Path::new("/usr/bin/cat"));
        assert_eq!(clean(Path::new("/../etc//hosts")), Path::new("/etc/hosts"));
        assert_eq!(clean(Path::new("/")), Path::new("/"));
    }

    #[test]
    fn success_depends_on_kind() {
        assert!(CallKind::CheckFile.succeeded(0));
        assert!(!CallKind::CheckFile.succeeded(3));
        assert!(CallKind::OpenFile.succeeded(3));
        assert!(!CallKind::OpenFile.succeeded(-2));
        assert!(!CallKind::Exec.succeeded(-13));
    }

    #[test]
    fn pseudo_filesystems_are_ignored() {
        assert!(is_ignored("/proc"));
        assert!(is_ignored("/proc/self/maps"));
        assert!(is_ignored("/dev/null"));
        assert!(is_ignored("/sys/fs/cgroup"));
        assert!(!is_ignored("/process"));
        assert!(!is_ignored("/etc/release"));
    }

    #[test]
    fn table_resolves_on_this_arch() {
        let calls = PathCalls::for_current_arch();
        let openat = Sysno::openat.id() as u64;
        let execve = Sysno::execve.id() as u64;
        assert!(matches!(calls.0.get(&openat), Some(c) if c.kind == CallKind::OpenFile));
        assert!(matches!(calls.0.get(&execve), Some(c) if c.kind == CallKind::Exec));
    }
}
