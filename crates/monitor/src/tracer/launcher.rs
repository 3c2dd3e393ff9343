use crate::error::Error;
use nix::sys::prctl;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::unistd::{Gid, Group, Pid, Uid, User};
use std::fs::File;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

/// What to run and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Launch {
    pub app_name: String,
    pub app_args: Vec<String>,
    /// `user`, `user:group`, or numeric ids. Runs as the sensor's own user
    /// when unset.
    pub user: Option<String>,
    /// Run under ptrace. When false the target is only supervised.
    pub traced: bool,
    /// Report as soon as the target itself exits, leaving its remaining
    /// children traced until they exit too.
    pub report_on_target_exit: bool,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

/// Spawn the target in its own process group. A traced target stops with
/// SIGTRAP right after exec.
pub(crate) fn spawn(launch: &Launch) -> Result<Pid, Error> {
    if launch.app_name.is_empty() {
        return Err(Error::InvalidCommand("empty application name".into()));
    }
    let launch_err = |source| Error::Launch {
        app: launch.app_name.clone(),
        source,
    };

    let mut command = Command::new(&launch.app_name);
    command.args(&launch.app_args).process_group(0);

    if let Some(spec) = &launch.user {
        let (uid, gid) = resolve_user(spec)?;
        debug!(user = spec, uid = uid.as_raw(), gid = gid.as_raw(), "running target as user");
        command.uid(uid.as_raw()).gid(gid.as_raw());
    }
    if let Some(path) = &launch.stdout {
        command.stdout(File::create(path).map_err(launch_err)?);
    }
    if let Some(path) = &launch.stderr {
        command.stderr(File::create(path).map_err(launch_err)?);
    }

    let traced = launch.traced;
    // SAFETY: the hook runs between fork and exec and only issues the
    // async-signal-safe prctl and ptrace system calls.
    #[allow(unsafe_code)]
    unsafe {
        command.pre_exec(move || {
            prctl::set_pdeathsig(Signal::SIGKILL)?;
            if traced {
                ptrace::traceme()?;
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(launch_err)?;
    let pid = Pid::from_raw(child.id() as i32);
    info!(pid = pid.as_raw(), app = %launch.app_name, traced, "target launched");
    Ok(pid)
}

/// Resolve `user[:group]` to ids. Without a group the user's primary group
/// is used.
pub(crate) fn resolve_user(spec: &str) -> Result<(Uid, Gid), Error> {
    let unknown = || Error::UnknownUser(spec.to_owned());
    let (user, group) = match spec.split_once(':') {
        Some((user, group)) => (user, Some(group)),
        None => (spec, None),
    };

    let (uid, primary) = match user.parse::<u32>() {
        Ok(raw) => {
            let uid = Uid::from_raw(raw);
            let primary = User::from_uid(uid).ok().flatten().map(|u| u.gid);
            (uid, primary)
        }
        Err(_) => {
            let found = User::from_name(user).ok().flatten().ok_or_else(unknown)?;
            (found.uid, Some(found.gid))
        }
    };

    let gid = match group {
        Some(group) => match group.parse::<u32>() {
            Ok(raw) => Gid::from_raw(raw),
            Err(_) => Group::from_name(group).ok().flatten().ok_or_else(unknown)?.gid,
        },
        // A bare numeric uid without a passwd entry keeps its number as gid.
        None => primary.unwrap_or_else(|| Gid::from_raw(uid.as_raw())),
    };
    Ok((uid, gid))
}
