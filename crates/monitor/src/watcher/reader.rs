use crate::error::Error;
use nix::errno::Errno;
use nix::sys::fanotify::{EventFFlags, Fanotify, InitFlags, MarkFlags, MaskFlags};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

const IDLE_POLL: Duration = Duration::from_millis(100);

/// One decoded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AccessEvent {
    pub id: u32,
    pub pid: i32,
    pub path: String,
    pub is_read: bool,
    pub is_write: bool,
}

/// Events the reader drops before they are numbered.
#[derive(Debug, Clone)]
pub(crate) struct Ignore {
    pub own_pid: i32,
    pub prefixes: Vec<PathBuf>,
}

impl Ignore {
    pub fn matches(&self, pid: i32, path: &str) -> bool {
        pid == self.own_pid
            || pid <= 0
            || self
                .prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.to_string_lossy().as_ref()))
    }
}

/// Open a notification group and mark the whole mount holding `mount_point`.
pub(crate) fn open(mount_point: &Path) -> Result<Fanotify, Error> {
    let fan = Fanotify::init(
        InitFlags::FAN_CLOEXEC | InitFlags::FAN_CLASS_NOTIF | InitFlags::FAN_NONBLOCK,
        EventFFlags::O_RDONLY | EventFFlags::O_CLOEXEC | EventFFlags::O_LARGEFILE,
    )
    .map_err(|err| Error::from_kernel(err, Error::Fanotify))?;

    let mount = std::fs::File::open(mount_point)?;
    fan.mark(
        MarkFlags::FAN_MARK_ADD | MarkFlags::FAN_MARK_MOUNT,
        MaskFlags::FAN_OPEN | MaskFlags::FAN_ACCESS | MaskFlags::FAN_MODIFY,
        &mount,
        None::<&Path>,
    )
    .map_err(|err| Error::from_kernel(err, Error::Fanotify))?;
    debug!(mount_point = %mount_point.display(), "fanotify mark added");
    Ok(fan)
}

pub(crate) fn spawn(
    fan: Fanotify,
    ignore: Ignore,
    events: mpsc::Sender<Result<AccessEvent, Error>>,
    errors: mpsc::Sender<Error>,
    stop: CancellationToken,
) -> Result<JoinHandle<()>, Error> {
    std::thread::Builder::new()
        .name("fanotify-reader".into())
        .spawn(move || {
            if let Err(err) = read_loop(&fan, &ignore, &events, &errors, &stop) {
                warn!(%err, "fanotify reader failed");
                let _ = events.blocking_send(Err(err));
            }
            trace!("fanotify reader loop exited");
        })
        .map_err(|err| Error::Spawn("fanotify-reader", err))
}

fn read_loop(
    fan: &Fanotify,
    ignore: &Ignore,
    events: &mpsc::Sender<Result<AccessEvent, Error>>,
    errors: &mpsc::Sender<Error>,
    stop: &CancellationToken,
) -> Result<(), Error> {
    let mut next_id = 0u32;
    loop {
        if stop.is_cancelled() {
            return Ok(());
        }

        let batch = match fan.read_events() {
            Ok(batch) => batch,
            Err(Errno::EAGAIN) => {
                std::thread::sleep(IDLE_POLL);
                continue;
            }
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(Error::Fanotify(err)),
        };

        for event in &batch {
            let mask = event.mask();
            if mask.contains(MaskFlags::FAN_Q_OVERFLOW) {
                warn!("fanotify queue overflow, events were lost");
                let _ = errors.try_send(Error::non_critical("fanotify queue overflow"));
                continue;
            }
            let Some(fd) = event.fd() else {
                continue;
            };

            let path = std::fs::read_link(format!("/proc/self/fd/{}", fd.as_raw_fd()))
                .map_err(Error::ResolvePath)?;
            let path = path.to_string_lossy().into_owned();
            let pid = event.pid();
            if ignore.matches(pid, &path) {
                continue;
            }

            let is_read = mask.contains(MaskFlags::FAN_ACCESS);
            let is_write = mask.contains(MaskFlags::FAN_MODIFY);
            if !(is_read || is_write || mask.contains(MaskFlags::FAN_OPEN)) {
                continue;
            }
            next_id += 1;
            trace!(id = next_id, pid, %path, is_read, is_write, "file event");

            let access = AccessEvent {
                id: next_id,
                pid,
                path,
                is_read,
                is_write,
            };
            match events.try_send(Ok(access)) {
                Ok(()) => {}
                Err(TrySendError::Full(item)) => {
                    if events.blocking_send(item).is_err() {
                        return Ok(());
                    }
                }
                Err(TrySendError::Closed(_)) => return Ok(()),
            }
        }
    }
}
