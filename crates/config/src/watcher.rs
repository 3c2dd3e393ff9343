use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Watcher {
    /// Capacity of the queue between the notification reader and the report
    /// task. Sized for bursts; the reader never waits on report bookkeeping
    /// unless this fills up.
    pub event_queue: usize,

    /// Path prefixes whose events are dropped before they reach the report.
    pub skip_prefixes: Vec<PathBuf>,
}

impl Default for Watcher {
    fn default() -> Self {
        Self {
            event_queue: 1000,
            skip_prefixes: vec![
                PathBuf::from("/proc/"),
                PathBuf::from("/sys/"),
                PathBuf::from("/dev/"),
            ],
        }
    }
}
