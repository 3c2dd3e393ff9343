use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Tracer {
    /// Signal that asks the target to stop. It is sent when the run is
    /// cancelled, and when it is relayed from outside it arms the grace
    /// timer below.
    #[serde_as(as = "DisplayFromStr")]
    pub stop_signal: Signal,

    /// How long the target may take to exit after the stop signal before
    /// its whole process group is killed. **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub stop_grace: Duration,

    /// Capacity of the queue between the trace thread and the report task.
    pub event_queue: usize,

    /// Capacity of the queue relaying signals to the target.
    pub signal_queue: usize,
}

impl Default for Tracer {
    fn default() -> Self {
        Self {
            stop_signal: Signal::SIGTERM,
            stop_grace: Duration::from_secs(5),
            event_queue: 1000,
            signal_queue: 10,
        }
    }
}
