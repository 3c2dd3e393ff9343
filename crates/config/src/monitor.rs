use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Monitor {
    /// Capacity of the non-fatal error stream shared by both monitors.
    pub error_queue: usize,

    /// Window given to late non-fatal errors once the run is done.
    /// **Measured in milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub error_drain: Duration,

    /// A short-lived target still gets this much file-access monitoring,
    /// counted from the start of the run. **Measured in milliseconds**.
    ///
    /// ## Note
    ///
    /// Only applies when the tracer finished without an error.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub min_passive: Duration,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            error_queue: 100,
            error_drain: Duration::from_millis(200),
            min_passive: Duration::from_secs(1),
        }
    }
}
