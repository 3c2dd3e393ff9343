#![deny(unsafe_code)]

pub mod arch;
pub mod composite;
mod error;
pub mod lifecycle;
pub mod report;
pub mod tracer;
pub mod watcher;

pub use composite::{CompositeMonitor, Phase};
pub use error::Error;
pub use lifecycle::{Completion, Monitor};
pub use report::{
    FileAccessReport, FileInfo, FsActivityInfo, MonitorReports, ProcessInfo, SyscallReport,
    SyscallStatInfo,
};
pub use tracer::{Launch, Tracer};
pub use watcher::{Watch, Watcher};
