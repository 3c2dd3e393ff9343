#![forbid(unsafe_code)]

pub mod artifact;
pub mod cli;
pub mod controlled;
mod error;
pub mod execution;
pub mod session;
pub mod signals;
pub mod standalone;

pub use artifact::{Artifactor, ContainerReport};
pub use error::Error;
pub use execution::{Execution, FileExecution, IpcExecution, KernelMonitors, MonitorFactory};
