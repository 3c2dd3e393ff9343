//! Register access for the supported CPU families.
//!
//! The tracer only ever talks to [`RegisterView`]; the concrete register
//! layout and the call that fetches it are picked at build time.

use nix::unistd::Pid;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "aarch64")]
pub use aarch64::Registers;
#[cfg(target_arch = "x86_64")]
pub use x86_64::Registers;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("syscall tracing is only implemented for x86_64 and aarch64");

pub trait RegisterView {
    fn syscall_number(&self) -> u64;

    /// Only meaningful at a syscall-exit stop.
    fn return_value(&self) -> i64;

    /// Syscall argument `index` (0-based). Only meaningful at a
    /// syscall-entry stop; some families reuse argument registers for the
    /// return value.
    fn arg(&self, index: usize) -> u64;
}

/// Architecture name as it appears in reports.
pub const ARCH_NAME: &str = if cfg!(target_arch = "x86_64") {
    "amd64"
} else if cfg!(target_arch = "aarch64") {
    "aarch64"
} else {
    "unknown"
};

/// Fetch the registers of a stopped tracee.
pub fn read_registers(pid: Pid) -> nix::Result<Registers> {
    Registers::fetch(pid)
}
