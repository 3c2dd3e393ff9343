use super::RegisterView;
use nix::sys::ptrace::{self, regset::NT_PRSTATUS};
use nix::unistd::Pid;

/// General purpose registers. x8 holds the syscall number, x0..x5 the
/// arguments, and x0 is overwritten with the return value.
#[derive(Clone, Copy)]
pub struct Registers(libc::user_regs_struct);

impl Registers {
    pub(super) fn fetch(pid: Pid) -> nix::Result<Self> {
        ptrace::getregset::<NT_PRSTATUS>(pid).map(Self)
    }
}

impl RegisterView for Registers {
    fn syscall_number(&self) -> u64 {
        self.0.regs[8]
    }

    fn return_value(&self) -> i64 {
        self.0.regs[0] as i64
    }

    fn arg(&self, index: usize) -> u64 {
        if index < 6 { self.0.regs[index] } else { 0 }
    }
}
