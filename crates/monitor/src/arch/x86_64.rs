use super::RegisterView;
use nix::sys::ptrace;
use nix::unistd::Pid;

#[derive(Clone, Copy)]
pub struct Registers(libc::user_regs_struct);

impl Registers {
    pub(super) fn fetch(pid: Pid) -> nix::Result<Self> {
        ptrace::getregs(pid).map(Self)
    }
}

impl RegisterView for Registers {
    fn syscall_number(&self) -> u64 {
        self.0.orig_rax
    }

    fn return_value(&self) -> i64 {
        self.0.rax as i64
    }

    fn arg(&self, index: usize) -> u64 {
        match index {
            0 => self.0.rdi,
            1 => self.0.rsi,
            2 => self.0.rdx,
            3 => self.0.r10,
            4 => self.0.r8,
            5 => self.0.r9,
            _ => 0,
        }
    }
}
