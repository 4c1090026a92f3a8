//! Implementation of syscalls
//!
//! The single entry point to all system calls, [`Kernel::syscall`], is
//! handed the syscall number, its already-fetched arguments and the
//! user stack pointer snapshot from the trap frame. Each syscall is
//! implemented as its own `sys_` function in a submodule; they return
//! `KernelResult<isize>`, and this dispatcher converts the result to
//! the user-visible convention: killing errors terminate the process
//! with exit status -1, the rest come back as sentinel values.

pub const SYSCALL_HALT: usize = 0;
pub const SYSCALL_EXIT: usize = 1;
pub const SYSCALL_EXEC: usize = 2;
pub const SYSCALL_WAIT: usize = 3;
pub const SYSCALL_CREATE: usize = 4;
pub const SYSCALL_REMOVE: usize = 5;
pub const SYSCALL_OPEN: usize = 6;
pub const SYSCALL_FILESIZE: usize = 7;
pub const SYSCALL_READ: usize = 8;
pub const SYSCALL_WRITE: usize = 9;
pub const SYSCALL_SEEK: usize = 10;
pub const SYSCALL_TELL: usize = 11;
pub const SYSCALL_CLOSE: usize = 12;
pub const SYSCALL_CHDIR: usize = 15;
pub const SYSCALL_MKDIR: usize = 16;
pub const SYSCALL_READDIR: usize = 17;
pub const SYSCALL_ISDIR: usize = 18;
pub const SYSCALL_INUMBER: usize = 19;

/// Longest path accepted from user memory.
const PATH_MAX: usize = 4096;

mod fs;
mod process;

use self::fs::*;
use self::process::*;

use crate::kernel::Kernel;
use crate::task::Pid;

/// What a syscall did, as seen from the trap frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallReturn {
    /// Value to place in the return register.
    Value(isize),
    /// The process terminated with this exit status.
    Terminated(i32),
}

impl SyscallReturn {
    /// The return value; panics if the process died instead.
    pub fn value(self) -> isize {
        match self {
            SyscallReturn::Value(v) => v,
            SyscallReturn::Terminated(status) => {
                panic!("process terminated with status {}", status)
            }
        }
    }
}

impl Kernel {
    /// handle syscall trap with `syscall_id` and other arguments
    pub fn syscall(
        &self,
        pid: Pid,
        syscall_id: usize,
        args: [usize; 3],
        user_esp: usize,
    ) -> SyscallReturn {
        {
            let mut procs = self.procs().lock();
            match procs.get_mut(&pid) {
                Some(proc) if proc.is_alive() => proc.saved_esp = user_esp,
                _ => return SyscallReturn::Terminated(-1),
            }
        }
        trace!("pid[{}] syscall {}", pid, syscall_id);

        let result = match syscall_id {
            SYSCALL_HALT => {
                self.halt();
                Ok(0)
            }
            SYSCALL_EXIT => {
                let status = args[0] as i32;
                self.exit(pid, status);
                return SyscallReturn::Terminated(status);
            }
            SYSCALL_EXEC => sys_exec(self, pid, args[0]),
            SYSCALL_WAIT => sys_wait(self, args[0]),
            SYSCALL_CREATE => sys_create(self, pid, args[0], args[1]),
            SYSCALL_REMOVE => sys_remove(self, pid, args[0]),
            SYSCALL_OPEN => sys_open(self, pid, args[0]),
            SYSCALL_FILESIZE => sys_filesize(self, pid, args[0]),
            SYSCALL_READ => sys_read(self, pid, args[0], args[1], args[2]),
            SYSCALL_WRITE => sys_write(self, pid, args[0], args[1], args[2]),
            SYSCALL_SEEK => sys_seek(self, pid, args[0], args[1]),
            SYSCALL_TELL => sys_tell(self, pid, args[0]),
            SYSCALL_CLOSE => sys_close(self, pid, args[0]),
            SYSCALL_CHDIR => sys_chdir(self, pid, args[0]),
            SYSCALL_MKDIR => sys_mkdir(self, pid, args[0]),
            SYSCALL_READDIR => sys_readdir(self, pid, args[0], args[1]),
            SYSCALL_ISDIR => sys_isdir(self, pid, args[0]),
            SYSCALL_INUMBER => sys_inumber(self, pid, args[0]),
            _ => Ok(-1),
        };

        match result {
            Ok(value) => SyscallReturn::Value(value),
            Err(err) if err.kills() => {
                debug!("pid[{}] killed by syscall {}: {}", pid, syscall_id, err);
                self.exit(pid, -1);
                SyscallReturn::Terminated(-1)
            }
            Err(err) => SyscallReturn::Value(err.as_retval()),
        }
    }
}
