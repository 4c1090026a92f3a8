//! Process syscalls: the ones the core delegates to the loader.

use alloc::string::String;

use crate::kernel::Kernel;
use crate::kerror::KernelResult;
use crate::mm::VirtAddr;
use crate::task::Pid;

use super::PATH_MAX;

/// Reads a NUL-terminated user string after validating the pointer.
pub(super) fn copy_path(kernel: &Kernel, pid: Pid, ptr: usize) -> KernelResult<String> {
    let esp = kernel.saved_esp(pid);
    let mut vm = kernel.vm().lock();
    vm.check_user_ptr(pid, ptr, esp)?;
    vm.copy_in_cstr(kernel.fs(), pid, VirtAddr(ptr), PATH_MAX, esp)
}

pub(super) fn sys_exec(kernel: &Kernel, pid: Pid, cmd_ptr: usize) -> KernelResult<isize> {
    let cmd = copy_path(kernel, pid, cmd_ptr)?;
    Ok(kernel.loader().exec(&cmd))
}

pub(super) fn sys_wait(kernel: &Kernel, child: usize) -> KernelResult<isize> {
    Ok(kernel.loader().wait(child as isize))
}
