//! File and directory syscalls
//!
//! Every pointer argument is validated against the faulting process's
//! supplemental page table (or the stack-growth window) before use, and
//! user buffers are staged through kernel memory so the filesystem lock
//! is never held while a user page faults in.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::config::{CONSOLE_CHUNK, MAX_FILES, NAME_MAX};
use crate::fs::file::{File, FsObject};
use crate::kernel::Kernel;
use crate::kerror::{KernelError, KernelResult};
use crate::mm::VirtAddr;
use crate::task::Pid;

use super::process::copy_path;

/// Validates `buf` and the byte one past its end.
fn check_buf(kernel: &Kernel, pid: Pid, buf: usize, size: usize) -> KernelResult<()> {
    let esp = kernel.saved_esp(pid);
    let vm = kernel.vm().lock();
    vm.check_user_ptr(pid, buf, esp)?;
    vm.check_user_ptr(pid, buf + size, esp)
}

fn copy_in_user(kernel: &Kernel, pid: Pid, buf: usize, size: usize) -> KernelResult<Vec<u8>> {
    let esp = kernel.saved_esp(pid);
    kernel
        .vm()
        .lock()
        .copy_in(kernel.fs(), pid, VirtAddr(buf), size, esp)
}

fn copy_out_user(kernel: &Kernel, pid: Pid, buf: usize, bytes: &[u8]) -> KernelResult<()> {
    let esp = kernel.saved_esp(pid);
    kernel
        .vm()
        .lock()
        .copy_out(kernel.fs(), pid, VirtAddr(buf), bytes, esp)
}

/// Looks up an fd that must name a regular file; a directory there is a
/// user fault.
fn file_at(kernel: &Kernel, pid: Pid, fd: usize) -> KernelResult<Option<Arc<File>>> {
    let procs = kernel.procs().lock();
    let Some(proc) = procs.get(&pid) else {
        return Err(KernelError::NotFound);
    };
    match proc.files.get(fd) {
        None => Ok(None),
        Some(FsObject::Dir(_)) => Err(KernelError::IsADirectory),
        Some(FsObject::File(file)) => Ok(Some(Arc::clone(file))),
    }
}

pub(super) fn sys_create(
    kernel: &Kernel,
    pid: Pid,
    name_ptr: usize,
    size: usize,
) -> KernelResult<isize> {
    let path = copy_path(kernel, pid, name_ptr)?;
    let procs = kernel.procs().lock();
    let cwd = procs
        .get(&pid)
        .and_then(|p| p.cwd.as_ref())
        .ok_or(KernelError::NotFound)?;
    let _guard = kernel.fs().lock();
    Ok(kernel.fs().create(cwd, &path, size) as isize)
}

pub(super) fn sys_remove(kernel: &Kernel, pid: Pid, name_ptr: usize) -> KernelResult<isize> {
    let path = copy_path(kernel, pid, name_ptr)?;
    let procs = kernel.procs().lock();
    let cwd = procs
        .get(&pid)
        .and_then(|p| p.cwd.as_ref())
        .ok_or(KernelError::NotFound)?;
    let _guard = kernel.fs().lock();
    Ok(kernel.fs().remove(cwd, &path) as isize)
}

pub(super) fn sys_open(kernel: &Kernel, pid: Pid, name_ptr: usize) -> KernelResult<isize> {
    let path = copy_path(kernel, pid, name_ptr)?;
    let mut procs = kernel.procs().lock();
    let proc = procs.get_mut(&pid).ok_or(KernelError::NotFound)?;

    let opened = {
        let cwd = proc.cwd.as_ref().ok_or(KernelError::NotFound)?;
        let _guard = kernel.fs().lock();
        kernel.fs().open_path(cwd, &path)
    };
    let Some(obj) = opened else {
        return Ok(-1);
    };

    match proc.files.alloc(obj) {
        Ok(fd) => Ok(fd as isize),
        Err(obj) => {
            let _guard = kernel.fs().lock();
            obj.close(kernel.fs());
            Err(KernelError::TooManyOpenFiles)
        }
    }
}

pub(super) fn sys_filesize(kernel: &Kernel, pid: Pid, fd: usize) -> KernelResult<isize> {
    if !(2..MAX_FILES).contains(&fd) {
        return Err(KernelError::BadFileDescriptor { fd });
    }
    match file_at(kernel, pid, fd)? {
        Some(file) => {
            let _guard = kernel.fs().lock();
            Ok(file.length() as isize)
        }
        None => Err(KernelError::BadFileDescriptor { fd }),
    }
}

pub(super) fn sys_read(
    kernel: &Kernel,
    pid: Pid,
    fd: usize,
    buf: usize,
    size: usize,
) -> KernelResult<isize> {
    if fd == 1 || fd >= MAX_FILES {
        return Ok(-1);
    }
    check_buf(kernel, pid, buf, size)?;

    if fd == 0 {
        let mut bytes = Vec::with_capacity(size);
        for _ in 0..size {
            bytes.push(kernel.console().getc());
        }
        copy_out_user(kernel, pid, buf, &bytes)?;
        return Ok(size as isize);
    }

    let Some(file) = file_at(kernel, pid, fd)? else {
        return Ok(-1);
    };
    let mut data = vec![0u8; size];
    let read = {
        let _guard = kernel.fs().lock();
        file.read(&mut data)
    };
    copy_out_user(kernel, pid, buf, &data[..read])?;
    Ok(read as isize)
}

pub(super) fn sys_write(
    kernel: &Kernel,
    pid: Pid,
    fd: usize,
    buf: usize,
    size: usize,
) -> KernelResult<isize> {
    if fd == 0 || fd >= MAX_FILES {
        return Ok(-1);
    }
    check_buf(kernel, pid, buf, size)?;
    let bytes = copy_in_user(kernel, pid, buf, size)?;

    if fd == 1 {
        // the terminal takes at most 256 bytes per push
        for chunk in bytes.chunks(CONSOLE_CHUNK) {
            kernel.console().putbuf(chunk);
        }
        return Ok(size as isize);
    }

    let Some(file) = file_at(kernel, pid, fd)? else {
        return Ok(-1);
    };
    let _guard = kernel.fs().lock();
    Ok(file.write(kernel.fs(), &bytes) as isize)
}

pub(super) fn sys_seek(kernel: &Kernel, pid: Pid, fd: usize, pos: usize) -> KernelResult<isize> {
    if !(2..MAX_FILES).contains(&fd) {
        return Err(KernelError::BadFileDescriptor { fd });
    }
    match file_at(kernel, pid, fd)? {
        Some(file) => {
            let _guard = kernel.fs().lock();
            file.seek(pos);
            Ok(0)
        }
        None => Err(KernelError::BadFileDescriptor { fd }),
    }
}

pub(super) fn sys_tell(kernel: &Kernel, pid: Pid, fd: usize) -> KernelResult<isize> {
    if !(2..MAX_FILES).contains(&fd) {
        return Err(KernelError::BadFileDescriptor { fd });
    }
    match file_at(kernel, pid, fd)? {
        Some(file) => {
            let _guard = kernel.fs().lock();
            Ok(file.tell() as isize)
        }
        None => Ok(-1),
    }
}

pub(super) fn sys_close(kernel: &Kernel, pid: Pid, fd: usize) -> KernelResult<isize> {
    if !(2..MAX_FILES).contains(&fd) {
        return Err(KernelError::BadFileDescriptor { fd });
    }
    let obj = {
        let mut procs = kernel.procs().lock();
        procs
            .get_mut(&pid)
            .and_then(|p| p.files.take(fd))
            .ok_or(KernelError::BadFileDescriptor { fd })?
    };
    let _guard = kernel.fs().lock();
    obj.close(kernel.fs());
    Ok(0)
}

pub(super) fn sys_chdir(kernel: &Kernel, pid: Pid, path_ptr: usize) -> KernelResult<isize> {
    let path = copy_path(kernel, pid, path_ptr)?;
    let mut procs = kernel.procs().lock();
    let proc = procs.get_mut(&pid).ok_or(KernelError::NotFound)?;
    let _guard = kernel.fs().lock();

    let opened = {
        let cwd = proc.cwd.as_ref().ok_or(KernelError::NotFound)?;
        kernel.fs().open_path(cwd, &path)
    };
    match opened {
        Some(FsObject::Dir(dir)) => {
            if let Some(old) = proc.cwd.replace(dir) {
                old.close(kernel.fs());
            }
            Ok(1)
        }
        Some(obj @ FsObject::File(_)) => {
            obj.close(kernel.fs());
            Ok(0)
        }
        None => Ok(0),
    }
}

pub(super) fn sys_mkdir(kernel: &Kernel, pid: Pid, path_ptr: usize) -> KernelResult<isize> {
    let path = copy_path(kernel, pid, path_ptr)?;
    let procs = kernel.procs().lock();
    let cwd = procs
        .get(&pid)
        .and_then(|p| p.cwd.as_ref())
        .ok_or(KernelError::NotFound)?;
    let _guard = kernel.fs().lock();
    Ok(kernel.fs().create_dir(cwd, &path) as isize)
}

pub(super) fn sys_readdir(
    kernel: &Kernel,
    pid: Pid,
    fd: usize,
    name_ptr: usize,
) -> KernelResult<isize> {
    if !(2..MAX_FILES).contains(&fd) {
        return Err(KernelError::BadFileDescriptor { fd });
    }
    check_buf(kernel, pid, name_ptr, NAME_MAX + 1)?;

    let name: Option<String> = {
        let procs = kernel.procs().lock();
        let Some(proc) = procs.get(&pid) else {
            return Err(KernelError::NotFound);
        };
        match proc.files.get(fd) {
            Some(FsObject::Dir(dir)) => {
                let _guard = kernel.fs().lock();
                dir.readdir()
            }
            Some(FsObject::File(_)) => return Err(KernelError::NotADirectory),
            None => return Ok(0),
        }
    };

    match name {
        Some(name) => {
            let mut bytes = name.into_bytes();
            bytes.push(0);
            copy_out_user(kernel, pid, name_ptr, &bytes)?;
            Ok(1)
        }
        None => Ok(0),
    }
}

pub(super) fn sys_isdir(kernel: &Kernel, pid: Pid, fd: usize) -> KernelResult<isize> {
    if !(2..MAX_FILES).contains(&fd) {
        return Err(KernelError::BadFileDescriptor { fd });
    }
    let procs = kernel.procs().lock();
    let obj = procs
        .get(&pid)
        .and_then(|p| p.files.get(fd))
        .ok_or(KernelError::BadFileDescriptor { fd })?;
    Ok(obj.is_dir() as isize)
}

pub(super) fn sys_inumber(kernel: &Kernel, pid: Pid, fd: usize) -> KernelResult<isize> {
    if !(2..MAX_FILES).contains(&fd) {
        return Err(KernelError::BadFileDescriptor { fd });
    }
    let procs = kernel.procs().lock();
    let obj = procs
        .get(&pid)
        .and_then(|p| p.files.get(fd))
        .ok_or(KernelError::BadFileDescriptor { fd })?;
    Ok(obj.inumber() as isize)
}
