//! Shared harness: a kernel over RAM-backed devices, one process, and
//! helpers that stage syscall arguments in its user memory.
#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use silt_os::block::{DeviceRole, RamDisk};
use silt_os::config::{PAGE_SIZE, USER_TOP};
use silt_os::fs::FileSys;
use silt_os::kernel::Kernel;
use silt_os::syscall::*;
use silt_os::task::{Console, NullLoader, Pid};

/// Strings (paths, readdir names) live in the initial stack page.
pub const STR_AT: usize = USER_TOP - PAGE_SIZE;
pub const NAME_AT: usize = STR_AT + 1024;
/// Data buffers are staged lower, still inside the growth window.
pub const BUF_AT: usize = USER_TOP - 64 * PAGE_SIZE;

#[derive(Default)]
pub struct ConsoleState {
    pub input: Mutex<VecDeque<u8>>,
    pub output: Mutex<Vec<u8>>,
}

pub struct TestConsole(pub Arc<ConsoleState>);

impl Console for TestConsole {
    fn getc(&self) -> u8 {
        self.0.input.lock().unwrap().pop_front().unwrap_or(0)
    }
    fn putbuf(&self, buf: &[u8]) {
        self.0.output.lock().unwrap().extend_from_slice(buf);
    }
}

pub struct Harness {
    pub kernel: Kernel,
    pub pid: Pid,
    pub console: Arc<ConsoleState>,
    esp: Cell<usize>,
}

impl Harness {
    pub fn boot(user_pages: usize, fs_sectors: u32) -> Self {
        let fs = FileSys::format(Arc::new(RamDisk::new(fs_sectors, DeviceRole::FileSys)));
        let console = Arc::new(ConsoleState::default());
        let kernel = Kernel::new(
            fs,
            Arc::new(RamDisk::new(2048, DeviceRole::Swap)),
            user_pages,
            Box::new(TestConsole(Arc::clone(&console))),
            Box::new(NullLoader),
        );
        let pid = kernel.spawn("init");
        let harness = Self {
            kernel,
            pid,
            console,
            esp: Cell::new(USER_TOP - 16),
        };
        // a user program's stack pointer sits below its buffers; keep the
        // whole staging window inside the growth window
        harness.set_esp(BUF_AT);
        harness
    }

    /// Records a new user stack pointer the way the next trap would.
    pub fn set_esp(&self, esp: usize) {
        self.esp.set(esp);
        let _ = self.kernel.syscall(self.pid, usize::MAX, [0; 3], esp);
    }

    pub fn sc(&self, id: usize, args: [usize; 3]) -> SyscallReturn {
        self.kernel.syscall(self.pid, id, args, self.esp.get())
    }

    pub fn put(&self, addr: usize, bytes: &[u8]) {
        assert!(self.kernel.write_user(self.pid, addr, bytes));
    }

    pub fn get(&self, addr: usize, len: usize) -> Vec<u8> {
        self.kernel.read_user(self.pid, addr, len).unwrap()
    }

    fn put_cstr(&self, s: &str) -> usize {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.put(STR_AT, &bytes);
        STR_AT
    }

    pub fn create(&self, name: &str, size: usize) -> bool {
        let ptr = self.put_cstr(name);
        self.sc(SYSCALL_CREATE, [ptr, size, 0]).value() != 0
    }

    pub fn remove(&self, name: &str) -> bool {
        let ptr = self.put_cstr(name);
        self.sc(SYSCALL_REMOVE, [ptr, 0, 0]).value() != 0
    }

    pub fn open(&self, name: &str) -> isize {
        let ptr = self.put_cstr(name);
        self.sc(SYSCALL_OPEN, [ptr, 0, 0]).value()
    }

    pub fn close(&self, fd: usize) -> isize {
        self.sc(SYSCALL_CLOSE, [fd, 0, 0]).value()
    }

    pub fn mkdir(&self, path: &str) -> bool {
        let ptr = self.put_cstr(path);
        self.sc(SYSCALL_MKDIR, [ptr, 0, 0]).value() != 0
    }

    pub fn chdir(&self, path: &str) -> bool {
        let ptr = self.put_cstr(path);
        self.sc(SYSCALL_CHDIR, [ptr, 0, 0]).value() != 0
    }

    pub fn filesize(&self, fd: usize) -> isize {
        self.sc(SYSCALL_FILESIZE, [fd, 0, 0]).value()
    }

    pub fn seek(&self, fd: usize, pos: usize) {
        self.sc(SYSCALL_SEEK, [fd, pos, 0]).value();
    }

    pub fn tell(&self, fd: usize) -> isize {
        self.sc(SYSCALL_TELL, [fd, 0, 0]).value()
    }

    pub fn write(&self, fd: usize, data: &[u8]) -> isize {
        self.put(BUF_AT, data);
        self.sc(SYSCALL_WRITE, [fd, BUF_AT, data.len()]).value()
    }

    pub fn read(&self, fd: usize, len: usize) -> (isize, Vec<u8>) {
        self.put(BUF_AT, &vec![0u8; len]);
        let n = self.sc(SYSCALL_READ, [fd, BUF_AT, len]).value();
        let data = if n > 0 {
            self.get(BUF_AT, n as usize)
        } else {
            Vec::new()
        };
        (n, data)
    }

    pub fn readdir(&self, fd: usize) -> Option<String> {
        if self.sc(SYSCALL_READDIR, [fd, NAME_AT, 0]).value() == 0 {
            return None;
        }
        let bytes = self.get(NAME_AT, 15);
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Some(String::from_utf8_lossy(&bytes[..len]).into_owned())
    }

    pub fn isdir(&self, fd: usize) -> bool {
        self.sc(SYSCALL_ISDIR, [fd, 0, 0]).value() != 0
    }

    pub fn inumber(&self, fd: usize) -> isize {
        self.sc(SYSCALL_INUMBER, [fd, 0, 0]).value()
    }
}
