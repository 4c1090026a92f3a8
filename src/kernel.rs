//! The kernel context
//!
//! One [`Kernel`] owns the filesystem, the VM core and the process
//! table, and is passed to whoever needs them; boot code builds it once
//! and tears it down at shutdown. The lock order is process table, then
//! VM, then filesystem; the fault path takes the filesystem lock while
//! holding the VM lock, never the reverse.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::block::BlockDevice;
use crate::config::USER_TOP;
use crate::fs::dir::Dir;
use crate::fs::file::File;
use crate::fs::FileSys;
use crate::mm::{FaultFlags, VirtAddr, Vm};
use crate::task::{Console, Loader, Pid, Process};

pub struct Kernel {
    fs: Arc<FileSys>,
    vm: Mutex<Vm>,
    procs: Mutex<BTreeMap<Pid, Process>>,
    console: Box<dyn Console>,
    loader: Box<dyn Loader>,
    next_pid: AtomicUsize,
    halted: AtomicBool,
}

impl Kernel {
    pub fn new(
        fs: Arc<FileSys>,
        swap_device: Arc<dyn BlockDevice>,
        user_pages: usize,
        console: Box<dyn Console>,
        loader: Box<dyn Loader>,
    ) -> Self {
        info!("bringing up kernel: {} user pages", user_pages);
        Self {
            fs,
            vm: Mutex::new(Vm::new(user_pages, swap_device)),
            procs: Mutex::new(BTreeMap::new()),
            console,
            loader,
            next_pid: AtomicUsize::new(1),
            halted: AtomicBool::new(false),
        }
    }

    pub fn fs(&self) -> &Arc<FileSys> {
        &self.fs
    }

    pub(crate) fn vm(&self) -> &Mutex<Vm> {
        &self.vm
    }

    pub(crate) fn procs(&self) -> &Mutex<BTreeMap<Pid, Process>> {
        &self.procs
    }

    pub(crate) fn console(&self) -> &dyn Console {
        &*self.console
    }

    pub(crate) fn loader(&self) -> &dyn Loader {
        &*self.loader
    }

    /// `halt` powers the machine off; here that is a flag boot code polls.
    pub fn halt(&self) {
        info!("halting");
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Creates a process rooted at `/` with one stack page mapped, the
    /// way the loader leaves a fresh address space.
    pub fn spawn(&self, name: &str) -> Pid {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let cwd = {
            let _guard = self.fs.lock();
            Dir::open_root(&self.fs)
        };
        let mut proc = Process::new(pid, String::from(name), cwd);
        proc.saved_esp = USER_TOP - 16;
        self.procs.lock().insert(pid, proc);

        let mut vm = self.vm.lock();
        vm.attach(pid);
        vm.handle_fault(
            &self.fs,
            pid,
            VirtAddr(USER_TOP - 16),
            FaultFlags::WRITE | FaultFlags::USER,
            USER_TOP - 16,
        )
        .expect("initial stack page");
        pid
    }

    /// Terminates `pid` with `status`: releases its fds, cwd, mapped
    /// files and all of its memory. Idempotent.
    pub fn exit(&self, pid: Pid, status: i32) {
        let (files, cwd, mapped): (Vec<_>, _, Vec<Arc<File>>) = {
            let mut procs = self.procs.lock();
            let Some(proc) = procs.get_mut(&pid) else {
                return;
            };
            if !proc.is_alive() {
                return;
            }
            proc.exit_status = Some(status);
            info!("{}: exit({})", proc.name, status);
            (
                proc.files.drain(),
                proc.cwd.take(),
                core::mem::take(&mut proc.mapped_files),
            )
        };

        self.vm.lock().detach(pid);

        let _guard = self.fs.lock();
        for file in files {
            file.close(&self.fs);
        }
        for file in mapped {
            file.close(&self.fs);
        }
        if let Some(cwd) = cwd {
            cwd.close(&self.fs);
        }
    }

    pub fn exit_status(&self, pid: Pid) -> Option<i32> {
        self.procs.lock().get(&pid).and_then(|p| p.exit_status)
    }

    /// The trap entry for page faults: the faulting address, the decoded
    /// error-code bits, and the user stack pointer at trap time. Returns
    /// false when the fault was illegal and the process is gone.
    pub fn page_fault(&self, pid: Pid, fault_addr: usize, flags: FaultFlags, user_esp: usize) -> bool {
        let resolved =
            self.vm
                .lock()
                .handle_fault(&self.fs, pid, VirtAddr(fault_addr), flags, user_esp);
        match resolved {
            Ok(()) => true,
            Err(err) => {
                debug!("pid {} page fault at {:#x}: {}", pid, fault_addr, err);
                self.exit(pid, -1);
                false
            }
        }
    }

    /// Loader-facing: backs the page at `addr` with `read_bytes` of
    /// `file` starting at `offset`, and keeps the file open until the
    /// process exits.
    pub fn map_segment(
        &self,
        pid: Pid,
        file: &Arc<File>,
        offset: usize,
        read_bytes: usize,
        addr: usize,
        writable: bool,
    ) -> bool {
        let vpn = VirtAddr(addr).floor();
        if !self.vm.lock().map_segment(pid, file, offset, read_bytes, vpn, writable) {
            return false;
        }
        let mut procs = self.procs.lock();
        if let Some(proc) = procs.get_mut(&pid) {
            if !proc.mapped_files.iter().any(|f| Arc::ptr_eq(f, file)) {
                proc.mapped_files.push(Arc::clone(file));
            }
        }
        true
    }

    /// Loader- and test-facing poke into user memory; faults pages in
    /// like a user store.
    pub fn write_user(&self, pid: Pid, addr: usize, bytes: &[u8]) -> bool {
        let esp = self.saved_esp(pid);
        self.vm
            .lock()
            .copy_out(&self.fs, pid, VirtAddr(addr), bytes, esp)
            .is_ok()
    }

    /// Loader- and test-facing peek at user memory.
    pub fn read_user(&self, pid: Pid, addr: usize, len: usize) -> Option<Vec<u8>> {
        let esp = self.saved_esp(pid);
        self.vm
            .lock()
            .copy_in(&self.fs, pid, VirtAddr(addr), len, esp)
            .ok()
    }

    pub(crate) fn saved_esp(&self, pid: Pid) -> usize {
        self.procs.lock().get(&pid).map_or(0, |p| p.saved_esp)
    }

    pub fn fault_count(&self) -> u64 {
        self.vm.lock().fault_count()
    }

    pub fn free_frames(&self) -> usize {
        self.vm.lock().free_frames()
    }

    pub fn swap_in_use(&self) -> usize {
        self.vm.lock().swap_used()
    }
}
