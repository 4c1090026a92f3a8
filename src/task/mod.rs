//! Process-local state
//!
//! The core does not schedule or load programs; it keeps per-process
//! bookkeeping (open-file table, working directory, exit status, the
//! stack pointer snapshot taken at trap time) and talks to the loader
//! and the console through the contracts defined here.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::MAX_FILES;
use crate::fs::dir::Dir;
use crate::fs::file::{File, FsObject};

pub type Pid = usize;

/// Keyboard in, terminal out; fds 0 and 1 route here.
pub trait Console: Send + Sync {
    fn getc(&self) -> u8;
    fn putbuf(&self, buf: &[u8]);
}

/// A console wired to nothing.
pub struct NullConsole;

impl Console for NullConsole {
    fn getc(&self) -> u8 {
        0
    }
    fn putbuf(&self, _buf: &[u8]) {}
}

/// The external program loader and waiter behind `exec`/`wait`.
pub trait Loader: Send + Sync {
    fn exec(&self, cmd: &str) -> isize;
    fn wait(&self, pid: isize) -> isize;
}

/// A loader that refuses everything.
pub struct NullLoader;

impl Loader for NullLoader {
    fn exec(&self, _cmd: &str) -> isize {
        -1
    }
    fn wait(&self, _pid: isize) -> isize {
        -1
    }
}

/// Per-process open-file table. Slots 0 and 1 stand for the console
/// and never hold an object; `next_fd` is a hint to the next free slot.
pub struct FdTable {
    slots: Vec<Option<FsObject>>,
    next_fd: usize,
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_FILES).map(|_| None).collect(),
            next_fd: 2,
        }
    }

    /// Stores `obj` in the lowest free slot at or after the hint,
    /// wrapping once. A full table hands the object back so the caller
    /// can close it.
    pub fn alloc(&mut self, obj: FsObject) -> Result<usize, FsObject> {
        let start = self.next_fd.clamp(2, MAX_FILES);
        let Some(fd) = (start..MAX_FILES)
            .chain(2..start)
            .find(|&fd| self.slots[fd].is_none())
        else {
            return Err(obj);
        };
        self.slots[fd] = Some(obj);
        self.next_fd = fd + 1;
        Ok(fd)
    }

    pub fn get(&self, fd: usize) -> Option<&FsObject> {
        self.slots.get(fd)?.as_ref()
    }

    /// Clears the slot, steering the hint back when a lower fd frees up.
    pub fn take(&mut self, fd: usize) -> Option<FsObject> {
        let obj = self.slots.get_mut(fd)?.take()?;
        if fd < self.next_fd {
            self.next_fd = fd;
        }
        Some(obj)
    }

    /// Empties the table; process exit closes everything it yields.
    pub fn drain(&mut self) -> Vec<FsObject> {
        self.slots.iter_mut().filter_map(|slot| slot.take()).collect()
    }
}

/// Process-local state the core tracks.
pub struct Process {
    pub pid: Pid,
    /// Set when the process terminates; -1 on a kill.
    pub exit_status: Option<i32>,
    pub files: FdTable,
    /// Current working directory; `None` once the process is gone.
    pub cwd: Option<Dir>,
    /// Files the loader mapped; closed at exit, after the SPT is gone.
    pub mapped_files: Vec<Arc<File>>,
    /// User stack pointer snapshot from the last trap.
    pub saved_esp: usize,
    pub name: String,
}

impl Process {
    pub fn new(pid: Pid, name: String, cwd: Dir) -> Self {
        Self {
            pid,
            exit_status: None,
            files: FdTable::new(),
            cwd: Some(cwd),
            mapped_files: Vec::new(),
            saved_esp: 0,
            name,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.exit_status.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{DeviceRole, RamDisk};
    use crate::fs::FileSys;

    fn some_file(fs: &FileSys) -> FsObject {
        let root = Dir::open_root(fs);
        fs.create(&root, "x", 0);
        let obj = fs.open_path(&root, "x").unwrap();
        root.close(fs);
        obj
    }

    #[test]
    fn fds_start_at_two_and_reuse_the_lowest_free_slot() {
        let fs = FileSys::format(Arc::new(RamDisk::new(256, DeviceRole::FileSys)));
        let mut table = FdTable::new();
        assert_eq!(table.alloc(some_file(&fs)).ok(), Some(2));
        assert_eq!(table.alloc(some_file(&fs)).ok(), Some(3));
        assert_eq!(table.alloc(some_file(&fs)).ok(), Some(4));

        table.take(3).unwrap().close(&fs);
        assert_eq!(table.alloc(some_file(&fs)).ok(), Some(3), "hint steers back");
        assert_eq!(table.alloc(some_file(&fs)).ok(), Some(5));
    }

    #[test]
    fn full_table_returns_none() {
        let fs = FileSys::format(Arc::new(RamDisk::new(4096, DeviceRole::FileSys)));
        let mut table = FdTable::new();
        for _ in 2..MAX_FILES {
            assert!(table.alloc(some_file(&fs)).is_ok());
        }
        let back = table.alloc(some_file(&fs));
        assert!(back.is_err(), "full table hands the object back");
        back.unwrap_err().close(&fs);
    }
}
