//! Directory layer
//!
//! A directory is just an inode whose `is_dir` flag is set and whose
//! byte payload is a run of [`DirEntryRaw`] records; a [`Dir`] is a
//! transient per-open handle pairing the shared inode with an iteration
//! cursor. Structural changes (add/remove) and cursor movement run
//! under the owning inode's directory lock.

use alloc::string::String;
use alloc::sync::Arc;

use spin::Mutex;

use crate::block::BlockDevice;
use crate::config::NAME_MAX;
use crate::fs::free_map::FreeMap;
use crate::fs::inode::Inode;
use crate::fs::layout::{DirEntryRaw, DIR_ENTRY_SIZE};
use crate::fs::{FileSys, ROOT_DIR_SECTOR};

/// A directory handle: backing inode plus cursor.
pub struct Dir {
    inode: Arc<Inode>,
    pos: Mutex<usize>,
}

impl Dir {
    /// Creates a directory inode at `sector` with room for `entry_cnt`
    /// entries.
    pub fn create_on_disk(
        device: &Arc<dyn BlockDevice>,
        free_map: &Mutex<FreeMap>,
        sector: u32,
        entry_cnt: usize,
        parent_dir: u32,
    ) -> bool {
        Inode::create_on_disk(
            device,
            free_map,
            sector,
            entry_cnt * DIR_ENTRY_SIZE,
            parent_dir,
            true,
        )
    }

    /// Wraps an already-opened inode, taking ownership of its open count.
    pub fn open(inode: Arc<Inode>) -> Self {
        Self {
            inode,
            pos: Mutex::new(0),
        }
    }

    pub fn open_root(fs: &FileSys) -> Self {
        Self::open(fs.open_inode(ROOT_DIR_SECTOR))
    }

    /// Opens the parent directory; `None` for the root.
    pub fn open_parent(&self, fs: &FileSys) -> Option<Self> {
        let parent_sector = self.inode.parent_dir();
        if parent_sector == 0 {
            return None;
        }
        Some(Self::open(fs.open_inode(parent_sector)))
    }

    /// A second handle on the same directory, closed independently.
    pub fn reopen(&self, fs: &FileSys) -> Self {
        Self::open(fs.open_inode(self.inode.sector()))
    }

    pub fn close(self, fs: &FileSys) {
        fs.close_inode(&self.inode);
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    /// Gives up the handle, transferring its open count to the caller.
    pub fn into_inode(self) -> Arc<Inode> {
        self.inode
    }

    /// Linear scan for an in-use entry named `name`.
    pub fn lookup(&self, name: &str) -> Option<(DirEntryRaw, usize)> {
        self.scan(|e| e.in_use() && e.name() == name)
    }

    /// Linear scan for an in-use entry whose inode lives at `sector`.
    fn lookup_by_sector(&self, sector: u32) -> Option<(DirEntryRaw, usize)> {
        self.scan(|e| e.in_use() && e.inode_sector == sector)
    }

    /// Opens the inode behind `name`, if present.
    pub fn lookup_inode(&self, fs: &FileSys, name: &str) -> Option<Arc<Inode>> {
        self.lookup(name)
            .map(|(entry, _)| fs.open_inode(entry.inode_sector))
    }

    fn scan(&self, mut pred: impl FnMut(&DirEntryRaw) -> bool) -> Option<(DirEntryRaw, usize)> {
        let mut entry = DirEntryRaw::empty();
        let mut ofs = 0;
        while self.inode.read_at(entry.as_bytes_mut(), ofs) == DIR_ENTRY_SIZE {
            if pred(&entry) {
                return Some((entry, ofs));
            }
            ofs += DIR_ENTRY_SIZE;
        }
        None
    }

    /// Adds an entry for `name` backed by the inode at `inode_sector`.
    /// Rejects empty or over-long names and duplicates; reuses the first
    /// free slot, else appends.
    pub fn add(&self, fs: &FileSys, name: &str, inode_sector: u32) -> bool {
        if name.is_empty() || name.len() > NAME_MAX {
            return false;
        }
        let _lock = self.inode.lock_dir();

        if self.lookup(name).is_some() {
            return false;
        }
        // first free slot, or end of file if there is none; a short read
        // only ever happens at end of file
        let ofs = self
            .scan(|e| !e.in_use())
            .map(|(_, ofs)| ofs)
            .unwrap_or_else(|| self.inode.length());

        let entry = DirEntryRaw::new(name, inode_sector);
        self.inode.write_at(fs.free_map(), entry.as_bytes(), ofs) == DIR_ENTRY_SIZE
    }

    /// Removes the entry for `name`. A directory target must be
    /// non-root, empty, and opened by nobody else. `"."` removes the
    /// directory this handle refers to, located in its parent by sector
    /// number.
    pub fn remove(&self, fs: &FileSys, name: &str) -> bool {
        if name == "." {
            let sector = self.inode.sector();
            let Some(parent) = self.open_parent(fs) else {
                return false;
            };
            let removed = match parent.lookup_by_sector(sector) {
                Some((entry, ofs)) => parent.remove_entry(fs, entry, ofs),
                None => false,
            };
            parent.close(fs);
            removed
        } else {
            match self.lookup(name) {
                Some((entry, ofs)) => self.remove_entry(fs, entry, ofs),
                None => false,
            }
        }
    }

    fn remove_entry(&self, fs: &FileSys, mut entry: DirEntryRaw, ofs: usize) -> bool {
        let _lock = self.inode.lock_dir();
        let target = fs.open_inode(entry.inode_sector);

        let removed = if target.is_dir() && !can_remove(&target) {
            false
        } else {
            entry.in_use = 0;
            if self.inode.write_at(fs.free_map(), entry.as_bytes(), ofs) == DIR_ENTRY_SIZE {
                target.mark_removed();
                true
            } else {
                false
            }
        };
        fs.close_inode(&target);
        removed
    }

    /// Yields the name of the next in-use entry, advancing the cursor
    /// one record at a time. `None` once the directory is exhausted.
    pub fn readdir(&self) -> Option<String> {
        let _lock = self.inode.lock_dir();
        let mut pos = self.pos.lock();
        let mut entry = DirEntryRaw::empty();
        while self.inode.read_at(entry.as_bytes_mut(), *pos) == DIR_ENTRY_SIZE {
            *pos += DIR_ENTRY_SIZE;
            if entry.in_use() {
                return Some(String::from(entry.name()));
            }
        }
        None
    }

    /// Moves the iteration cursor; keeps a handle stored in a
    /// file-descriptor table consistent with its recorded position.
    pub fn seek(&self, pos: usize) {
        let _lock = self.inode.lock_dir();
        *self.pos.lock() = pos;
    }

    pub fn tell(&self) -> usize {
        let _lock = self.inode.lock_dir();
        *self.pos.lock()
    }
}

/// A directory may go away if it is not the root, holds no live
/// entries, and the only opener is the remove in progress.
fn can_remove(target: &Arc<Inode>) -> bool {
    if target.sector() == ROOT_DIR_SECTOR {
        return false;
    }
    let mut entry = DirEntryRaw::empty();
    let mut ofs = 0;
    while target.read_at(entry.as_bytes_mut(), ofs) == DIR_ENTRY_SIZE {
        if entry.in_use() {
            return false;
        }
        ofs += DIR_ENTRY_SIZE;
    }
    target.open_cnt() <= 1
}
