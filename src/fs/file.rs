//! File handles
//!
//! A file descriptor may refer to either a regular file or a directory;
//! [`FsObject`] is the tagged variant the per-process table stores, and
//! every operation dispatches on it. [`File`] pairs the shared inode
//! with a cursor and the per-handle deny-write state the loader uses
//! while an executable is mapped.

use alloc::sync::Arc;

use spin::Mutex;

use crate::fs::dir::Dir;
use crate::fs::inode::Inode;
use crate::fs::FileSys;

struct FileInner {
    pos: usize,
    writes_denied: bool,
}

/// An open regular file.
pub struct File {
    inode: Arc<Inode>,
    inner: Mutex<FileInner>,
}

impl File {
    /// Wraps an already-opened inode, taking ownership of its open count.
    pub fn open(inode: Arc<Inode>) -> Self {
        Self {
            inode,
            inner: Mutex::new(FileInner {
                pos: 0,
                writes_denied: false,
            }),
        }
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub fn length(&self) -> usize {
        self.inode.length()
    }

    /// Reads at the cursor and advances it.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut inner = self.inner.lock();
        let read = self.inode.read_at(buf, inner.pos);
        inner.pos += read;
        read
    }

    /// Reads at an explicit offset without moving the cursor. The fault
    /// path uses this to fill frames from file-backed pages.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        self.inode.read_at(buf, offset)
    }

    /// Writes at the cursor and advances it.
    pub fn write(&self, fs: &FileSys, buf: &[u8]) -> usize {
        let mut inner = self.inner.lock();
        let written = self.inode.write_at(fs.free_map(), buf, inner.pos);
        inner.pos += written;
        written
    }

    pub fn seek(&self, pos: usize) {
        self.inner.lock().pos = pos;
    }

    pub fn tell(&self) -> usize {
        self.inner.lock().pos
    }

    /// Refuses extension writes on the inode for as long as this handle
    /// stays open; at most once per handle.
    pub fn deny_write(&self) {
        let mut inner = self.inner.lock();
        if !inner.writes_denied {
            inner.writes_denied = true;
            self.inode.deny_write();
        }
    }

    pub fn allow_write(&self) {
        let mut inner = self.inner.lock();
        if inner.writes_denied {
            inner.writes_denied = false;
            self.inode.allow_write();
        }
    }

    /// Drops this handle's opener, pairing any outstanding deny-write.
    /// Call exactly once per handle.
    pub fn close(&self, fs: &FileSys) {
        self.allow_write();
        fs.close_inode(&self.inode);
    }
}

/// What a file descriptor points at.
pub enum FsObject {
    File(Arc<File>),
    Dir(Dir),
}

impl FsObject {
    pub fn is_dir(&self) -> bool {
        matches!(self, FsObject::Dir(_))
    }

    /// The backing inode's sector, which is its inumber.
    pub fn inumber(&self) -> u32 {
        match self {
            FsObject::File(file) => file.inode().sector(),
            FsObject::Dir(dir) => dir.inode().sector(),
        }
    }

    pub fn close(self, fs: &FileSys) {
        match self {
            FsObject::File(file) => file.close(fs),
            FsObject::Dir(dir) => dir.close(fs),
        }
    }
}
