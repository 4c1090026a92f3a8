//! File system
//!
//! Layered bottom-up: the free-sector map, the on-disk layout, the
//! inode layer, directories, and path resolution. [`FileSys`] is the
//! facade the syscall surface talks to; it owns the device, the free
//! map, the open-inode table and the global filesystem lock, and is
//! handed to each subsystem rather than living in a static.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use spin::{Mutex, MutexGuard};

use crate::block::{BlockDevice, DeviceRole};

pub mod dir;
pub mod file;
pub mod free_map;
pub mod inode;
pub mod layout;
pub mod path;

use dir::Dir;
use file::{File, FsObject};
use free_map::FreeMap;
use inode::Inode;
use path::parse_path;

/// Inode of the free-map file. Sector 0 belongs to the host partition
/// table and is never touched.
pub const FREE_MAP_SECTOR: u32 = 1;
/// Inode of the root directory.
pub const ROOT_DIR_SECTOR: u32 = 2;

/// Entries a fresh directory is sized for; growth takes over from there.
const NEW_DIR_ENTRIES: usize = 16;

pub struct FileSys {
    device: Arc<dyn BlockDevice>,
    free_map: Mutex<FreeMap>,
    /// Open inodes, one shared object per sector.
    inodes: Mutex<BTreeMap<u32, Arc<Inode>>>,
    /// The big filesystem lock; held across each path-aware operation.
    lock: Mutex<()>,
}

impl FileSys {
    /// Formats `device` with an empty filesystem: a free-map file and an
    /// empty root directory.
    pub fn format(device: Arc<dyn BlockDevice>) -> Arc<Self> {
        assert_eq!(device.role(), DeviceRole::FileSys);
        info!("formatting file system ({} sectors)", device.num_sectors());

        let total = device.num_sectors() as usize;
        let mut fm = FreeMap::new(total);
        fm.mark_used(0);
        fm.mark_used(FREE_MAP_SECTOR);
        fm.mark_used(ROOT_DIR_SECTOR);

        let fs = Arc::new(Self {
            device,
            free_map: Mutex::new(fm),
            inodes: Mutex::new(BTreeMap::new()),
            lock: Mutex::new(()),
        });

        let map_len = FreeMap::byte_len(total);
        assert!(
            Inode::create_on_disk(&fs.device, &fs.free_map, FREE_MAP_SECTOR, map_len, 0, false),
            "free map file creation failed"
        );
        assert!(
            Dir::create_on_disk(&fs.device, &fs.free_map, ROOT_DIR_SECTOR, NEW_DIR_ENTRIES, 0),
            "root directory creation failed"
        );
        fs.flush_free_map();
        fs
    }

    /// Mounts an already-formatted device, rebuilding the free map from
    /// its persisted file.
    pub fn mount(device: Arc<dyn BlockDevice>) -> Arc<Self> {
        assert_eq!(device.role(), DeviceRole::FileSys);
        let total = device.num_sectors() as usize;

        let fs = Arc::new(Self {
            device,
            free_map: Mutex::new(FreeMap::new(total)),
            inodes: Mutex::new(BTreeMap::new()),
            lock: Mutex::new(()),
        });

        let map_inode = fs.open_inode(FREE_MAP_SECTOR);
        let mut bytes = alloc::vec![0u8; map_inode.length()];
        map_inode.read_at(&mut bytes, 0);
        fs.close_inode(&map_inode);
        *fs.free_map.lock() = FreeMap::from_bytes(total, &bytes);
        fs
    }

    /// Writes unwritten state back to the device; call at shutdown.
    pub fn close(&self) {
        self.flush_free_map();
    }

    fn flush_free_map(&self) {
        let bytes = self.free_map.lock().to_bytes();
        let map_inode = self.open_inode(FREE_MAP_SECTOR);
        map_inode.write_at(&self.free_map, &bytes, 0);
        self.close_inode(&map_inode);
    }

    /// The global filesystem lock; the syscall layer holds this across
    /// each operation, and the fault path may take it while holding the
    /// VM lock (never the reverse).
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub(crate) fn free_map(&self) -> &Mutex<FreeMap> {
        &self.free_map
    }

    pub fn count_free_sectors(&self) -> usize {
        self.free_map.lock().count_free()
    }

    /// Number of distinct inodes currently open.
    pub fn open_inode_count(&self) -> usize {
        self.inodes.lock().len()
    }

    /// Opens the inode at `sector`: the same shared object comes back
    /// for every opener, with its open count bumped.
    pub fn open_inode(&self, sector: u32) -> Arc<Inode> {
        let mut table = self.inodes.lock();
        if let Some(inode) = table.get(&sector) {
            inode.inner().open_cnt += 1;
            return Arc::clone(inode);
        }
        let inode = Arc::new(Inode::from_disk(Arc::clone(&self.device), sector));
        table.insert(sector, Arc::clone(&inode));
        inode
    }

    /// Drops one opener; the last close of a removed inode frees its
    /// sectors and evicts it from the table.
    pub fn close_inode(&self, inode: &Arc<Inode>) {
        let mut table = self.inodes.lock();
        if inode.close_locked(&self.free_map) {
            table.remove(&inode.sector());
        }
    }

    /// Creates a regular file of `initial_size` zeroed bytes. Reversible:
    /// the inode sector goes back to the free map if any step fails.
    pub fn create(&self, cwd: &Dir, path: &str, initial_size: usize) -> bool {
        self.create_node(cwd, path, |fs, sector, parent| {
            Inode::create_on_disk(&fs.device, &fs.free_map, sector, initial_size, parent, false)
        })
    }

    /// Creates an empty directory.
    pub fn create_dir(&self, cwd: &Dir, path: &str) -> bool {
        self.create_node(cwd, path, |fs, sector, parent| {
            Dir::create_on_disk(&fs.device, &fs.free_map, sector, NEW_DIR_ENTRIES, parent)
        })
    }

    fn create_node(
        &self,
        cwd: &Dir,
        path: &str,
        build: impl FnOnce(&Self, u32, u32) -> bool,
    ) -> bool {
        let Some((dir, name)) = parse_path(self, cwd, path) else {
            return false;
        };
        // the special components never name something new
        if name == "/" || name == "." || name == ".." {
            dir.close(self);
            return false;
        }

        let sector = self.free_map.lock().allocate(1);
        let created = match sector {
            Some(sector) => {
                build(self, sector, dir.inode().sector()) && dir.add(self, &name, sector)
            }
            None => false,
        };
        if !created {
            if let Some(sector) = sector {
                self.free_map.lock().release(sector, 1);
            }
        }
        dir.close(self);
        created
    }

    /// Opens `path`, yielding a file or directory handle. `"."`, `".."`
    /// and `"/"` resolve to the directory itself.
    pub fn open_path(&self, cwd: &Dir, path: &str) -> Option<FsObject> {
        let (dir, name) = parse_path(self, cwd, path)?;

        let inode = match name.as_str() {
            ".." => {
                let parent = dir.open_parent(self);
                dir.close(self);
                parent?.into_inode()
            }
            "." | "/" => dir.into_inode(),
            name => {
                let found = dir.lookup_inode(self, name);
                dir.close(self);
                found?
            }
        };

        Some(if inode.is_dir() {
            FsObject::Dir(Dir::open(inode))
        } else {
            FsObject::File(Arc::new(File::open(inode)))
        })
    }

    /// Deletes `path`; directories only when empty and otherwise unopened.
    pub fn remove(&self, cwd: &Dir, path: &str) -> bool {
        let Some((dir, name)) = parse_path(self, cwd, path) else {
            return false;
        };
        let removed = dir.remove(self, &name);
        dir.close(self);
        removed
    }
}
