//! index node (inode) layer
//!
//! [`DiskInode`] is the fixed on-disk record; [`Inode`] is the shared
//! in-memory object the rest of the kernel holds. There is exactly one
//! `Inode` per sector at any time, handed out by the open-inode table
//! in [`crate::fs::FileSys`], with an explicit open count. The last
//! closer of a removed inode gives every owned sector back to the free
//! map.
//!
//! File growth is two-phase: new sectors are allocated and written
//! first, and only then is the new `length` published together with the
//! rewritten inode sector, so a reader that observes the new length
//! also observes the new sectors.

use alloc::sync::Arc;

use spin::{Mutex, MutexGuard};

use crate::block::{BlockDevice, SECTOR_SIZE};
use crate::fs::free_map::FreeMap;
use crate::fs::layout::{bytes_to_sectors, index_overhead, DiskInode, MAX_DATA_SECTORS};

pub struct InodeInner {
    /// Number of openers.
    pub open_cnt: usize,
    /// True if deleted while still open.
    pub removed: bool,
    /// 0: writes ok, >0: deny writes.
    pub deny_write_cnt: usize,
    /// Cached on-disk image.
    pub data: DiskInode,
}

/// In-memory inode.
pub struct Inode {
    sector: u32,
    device: Arc<dyn BlockDevice>,
    inner: Mutex<InodeInner>,
    /// Serialises growth publication across processes.
    grow_lock: Mutex<()>,
    /// Serialises directory-entry structural changes.
    dir_lock: Mutex<()>,
}

impl Inode {
    /// Initializes an inode with `length` bytes of zeroed data and
    /// writes the record to `sector`. Fails without side effects if the
    /// free map cannot hold the data sectors plus index overhead.
    pub fn create_on_disk(
        device: &Arc<dyn BlockDevice>,
        free_map: &Mutex<FreeMap>,
        sector: u32,
        length: usize,
        parent_dir: u32,
        is_dir: bool,
    ) -> bool {
        let sectors = bytes_to_sectors(length);
        if sectors > MAX_DATA_SECTORS {
            return false;
        }
        let mut fm = free_map.lock();
        if fm.count_free() < sectors + index_overhead(sectors) {
            return false;
        }
        let mut data = DiskInode::new(length as u32, parent_dir, is_dir);
        if !data.extend(device, &mut fm, sectors, 0) {
            return false;
        }
        data.write_to(device, sector);
        true
    }

    /// Reads the record at `sector` into a fresh in-memory inode with an
    /// open count of one. Only the open-inode table should call this.
    pub(crate) fn from_disk(device: Arc<dyn BlockDevice>, sector: u32) -> Self {
        let data = DiskInode::read_from(&device, sector);
        Self {
            sector,
            device,
            inner: Mutex::new(InodeInner {
                open_cnt: 1,
                removed: false,
                deny_write_cnt: 0,
                data,
            }),
            grow_lock: Mutex::new(()),
            dir_lock: Mutex::new(()),
        }
    }

    /// The inode's sector, which doubles as its inumber.
    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn is_dir(&self) -> bool {
        self.inner.lock().data.is_dir()
    }

    /// Sector of the owning directory's inode; 0 for the root.
    pub fn parent_dir(&self) -> u32 {
        self.inner.lock().data.parent_dir
    }

    pub fn length(&self) -> usize {
        self.inner.lock().data.length as usize
    }

    pub fn open_cnt(&self) -> usize {
        self.inner.lock().open_cnt
    }

    /// Marks the inode to be deleted when the last opener closes it.
    pub fn mark_removed(&self) {
        self.inner.lock().removed = true;
    }

    pub(crate) fn inner(&self) -> MutexGuard<'_, InodeInner> {
        self.inner.lock()
    }

    pub(crate) fn lock_dir(&self) -> MutexGuard<'_, ()> {
        self.dir_lock.lock()
    }

    /// Disables extension writes; called by the loader while an
    /// executable is mapped. May be called at most once per opener.
    pub fn deny_write(&self) {
        let mut inner = self.inner.lock();
        inner.deny_write_cnt += 1;
        debug_assert!(inner.deny_write_cnt <= inner.open_cnt);
    }

    /// Re-enables writes; pairs each `deny_write`.
    pub fn allow_write(&self) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.deny_write_cnt > 0);
        inner.deny_write_cnt -= 1;
    }

    /// Reads up to `buf.len()` bytes starting at byte `offset`, crossing
    /// sector boundaries. Sector-aligned full-sector copies go straight
    /// into the caller's buffer; partial copies go through a bounce
    /// sector. Returns the number of bytes read, short at end of file.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let data = self.inner.lock().data.clone();
        let length = data.length as usize;
        let mut bounce = [0u8; SECTOR_SIZE];
        let mut pos = offset;
        let mut bytes_read = 0;

        while bytes_read < buf.len() && pos < length {
            let Some(sector) = data.byte_to_sector(&self.device, pos, length) else {
                break;
            };
            let sector_ofs = pos % SECTOR_SIZE;
            let chunk = (buf.len() - bytes_read)
                .min(length - pos)
                .min(SECTOR_SIZE - sector_ofs);
            if chunk == 0 {
                break;
            }

            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                self.device
                    .read_sector(sector, &mut buf[bytes_read..bytes_read + SECTOR_SIZE]);
            } else {
                self.device.read_sector(sector, &mut bounce);
                buf[bytes_read..bytes_read + chunk]
                    .copy_from_slice(&bounce[sector_ofs..sector_ofs + chunk]);
            }

            pos += chunk;
            bytes_read += chunk;
        }
        bytes_read
    }

    /// Writes `buf` starting at byte `offset`, growing the file when the
    /// write extends past the current length. Returns the number of
    /// bytes written: 0 when writes are denied or when the free map
    /// cannot cover the growth.
    pub fn write_at(&self, free_map: &Mutex<FreeMap>, buf: &[u8], offset: usize) -> usize {
        let current_length = {
            let inner = self.inner.lock();
            if inner.deny_write_cnt > 0 {
                return 0;
            }
            inner.data.length as usize
        };

        let new_end = offset + buf.len();
        let grows = new_end > current_length;
        let file_size = current_length.max(new_end);

        // Growth is serialised per inode; plain overwrites are not.
        let _guard = if grows {
            Some(self.grow_lock.lock())
        } else {
            None
        };

        if grows {
            let final_sectors = bytes_to_sectors(new_end);
            let current_sectors = bytes_to_sectors(current_length);
            if final_sectors > current_sectors {
                if final_sectors > MAX_DATA_SECTORS {
                    return 0;
                }
                let mut fm = free_map.lock();
                let needed = (final_sectors - current_sectors) + index_overhead(final_sectors)
                    - index_overhead(current_sectors);
                if fm.count_free() < needed {
                    return 0;
                }
                let mut inner = self.inner.lock();
                if !inner
                    .data
                    .extend(&self.device, &mut fm, final_sectors, current_sectors)
                {
                    return 0;
                }
                // length stays unpublished until the data is in place
            }
        }

        let data = self.inner.lock().data.clone();
        let mut bounce = [0u8; SECTOR_SIZE];
        let mut pos = offset;
        let mut bytes_written = 0;

        while bytes_written < buf.len() && pos < file_size {
            let Some(sector) = data.byte_to_sector(&self.device, pos, file_size) else {
                break;
            };
            let sector_ofs = pos % SECTOR_SIZE;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let chunk = (buf.len() - bytes_written)
                .min(file_size - pos)
                .min(sector_left);
            if chunk == 0 {
                break;
            }

            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                self.device
                    .write_sector(sector, &buf[bytes_written..bytes_written + SECTOR_SIZE]);
            } else {
                // keep the bytes around the chunk when the sector holds
                // data before or after it; fresh sectors arrive zeroed
                if sector_ofs > 0 || chunk < sector_left {
                    self.device.read_sector(sector, &mut bounce);
                } else {
                    bounce.fill(0);
                }
                bounce[sector_ofs..sector_ofs + chunk]
                    .copy_from_slice(&buf[bytes_written..bytes_written + chunk]);
                self.device.write_sector(sector, &bounce);
            }

            pos += chunk;
            bytes_written += chunk;
        }

        if grows {
            let mut inner = self.inner.lock();
            inner.data.length = new_end as u32;
            inner.data.write_to(&self.device, self.sector);
        }
        bytes_written
    }

    /// Drops one opener. Returns true when this was the last one, in
    /// which case a removed inode has already given back all its
    /// sectors. The open-inode table evicts the entry on true.
    pub(crate) fn close_locked(&self, free_map: &Mutex<FreeMap>) -> bool {
        // free_map nests outside inner everywhere else; keep that order
        let removed_data = {
            let mut inner = self.inner.lock();
            inner.open_cnt -= 1;
            if inner.open_cnt > 0 {
                return false;
            }
            inner.removed.then(|| inner.data.clone())
        };
        if let Some(data) = removed_data {
            let mut fm = free_map.lock();
            data.release_data(&self.device, &mut fm);
            fm.release(self.sector, 1);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{DeviceRole, RamDisk};
    use alloc::vec;

    fn harness(sectors: u32) -> (Arc<dyn BlockDevice>, Mutex<FreeMap>) {
        let device: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(sectors, DeviceRole::FileSys));
        let mut fm = FreeMap::new(sectors as usize);
        for reserved in 0..4 {
            fm.mark_used(reserved); // boot, free map, root, and the test inode at 3
        }
        (device, Mutex::new(fm))
    }

    #[test]
    fn write_then_read_round_trip() {
        let (device, fm) = harness(64);
        assert!(Inode::create_on_disk(&device, &fm, 3, 0, 2, false));
        let inode = Inode::from_disk(device, 3);

        assert_eq!(inode.write_at(&fm, b"hello", 0), 5);
        assert_eq!(inode.length(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(inode.read_at(&mut buf, 0), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn read_stops_at_end_of_file() {
        let (device, fm) = harness(64);
        assert!(Inode::create_on_disk(&device, &fm, 3, 0, 2, false));
        let inode = Inode::from_disk(device, 3);
        inode.write_at(&fm, b"abc", 0);
        let mut buf = [0u8; 16];
        assert_eq!(inode.read_at(&mut buf, 0), 3);
        assert_eq!(inode.read_at(&mut buf, 3), 0);
        assert_eq!(inode.read_at(&mut buf, 100), 0);
    }

    #[test]
    fn misaligned_writes_preserve_neighbors() {
        let (device, fm) = harness(64);
        assert!(Inode::create_on_disk(&device, &fm, 3, 1024, 2, false));
        let inode = Inode::from_disk(device, 3);
        let pattern = vec![0x5Au8; 1024];
        assert_eq!(inode.write_at(&fm, &pattern, 0), 1024);
        // straddle the sector boundary
        assert_eq!(inode.write_at(&fm, b"XYZ", 510), 3);
        let mut buf = vec![0u8; 1024];
        assert_eq!(inode.read_at(&mut buf, 0), 1024);
        assert_eq!(buf[509], 0x5A);
        assert_eq!(&buf[510..513], b"XYZ");
        assert_eq!(buf[513], 0x5A);
    }

    #[test]
    fn growth_through_the_indirect_block() {
        let (device, fm) = harness(512);
        assert!(Inode::create_on_disk(&device, &fm, 3, 0, 2, false));
        let inode = Inode::from_disk(device, 3);

        // 20 sectors worth, one write at a time, resuming mid-index
        let chunk = vec![7u8; 1000];
        let mut offset = 0;
        for _ in 0..10 {
            assert_eq!(inode.write_at(&fm, &chunk, offset), 1000);
            offset += 1000;
        }
        assert_eq!(inode.length(), 10_000);
        let mut buf = vec![0u8; 1000];
        assert_eq!(inode.read_at(&mut buf, 5_500), 1000);
        assert!(buf.iter().all(|&b| b == 7));
    }

    #[test]
    fn write_fails_whole_when_free_map_short() {
        let (device, fm) = harness(16);
        assert!(Inode::create_on_disk(&device, &fm, 3, 0, 2, false));
        let inode = Inode::from_disk(device, 3);
        // 12 sectors free, far less than the 71 data + 1 index needed
        let big = vec![1u8; 36_000];
        assert_eq!(inode.write_at(&fm, &big, 0), 0);
        assert_eq!(inode.length(), 0);
    }

    #[test]
    fn deny_write_refuses_silently() {
        let (device, fm) = harness(64);
        assert!(Inode::create_on_disk(&device, &fm, 3, 0, 2, false));
        let inode = Inode::from_disk(device, 3);
        inode.deny_write();
        assert_eq!(inode.write_at(&fm, b"nope", 0), 0);
        inode.allow_write();
        assert_eq!(inode.write_at(&fm, b"yes", 0), 3);
    }

    #[test]
    fn removed_inode_releases_sectors_on_last_close() {
        let (device, fm) = harness(64);
        assert!(Inode::create_on_disk(&device, &fm, 3, 0, 2, false));
        let free_before = fm.lock().count_free();
        let inode = Inode::from_disk(device, 3);
        inode.write_at(&fm, &vec![9u8; 2048], 0);
        assert!(fm.lock().count_free() < free_before);
        inode.mark_removed();
        assert!(inode.close_locked(&fm));
        assert_eq!(fm.lock().count_free(), free_before + 1); // inode sector too
    }
}
