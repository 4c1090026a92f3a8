//! Memory-backed block device, used by the test harness and by format
//! runs that build an image before it is written out.

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::{BlockDevice, DeviceRole, SECTOR_SIZE};

pub struct RamDisk {
    sectors: Mutex<Vec<u8>>,
    num_sectors: u32,
    role: DeviceRole,
}

impl RamDisk {
    pub fn new(num_sectors: u32, role: DeviceRole) -> Self {
        Self {
            sectors: Mutex::new(vec![0u8; num_sectors as usize * SECTOR_SIZE]),
            num_sectors,
            role,
        }
    }
}

impl BlockDevice for RamDisk {
    fn read_sector(&self, sector: u32, buf: &mut [u8]) {
        assert!(sector < self.num_sectors, "sector {} out of range", sector);
        let start = sector as usize * SECTOR_SIZE;
        buf[..SECTOR_SIZE].copy_from_slice(&self.sectors.lock()[start..start + SECTOR_SIZE]);
    }

    fn write_sector(&self, sector: u32, buf: &[u8]) {
        assert!(sector < self.num_sectors, "sector {} out of range", sector);
        let start = sector as usize * SECTOR_SIZE;
        self.sectors.lock()[start..start + SECTOR_SIZE].copy_from_slice(&buf[..SECTOR_SIZE]);
    }

    fn num_sectors(&self) -> u32 {
        self.num_sectors
    }

    fn role(&self) -> DeviceRole {
        self.role
    }
}
