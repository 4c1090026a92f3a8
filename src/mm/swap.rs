//! Swap table
//!
//! The swap partition sliced into page-sized slots of 8 consecutive
//! sectors, tracked by a bitmap: bit set means the slot holds a page
//! worth of live data. Filling up is fatal; there is no overcommit
//! management to fall back on.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::block::{BlockDevice, DeviceRole, SECTOR_SIZE};
use crate::config::{PAGE_SIZE, SECTORS_PER_PAGE};

const BITS_PER_WORD: usize = 64;

pub struct SwapTable {
    device: Arc<dyn BlockDevice>,
    words: Vec<u64>,
    slots: usize,
}

impl SwapTable {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        assert_eq!(device.role(), DeviceRole::Swap);
        let slots = device.num_sectors() as usize / SECTORS_PER_PAGE;
        Self {
            device,
            words: alloc::vec![0u64; (slots + BITS_PER_WORD - 1) / BITS_PER_WORD],
            slots,
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn is_set(&self, slot: usize) -> bool {
        self.words[slot / BITS_PER_WORD] & (1u64 << (slot % BITS_PER_WORD)) != 0
    }

    pub fn used_slots(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Writes a page out, claiming the first free slot. Running out of
    /// swap while holding a dirty page has no recovery.
    pub fn store(&mut self, page: &[u8]) -> usize {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let slot = (0..self.slots)
            .find(|&s| !self.is_set(s))
            .unwrap_or_else(|| panic!("swap is full"));
        self.words[slot / BITS_PER_WORD] |= 1u64 << (slot % BITS_PER_WORD);

        for i in 0..SECTORS_PER_PAGE {
            let sector = (slot * SECTORS_PER_PAGE + i) as u32;
            self.device
                .write_sector(sector, &page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
        }
        trace!("swapped page out to slot {}", slot);
        slot
    }

    /// Reads the page held in `slot` back and frees the slot.
    pub fn load(&mut self, slot: usize, page: &mut [u8]) {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        assert!(self.is_set(slot), "loading empty swap slot {}", slot);
        for i in 0..SECTORS_PER_PAGE {
            let sector = (slot * SECTORS_PER_PAGE + i) as u32;
            self.device
                .read_sector(sector, &mut page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
        }
        self.clear(slot);
    }

    /// Frees `slot` without reading it; used when a process dies with
    /// pages still swapped out.
    pub fn clear(&mut self, slot: usize) {
        self.words[slot / BITS_PER_WORD] &= !(1u64 << (slot % BITS_PER_WORD));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::RamDisk;
    use alloc::vec;

    #[test]
    fn store_load_round_trip() {
        let device = Arc::new(RamDisk::new(64, DeviceRole::Swap));
        let mut swap = SwapTable::new(device);
        assert_eq!(swap.slots(), 8);

        let page = vec![0xA7u8; PAGE_SIZE];
        let slot = swap.store(&page);
        assert!(swap.is_set(slot));

        let mut back = vec![0u8; PAGE_SIZE];
        swap.load(slot, &mut back);
        assert_eq!(page, back);
        assert!(!swap.is_set(slot), "load frees the slot");
    }

    #[test]
    fn slots_are_reused_after_clear() {
        let device = Arc::new(RamDisk::new(16, DeviceRole::Swap));
        let mut swap = SwapTable::new(device);
        assert_eq!(swap.slots(), 2);
        let page = vec![1u8; PAGE_SIZE];
        let a = swap.store(&page);
        let b = swap.store(&page);
        assert_ne!(a, b);
        assert_eq!(swap.used_slots(), 2);
        swap.clear(a);
        assert_eq!(swap.store(&page), a);
    }

    #[test]
    #[should_panic(expected = "swap is full")]
    fn exhaustion_is_fatal() {
        let device = Arc::new(RamDisk::new(8, DeviceRole::Swap));
        let mut swap = SwapTable::new(device);
        let page = vec![0u8; PAGE_SIZE];
        swap.store(&page);
        swap.store(&page);
    }
}
