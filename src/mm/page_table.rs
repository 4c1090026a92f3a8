//! Per-process page directory
//!
//! A software page table: the fault resolver, the clock evictor and the
//! user-copy path consume exactly the bits an MMU would keep per entry.
//! Install marks a page accessed the way hardware would on the faulting
//! touch; the kernel's own stores through a frame set dirty explicitly.

use alloc::collections::BTreeMap;

use super::address::{PhysPageNum, VirtPageNum};

bitflags! {
    /// page table entry flags
    pub struct PteFlags: u8 {
        /// present
        const P = 1 << 0;
        /// writable
        const W = 1 << 1;
        /// user accessible
        const U = 1 << 2;
        /// accessed since last cleared
        const A = 1 << 3;
        /// written since installed
        const D = 1 << 4;
    }
}

/// page table entry structure
#[derive(Clone, Copy)]
pub struct PageTableEntry {
    pub ppn: PhysPageNum,
    pub flags: PteFlags,
}

impl PageTableEntry {
    pub fn writable(&self) -> bool {
        self.flags.contains(PteFlags::W)
    }
}

/// page table structure
pub struct PageTable {
    entries: BTreeMap<VirtPageNum, PageTableEntry>,
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Maps `vpn` to `ppn`; fails if a mapping is already present.
    pub fn install(&mut self, vpn: VirtPageNum, ppn: PhysPageNum, writable: bool) -> bool {
        if self.entries.contains_key(&vpn) {
            return false;
        }
        let mut flags = PteFlags::P | PteFlags::U | PteFlags::A;
        if writable {
            flags |= PteFlags::W;
        }
        self.entries.insert(vpn, PageTableEntry { ppn, flags });
        true
    }

    /// Drops the mapping for `vpn`, if any.
    pub fn clear(&mut self, vpn: VirtPageNum) {
        self.entries.remove(&vpn);
    }

    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.entries.get(&vpn).copied()
    }

    pub fn is_mapped(&self, vpn: VirtPageNum) -> bool {
        self.entries.contains_key(&vpn)
    }

    pub fn is_accessed(&self, vpn: VirtPageNum) -> bool {
        self.entries
            .get(&vpn)
            .map_or(false, |e| e.flags.contains(PteFlags::A))
    }

    pub fn set_accessed(&mut self, vpn: VirtPageNum, accessed: bool) {
        if let Some(entry) = self.entries.get_mut(&vpn) {
            entry.flags.set(PteFlags::A, accessed);
        }
    }

    pub fn is_dirty(&self, vpn: VirtPageNum) -> bool {
        self.entries
            .get(&vpn)
            .map_or(false, |e| e.flags.contains(PteFlags::D))
    }

    pub fn set_dirty(&mut self, vpn: VirtPageNum, dirty: bool) {
        if let Some(entry) = self.entries.get_mut(&vpn) {
            entry.flags.set(PteFlags::D, dirty);
        }
    }
}
