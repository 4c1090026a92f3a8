//! Supplemental page table
//!
//! Per-process map from user virtual page to where that page's contents
//! live right now: installed in a frame, still in the filesystem, or in
//! a swap slot. Exactly one location is current at any time; pages that
//! started life file-backed keep their [`FileOrigin`] so a clean
//! eviction can point back at the filesystem without copying.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use crate::fs::file::File;

use super::address::{PhysPageNum, VirtPageNum};

/// Where a file-backed page's authoritative bytes come from.
#[derive(Clone)]
pub struct FileOrigin {
    pub file: Arc<File>,
    /// Byte offset of the page's data within the file.
    pub offset: usize,
    /// Bytes to read; the rest of the page is zero.
    pub read_bytes: usize,
}

/// The page's current location.
#[derive(Clone)]
pub enum PageLoc {
    /// Resident at this physical page.
    Frame(PhysPageNum),
    /// Authoritative copy lives in the filesystem at the page's origin.
    File,
    /// Held in this swap slot.
    Swap(usize),
}

pub struct PageSlot {
    pub loc: PageLoc,
    pub origin: Option<FileOrigin>,
    pub writable: bool,
}

pub struct SupPageTable {
    entries: BTreeMap<VirtPageNum, PageSlot>,
}

impl Default for SupPageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SupPageTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn contains(&self, vpn: VirtPageNum) -> bool {
        self.entries.contains_key(&vpn)
    }

    pub fn get(&self, vpn: VirtPageNum) -> Option<&PageSlot> {
        self.entries.get(&vpn)
    }

    pub fn get_mut(&mut self, vpn: VirtPageNum) -> Option<&mut PageSlot> {
        self.entries.get_mut(&vpn)
    }

    /// Registers a page; fails if one is already tracked at `vpn`.
    pub fn insert(&mut self, vpn: VirtPageNum, slot: PageSlot) -> bool {
        if self.entries.contains_key(&vpn) {
            return false;
        }
        self.entries.insert(vpn, slot);
        true
    }

    pub fn remove(&mut self, vpn: VirtPageNum) -> Option<PageSlot> {
        self.entries.remove(&vpn)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes every entry; process teardown walks the result.
    pub fn drain(&mut self) -> alloc::vec::Vec<(VirtPageNum, PageSlot)> {
        core::mem::take(&mut self.entries).into_iter().collect()
    }
}
