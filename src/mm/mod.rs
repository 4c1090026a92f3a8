//! Memory management
//!
//! Demand paging over a fixed pool of user physical pages. [`Vm`] owns
//! the pool, the frame table, the swap table and every process's page
//! directory and supplemental page table; the kernel wraps it in one
//! lock, so fault resolution, frame allocation and eviction are
//! mutually exclusive. The filesystem lock may be taken while resolving
//! a file-backed fault, never the other way around.

mod address;
mod frame_table;
mod page_table;
mod spt;
mod swap;
mod user_pool;

pub use address::{PhysPageNum, VirtAddr, VirtPageNum};
pub use frame_table::FrameTable;
pub use page_table::{PageTable, PageTableEntry, PteFlags};
pub use spt::{FileOrigin, PageLoc, PageSlot, SupPageTable};
pub use swap::SwapTable;
pub use user_pool::UserPool;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::block::BlockDevice;
use crate::config::{PAGE_SIZE, STACK_LIMIT, STACK_SLOP, USER_TOP};
use crate::fs::file::File;
use crate::fs::FileSys;
use crate::kerror::{KernelError, KernelResult};
use crate::task::Pid;

bitflags! {
    /// decoded page-fault error code
    pub struct FaultFlags: u8 {
        /// set: protection violation on a present page;
        /// clear: the page was not present
        const PRESENT = 1 << 0;
        /// the access was a write
        const WRITE = 1 << 1;
        /// the access came from user mode
        const USER = 1 << 2;
    }
}

/// One process's view of memory.
pub struct ProcVm {
    pub pagedir: PageTable,
    pub spt: SupPageTable,
}

/// The VM core; every entry point runs under the kernel's VM lock.
pub struct Vm {
    pool: UserPool,
    frames: FrameTable,
    swap: SwapTable,
    procs: BTreeMap<Pid, ProcVm>,
    fault_cnt: u64,
}

impl Vm {
    /// Sizes the frame table to the user pool: frame `i` is pool page `i`.
    pub fn new(user_pages: usize, swap_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            pool: UserPool::new(user_pages),
            frames: FrameTable::new(user_pages),
            swap: SwapTable::new(swap_device),
            procs: BTreeMap::new(),
            fault_cnt: 0,
        }
    }

    /// Registers a fresh process with an empty address space.
    pub fn attach(&mut self, pid: Pid) {
        self.procs.insert(
            pid,
            ProcVm {
                pagedir: PageTable::new(),
                spt: SupPageTable::new(),
            },
        );
    }

    /// Tears a process's memory down: resident pages go back to the
    /// pool, swapped pages free their slots, file-backed pages need no
    /// work (the filesystem owns their bytes).
    pub fn detach(&mut self, pid: Pid) {
        let Some(mut pv) = self.procs.remove(&pid) else {
            return;
        };
        for (vpn, slot) in pv.spt.drain() {
            match slot.loc {
                PageLoc::Frame(ppn) => {
                    pv.pagedir.clear(vpn);
                    self.frames.clear(ppn);
                    self.pool.release(ppn);
                }
                PageLoc::Swap(idx) => self.swap.clear(idx),
                PageLoc::File => {}
            }
        }
    }

    pub fn proc_vm(&self, pid: Pid) -> Option<&ProcVm> {
        self.procs.get(&pid)
    }

    pub fn fault_count(&self) -> u64 {
        self.fault_cnt
    }

    pub fn free_frames(&self) -> usize {
        self.pool.free_pages()
    }

    pub fn frame_owner(&self, ppn: PhysPageNum) -> Option<(Pid, VirtPageNum)> {
        self.frames.owner(ppn)
    }

    pub fn swap_slot_set(&self, slot: usize) -> bool {
        self.swap.is_set(slot)
    }

    pub fn swap_used(&self) -> usize {
        self.swap.used_slots()
    }

    /// Loader-facing: registers one file-backed page. `read_bytes` of
    /// the file starting at `offset` fill the front of the page; the
    /// rest reads as zero.
    pub fn map_segment(
        &mut self,
        pid: Pid,
        file: &Arc<File>,
        offset: usize,
        read_bytes: usize,
        vpn: VirtPageNum,
        writable: bool,
    ) -> bool {
        debug_assert!(read_bytes <= PAGE_SIZE);
        let Some(pv) = self.procs.get_mut(&pid) else {
            return false;
        };
        pv.spt.insert(
            vpn,
            PageSlot {
                loc: PageLoc::File,
                origin: Some(FileOrigin {
                    file: Arc::clone(file),
                    offset,
                    read_bytes,
                }),
                writable,
            },
        )
    }

    /// The user-pointer validation policy: non-null, below the
    /// user/kernel boundary, and either tracked by the process or
    /// within the stack-growth window of its saved stack pointer.
    pub fn check_user_ptr(&self, pid: Pid, addr: usize, user_esp: usize) -> KernelResult<()> {
        let mapped = addr != 0 && addr < USER_TOP && {
            let vpn = VirtAddr(addr).floor();
            self.procs.get(&pid).map_or(false, |pv| pv.spt.contains(vpn))
                || addr >= user_esp.saturating_sub(STACK_SLOP)
        };
        if mapped {
            Ok(())
        } else {
            Err(KernelError::BadAddress { addr })
        }
    }

    /// Resolves one fault: distinguishes stack growth, a file-backed
    /// page, and a swapped page; evicts when the pool is dry. An error
    /// means the faulting process must die.
    pub fn handle_fault(
        &mut self,
        fs: &FileSys,
        pid: Pid,
        addr: VirtAddr,
        flags: FaultFlags,
        user_esp: usize,
    ) -> KernelResult<()> {
        self.fault_cnt += 1;
        let upage = addr.floor();

        let has_slot = self
            .procs
            .get(&pid)
            .map_or(false, |pv| pv.spt.contains(upage));
        let stack_growth = !has_slot && addr.0 >= user_esp.saturating_sub(STACK_SLOP);

        // writing a read-only page, kernel addresses, and unbacked
        // addresses that are not stack growth all kill the process
        if flags.contains(FaultFlags::PRESENT) {
            return Err(KernelError::WriteViolation { addr: addr.0 });
        }
        if addr.0 >= USER_TOP || !self.procs.contains_key(&pid) {
            return Err(KernelError::BadAddress { addr: addr.0 });
        }
        if !has_slot && !stack_growth {
            return Err(KernelError::BadAddress { addr: addr.0 });
        }

        let ppn = match self.pool.acquire() {
            Some(ppn) => ppn,
            None => self.evict(),
        };

        if stack_growth {
            if addr.0 < USER_TOP - STACK_LIMIT {
                self.pool.release(ppn);
                return Err(KernelError::StackOverflow { addr: addr.0 });
            }
            let pv = self.procs.get_mut(&pid).unwrap();
            if !pv.pagedir.install(upage, ppn, true) {
                self.pool.release(ppn);
                return Err(KernelError::BadAddress { addr: addr.0 });
            }
            // always dirty: a fresh stack page has no backing store yet
            pv.pagedir.set_dirty(upage, true);
            pv.spt.insert(
                upage,
                PageSlot {
                    loc: PageLoc::Frame(ppn),
                    origin: None,
                    writable: true,
                },
            );
            self.frames.set(ppn, pid, upage);
            return Ok(());
        }

        let (loc, origin, writable) = {
            let slot = self.procs.get(&pid).unwrap().spt.get(upage).unwrap();
            (slot.loc.clone(), slot.origin.clone(), slot.writable)
        };

        let mut from_swap = false;
        match loc {
            PageLoc::File => {
                if let Some(origin) = &origin {
                    let _fs_guard = fs.lock();
                    let page = self.pool.page_mut(ppn);
                    origin.file.read_at(&mut page[..origin.read_bytes], origin.offset);
                }
                // the tail past read_bytes stays zero: frames arrive zeroed
            }
            PageLoc::Swap(idx) => {
                self.swap.load(idx, self.pool.page_mut(ppn));
                from_swap = true;
            }
            PageLoc::Frame(_) => {
                // not-present fault on a page recorded as resident
                self.pool.release(ppn);
                return Err(KernelError::BadAddress { addr: addr.0 });
            }
        }

        let pv = self.procs.get_mut(&pid).unwrap();
        if !pv.pagedir.install(upage, ppn, writable) {
            self.pool.release(ppn);
            return Err(KernelError::BadAddress { addr: addr.0 });
        }
        pv.spt.get_mut(upage).unwrap().loc = PageLoc::Frame(ppn);
        if from_swap {
            // contents may already differ from the on-disk original
            pv.pagedir.set_dirty(upage, true);
        }
        self.frames.set(ppn, pid, upage);
        Ok(())
    }

    /// Clock eviction. Clears accessed bits as it sweeps and takes the
    /// first frame whose bit was already clear; dirty victims go to
    /// swap, clean ones fall back to their file origin. Returns the
    /// zeroed, reusable page.
    fn evict(&mut self) -> PhysPageNum {
        let Self {
            pool,
            frames,
            swap,
            procs,
            ..
        } = self;

        let (ppn, pid, vpn) = frames
            .pick_victim(|pid, vpn| match procs.get_mut(&pid) {
                Some(pv) if pv.pagedir.is_accessed(vpn) => {
                    pv.pagedir.set_accessed(vpn, false);
                    true
                }
                _ => false,
            })
            .unwrap_or_else(|| panic!("out of user memory and nothing to evict"));

        let pv = procs.get_mut(&pid).unwrap();
        let dirty = pv.pagedir.is_dirty(vpn);
        let slot = pv.spt.get_mut(vpn).unwrap();
        if dirty {
            slot.loc = PageLoc::Swap(swap.store(pool.page(ppn)));
        } else {
            // the filesystem still holds the authoritative copy
            debug_assert!(slot.origin.is_some());
            slot.loc = PageLoc::File;
        }
        pv.pagedir.clear(vpn);
        frames.clear(ppn);
        pool.page_mut(ppn).fill(0);
        trace!("evicted {:?} of process {}", vpn, pid);
        ppn
    }

    /// Translates `vpn`, faulting the page in first when needed.
    fn ensure_resident(
        &mut self,
        fs: &FileSys,
        pid: Pid,
        vpn: VirtPageNum,
        user_esp: usize,
    ) -> KernelResult<PageTableEntry> {
        match self.procs.get(&pid) {
            Some(pv) => {
                if let Some(pte) = pv.pagedir.translate(vpn) {
                    return Ok(pte);
                }
            }
            None => return Err(KernelError::BadAddress { addr: vpn.base().0 }),
        }
        self.handle_fault(fs, pid, vpn.base(), FaultFlags::empty(), user_esp)?;
        Ok(self
            .procs
            .get(&pid)
            .unwrap()
            .pagedir
            .translate(vpn)
            .unwrap())
    }

    /// Copies `len` bytes out of user memory, faulting pages in along
    /// the way as a user load would.
    pub fn copy_in(
        &mut self,
        fs: &FileSys,
        pid: Pid,
        addr: VirtAddr,
        len: usize,
        user_esp: usize,
    ) -> KernelResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(len);
        while bytes.len() < len {
            let va = VirtAddr(addr.0 + bytes.len());
            let vpn = va.floor();
            let offset = va.page_offset();
            let chunk = (len - bytes.len()).min(PAGE_SIZE - offset);

            let pte = self.ensure_resident(fs, pid, vpn, user_esp)?;
            bytes.extend_from_slice(&self.pool.page(pte.ppn)[offset..offset + chunk]);
            self.procs
                .get_mut(&pid)
                .unwrap()
                .pagedir
                .set_accessed(vpn, true);
        }
        Ok(bytes)
    }

    /// Copies into user memory the way a user store would: pages fault
    /// in on demand, and a read-only destination is a violation.
    pub fn copy_out(
        &mut self,
        fs: &FileSys,
        pid: Pid,
        addr: VirtAddr,
        bytes: &[u8],
        user_esp: usize,
    ) -> KernelResult<()> {
        let mut copied = 0;
        while copied < bytes.len() {
            let va = VirtAddr(addr.0 + copied);
            let vpn = va.floor();
            let offset = va.page_offset();
            let chunk = (bytes.len() - copied).min(PAGE_SIZE - offset);

            let pte = self.ensure_resident(fs, pid, vpn, user_esp)?;
            if !pte.writable() {
                return Err(KernelError::WriteViolation { addr: va.0 });
            }
            self.pool.page_mut(pte.ppn)[offset..offset + chunk]
                .copy_from_slice(&bytes[copied..copied + chunk]);
            let pd = &mut self.procs.get_mut(&pid).unwrap().pagedir;
            pd.set_accessed(vpn, true);
            pd.set_dirty(vpn, true);
            copied += chunk;
        }
        Ok(())
    }

    /// Reads a NUL-terminated string from user memory, up to `max` bytes.
    pub fn copy_in_cstr(
        &mut self,
        fs: &FileSys,
        pid: Pid,
        addr: VirtAddr,
        max: usize,
        user_esp: usize,
    ) -> KernelResult<String> {
        let mut bytes = Vec::new();
        let mut va = addr.0;
        loop {
            let vpn = VirtAddr(va).floor();
            let offset = VirtAddr(va).page_offset();
            let pte = self.ensure_resident(fs, pid, vpn, user_esp)?;
            let page = self.pool.page(pte.ppn);
            for &b in &page[offset..] {
                if b == 0 {
                    return String::from_utf8(bytes).map_err(|_| KernelError::NotFound);
                }
                bytes.push(b);
                if bytes.len() > max {
                    return Err(KernelError::BadAddress { addr: va });
                }
            }
            va = vpn.base().0 + PAGE_SIZE;
        }
    }
}
