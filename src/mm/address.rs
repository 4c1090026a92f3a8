//! Address and page-number newtypes

use crate::config::{PAGE_SIZE, PAGE_SIZE_BITS};

/// user virtual address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct VirtAddr(pub usize);

/// user virtual page number
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct VirtPageNum(pub usize);

/// physical page number into the user pool
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct PhysPageNum(pub usize);

impl VirtAddr {
    /// Round down to the containing page.
    pub fn floor(self) -> VirtPageNum {
        VirtPageNum(self.0 >> PAGE_SIZE_BITS)
    }
    pub fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl VirtPageNum {
    /// First address of the page.
    pub fn base(self) -> VirtAddr {
        VirtAddr(self.0 << PAGE_SIZE_BITS)
    }
}

impl From<usize> for VirtAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

impl From<usize> for VirtPageNum {
    fn from(vpn: usize) -> Self {
        Self(vpn)
    }
}
