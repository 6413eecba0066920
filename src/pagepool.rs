// Copyright The tee-core Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Backing storage for the per-core channel pages.

use zerocopy::FromZeros;

/// Size in bytes of one channel page. Pages are also aligned to this.
pub const PAGE_SIZE: usize = 4096;

/// A page-aligned buffer shared with the firmware layer below.
#[derive(FromZeros)]
#[repr(C, align(4096))]
pub struct ChannelPage([u8; PAGE_SIZE]);

impl ChannelPage {
    /// Creates a zeroed page.
    pub const fn new() -> Self {
        Self([0; PAGE_SIZE])
    }

    /// Returns the virtual address of the page.
    pub fn address(&self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Returns the page contents.
    pub fn bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.0
    }

    /// Returns the page contents mutably.
    pub fn bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.0
    }
}

impl Default for ChannelPage {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out pages from a fixed region, one at a time, never taking them back.
///
/// Channel pages stay registered with the firmware layer for the lifetime of
/// the system, so there is no free operation.
pub struct PagePool {
    pages: &'static mut [ChannelPage],
}

impl PagePool {
    /// Creates a pool handing out the given pages.
    pub fn new(pages: &'static mut [ChannelPage]) -> Self {
        Self { pages }
    }

    /// Takes one page from the pool, or `None` if it is empty.
    pub fn alloc(&mut self) -> Option<&'static mut ChannelPage> {
        let pages = core::mem::take(&mut self.pages);
        let (first, rest) = pages.split_first_mut()?;
        self.pages = rest;
        Some(first)
    }

    /// The number of pages still available.
    pub fn remaining(&self) -> usize {
        self.pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::leak_pages;

    #[test]
    fn pages_are_aligned() {
        let pool_pages = leak_pages(2);
        assert_eq!(pool_pages[0].address() % PAGE_SIZE, 0);
        assert_eq!(pool_pages[1].address() % PAGE_SIZE, 0);
    }

    #[test]
    fn alloc_until_empty() {
        let mut pool = PagePool::new(leak_pages(2));
        assert_eq!(pool.remaining(), 2);

        let first = pool.alloc().unwrap();
        let second = pool.alloc().unwrap();
        assert_ne!(first.address(), second.address());
        assert_eq!(pool.remaining(), 0);
        assert!(pool.alloc().is_none());
    }

    #[test]
    fn pages_start_zeroed() {
        let mut pool = PagePool::new(leak_pages(1));
        let page = pool.alloc().unwrap();
        assert!(page.bytes().iter().all(|&b| b == 0));
    }
}
