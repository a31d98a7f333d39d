// Copyright 2026 Mvocc Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! NUMA-local page pool
//!
//! A fixed contiguous region carved into 2 MiB pages. Free pages are
//! threaded through their own first machine word, forming an intrusive
//! stack; a single test-and-set spinlock serializes allocate/free.
//! Allocation is off the hot path (version slabs are built on top of the
//! pool), so one lock is sufficient.
//!
//! NUMA discovery and huge-page mapping belong to the host; the pool keeps
//! the node id as an observational tag and reserves 2 MiB-aligned heap
//! memory.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Page granularity: 2 MiB, matching huge-page TLB entries.
pub const PAGE_SIZE: usize = 2 * 1024 * 1024;

struct FreeList {
    next: *mut u8,
}

/// Fixed-size pool of 2 MiB pages on one NUMA node.
pub struct PagePool {
    base: NonNull<u8>,
    layout: Layout,
    numa_id: u8,
    total_count: u64,
    free_count: AtomicU64,
    lock: AtomicBool,
    free: UnsafeCell<FreeList>,
}

// The raw region is exclusively managed through the spinlocked free list;
// page contents are handed off to callers on allocate.
unsafe impl Send for PagePool {}
unsafe impl Sync for PagePool {}

impl PagePool {
    /// Reserves a pool of at least `size` bytes on NUMA node `numa_id`,
    /// rounded up to whole pages.
    pub fn new(size: u64, numa_id: u8) -> Result<Self> {
        let page_count = size.div_ceil(PAGE_SIZE as u64).max(1);
        let total = page_count as usize * PAGE_SIZE;

        let layout = Layout::from_size_align(total, PAGE_SIZE)
            .map_err(|_| Error::PoolReservation(total as u64))?;
        let base = unsafe { alloc(layout) };
        let base = NonNull::new(base).ok_or(Error::PoolReservation(total as u64))?;

        // Thread every page through its first word, last page terminates.
        unsafe {
            for i in 0..page_count as usize {
                let page = base.as_ptr().add(i * PAGE_SIZE);
                let next = if i + 1 < page_count as usize {
                    base.as_ptr().add((i + 1) * PAGE_SIZE)
                } else {
                    std::ptr::null_mut()
                };
                *(page as *mut *mut u8) = next;
            }
        }

        log::debug!(
            "initialized page pool on numa node {} with {} pages ({} MiB)",
            numa_id,
            page_count,
            total / (1024 * 1024)
        );

        Ok(Self {
            base,
            layout,
            numa_id,
            total_count: page_count,
            free_count: AtomicU64::new(page_count),
            lock: AtomicBool::new(false),
            free: UnsafeCell::new(FreeList {
                next: base.as_ptr(),
            }),
        })
    }

    #[inline]
    fn acquire(&self) {
        while self.lock.swap(true, Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    #[inline]
    fn release(&self) {
        self.lock.store(false, Ordering::Release);
    }

    /// Pops a page off the free stack. Returns `None` iff the pool is
    /// exhausted.
    pub fn allocate(&self) -> Option<NonNull<u8>> {
        self.acquire();
        let free = unsafe { &mut *self.free.get() };
        let page = free.next;
        if !page.is_null() {
            free.next = unsafe { *(page as *mut *mut u8) };
            self.free_count.fetch_sub(1, Ordering::Relaxed);
        }
        self.release();
        NonNull::new(page)
    }

    /// Pushes a page back onto the free stack.
    ///
    /// The page must have come from [`Self::allocate`] on this pool and must
    /// no longer be referenced.
    pub fn free(&self, page: NonNull<u8>) {
        self.acquire();
        let free = unsafe { &mut *self.free.get() };
        unsafe {
            *(page.as_ptr() as *mut *mut u8) = free.next;
        }
        free.next = page.as_ptr();
        self.free_count.fetch_add(1, Ordering::Relaxed);
        self.release();
    }

    /// NUMA node this pool is bound to.
    pub fn numa_id(&self) -> u8 {
        self.numa_id
    }

    /// Total page count, free or not.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Currently free page count.
    pub fn free_count(&self) -> u64 {
        self.free_count.load(Ordering::Relaxed)
    }
}

impl Drop for PagePool {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.base.as_ptr(), self.layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_up_to_page_multiple() {
        let pool = PagePool::new(1, 0).unwrap();
        assert_eq!(pool.total_count(), 1);
        assert_eq!(pool.free_count(), 1);

        let pool = PagePool::new(PAGE_SIZE as u64 + 1, 0).unwrap();
        assert_eq!(pool.total_count(), 2);
    }

    #[test]
    fn test_allocate_until_exhausted() {
        let pool = PagePool::new(4 * PAGE_SIZE as u64, 0).unwrap();
        let mut pages = Vec::new();
        while let Some(page) = pool.allocate() {
            pages.push(page);
        }
        assert_eq!(pages.len(), 4);
        assert_eq!(pool.free_count(), 0);
        assert!(pool.allocate().is_none());

        // Pages must be distinct and page-aligned.
        for window in pages.windows(2) {
            assert_ne!(window[0], window[1]);
        }
        for page in &pages {
            assert_eq!(page.as_ptr() as usize % PAGE_SIZE, 0);
        }
    }

    #[test]
    fn test_free_makes_page_reusable() {
        let pool = PagePool::new(2 * PAGE_SIZE as u64, 1).unwrap();
        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();
        assert!(pool.allocate().is_none());

        pool.free(a);
        assert_eq!(pool.free_count(), 1);
        let c = pool.allocate().unwrap();
        assert_eq!(a, c);
        assert_eq!(pool.numa_id(), 1);
    }

    #[test]
    fn test_concurrent_allocate_free() {
        use std::sync::Arc;
        use std::thread;

        let pool = Arc::new(PagePool::new(8 * PAGE_SIZE as u64, 0).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..200 {
                        if let Some(page) = pool.allocate() {
                            pool.free(page);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.free_count(), 8);
    }
}
