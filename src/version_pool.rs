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

//! Size-classed version pool
//!
//! Carves [`PagePool`] pages into fixed-size payload slots per power-of-two
//! size class and keeps a free-list stack per class. Version headers are
//! addressed by dense `u32` indices, which double as the chain links that
//! commit-time splicing CASes on.
//!
//! Inlined slots are ordinary slots adopted by a row head at table creation;
//! they are claimed by status CAS instead of the free list and return to the
//! claimable state on deallocation.

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::page_pool::{PagePool, PAGE_SIZE};
use crate::version::{Rv, Version};

/// Number of version size classes.
pub const VERSION_CLASS_COUNT: usize = 8;

const MIN_CLASS_SHIFT: u32 = 6; // class 0 holds 64-byte payloads

/// Slab pool for row versions, backed by the page pool.
pub struct VersionPool {
    pages: PagePool,
    slots: Box<[Version]>,
    free: [Mutex<Vec<u32>>; VERSION_CLASS_COUNT],
    class_totals: [u32; VERSION_CLASS_COUNT],
}

impl VersionPool {
    /// Payload capacity of a size class.
    #[inline]
    pub fn class_to_size(cls: u8) -> u64 {
        1u64 << (MIN_CLASS_SHIFT + cls as u32)
    }

    /// Smallest class that fits `size` bytes, if any.
    #[inline]
    pub fn size_to_class(size: u64) -> Option<u8> {
        for cls in 0..VERSION_CLASS_COUNT as u8 {
            if size <= Self::class_to_size(cls) {
                return Some(cls);
            }
        }
        None
    }

    /// Largest payload any class can hold.
    pub fn max_data_size() -> u64 {
        Self::class_to_size(VERSION_CLASS_COUNT as u8 - 1)
    }

    /// Builds the pool by distributing every page of `pages` round-robin
    /// across the size classes and carving each into slots.
    pub fn new(pages: PagePool) -> Result<Self> {
        let mut slots: Vec<Version> = Vec::new();
        let mut free: [Vec<u32>; VERSION_CLASS_COUNT] = std::array::from_fn(|_| Vec::new());
        let mut class_totals = [0u32; VERSION_CLASS_COUNT];

        let mut cls = 0usize;
        while let Some(page) = pages.allocate() {
            let slot_size = Self::class_to_size(cls as u8) as usize;
            let count = PAGE_SIZE / slot_size;
            for i in 0..count {
                let data = unsafe { page.as_ptr().add(i * slot_size) };
                let index = slots.len() as u32;
                slots.push(Version::new_slot(cls as u8, data, slot_size as u32));
                free[cls].push(index);
            }
            class_totals[cls] += count as u32;
            cls = (cls + 1) % VERSION_CLASS_COUNT;
        }

        if slots.is_empty() {
            return Err(Error::PoolExhausted);
        }

        log::debug!(
            "version pool: {} slots across {} classes",
            slots.len(),
            VERSION_CLASS_COUNT
        );

        Ok(Self {
            pages,
            slots: slots.into_boxed_slice(),
            free: free.map(Mutex::new),
            class_totals,
        })
    }

    /// Resolves a version handle.
    #[inline]
    pub fn get(&self, rv: Rv) -> &Version {
        &self.slots[rv.index()]
    }

    /// Allocates a slot whose class fits `data_size`. Returns `None` when
    /// the size exceeds every class or the class is exhausted.
    pub fn allocate(&self, data_size: u64) -> Option<Rv> {
        let cls = Self::size_to_class(data_size)?;
        let index = self.free[cls as usize].lock().pop()?;
        let slot = &self.slots[index as usize];
        slot.reset(data_size as u32);
        Some(Rv(index))
    }

    /// Returns a slot to its class free list, or releases an inlined slot
    /// back to its claimable state.
    pub fn deallocate(&self, rv: Rv) {
        let slot = self.get(rv);
        slot.reset(0);
        if !slot.is_inlined() {
            self.free[slot.size_cls() as usize].lock().push(rv.raw());
        }
    }

    /// Permanently dedicates a slot to a row head as its inlined version.
    /// The slot leaves the free-list economy; ownership moves through
    /// status claims from then on.
    pub(crate) fn adopt_inlined(&self, rv: Rv) {
        self.get(rv).mark_inlined();
    }

    /// Free slot count of one class.
    pub fn free_slot_count(&self, cls: u8) -> usize {
        self.free[cls as usize].lock().len()
    }

    /// Total slot count of one class.
    pub fn class_total(&self, cls: u8) -> u32 {
        self.class_totals[cls as usize]
    }

    /// The backing page pool.
    pub fn page_pool(&self) -> &PagePool {
        &self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::VersionStatus;

    fn pool_with_pages(pages: u64) -> VersionPool {
        VersionPool::new(PagePool::new(pages * PAGE_SIZE as u64, 0).unwrap()).unwrap()
    }

    #[test]
    fn test_class_sizing() {
        assert_eq!(VersionPool::class_to_size(0), 64);
        assert_eq!(VersionPool::class_to_size(1), 128);
        assert_eq!(VersionPool::size_to_class(1), Some(0));
        assert_eq!(VersionPool::size_to_class(64), Some(0));
        assert_eq!(VersionPool::size_to_class(65), Some(1));
        assert_eq!(
            VersionPool::size_to_class(VersionPool::max_data_size()),
            Some(VERSION_CLASS_COUNT as u8 - 1)
        );
        assert_eq!(
            VersionPool::size_to_class(VersionPool::max_data_size() + 1),
            None
        );
    }

    #[test]
    fn test_allocate_sets_size_and_resets() {
        let pool = pool_with_pages(1);
        let rv = pool.allocate(8).unwrap();
        let slot = pool.get(rv);
        assert_eq!(slot.data_size(), 8);
        assert_eq!(slot.status(), VersionStatus::Invalid);
        assert_eq!(slot.older(), None);
        assert!(!slot.is_deleted());
    }

    #[test]
    fn test_missing_class_yields_none() {
        // One page only builds the class-0 slab.
        let pool = pool_with_pages(1);
        assert!(pool.allocate(64).is_some());
        assert!(pool.allocate(65).is_none());
    }

    #[test]
    fn test_deallocate_recycles_slot() {
        let pool = pool_with_pages(1);
        let before = pool.free_slot_count(0);
        let rv = pool.allocate(16).unwrap();
        assert_eq!(pool.free_slot_count(0), before - 1);
        pool.deallocate(rv);
        assert_eq!(pool.free_slot_count(0), before);
    }

    #[test]
    fn test_inlined_slot_stays_out_of_free_list() {
        let pool = pool_with_pages(1);
        let rv = pool.allocate(16).unwrap();
        pool.adopt_inlined(rv);
        let before = pool.free_slot_count(0);
        pool.deallocate(rv);
        assert_eq!(pool.free_slot_count(0), before);
        // Released inlined slots become claimable again.
        assert!(pool
            .get(rv)
            .claim_status(VersionStatus::Invalid, VersionStatus::Pending));
    }

    #[test]
    fn test_exhaustion() {
        let pool = pool_with_pages(1);
        let total = pool.class_total(0);
        let mut held = Vec::new();
        while let Some(rv) = pool.allocate(64) {
            held.push(rv);
        }
        assert_eq!(held.len(), total as usize);
        assert!(pool.allocate(64).is_none());
        pool.deallocate(held.pop().unwrap());
        assert!(pool.allocate(64).is_some());
    }
}
