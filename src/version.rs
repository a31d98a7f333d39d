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

//! Row versions and row heads
//!
//! A [`Version`] is one record in a row's singly-linked version chain:
//! newest first, anchored at the [`RowHead`] sentinel, terminated by a nil
//! link. Chain links are pool indices updated with compare-and-swap, so
//! concurrent committers linearize without locks.
//!
//! Lifecycle of a version: allocated Invalid, stamped and flipped to
//! Pending by its creator, spliced into a chain at commit, then published
//! as Committed or Deleted, or left chained as Aborted. Status moves one
//! way; `rts` only grows; `older` never changes once the version is
//! published.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::timestamp::{AtomicStamp, Timestamp};

/// Nil chain link.
pub(crate) const NIL: u32 = u32::MAX;

/// Handle to a version slot inside the [`crate::VersionPool`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rv(pub(crate) u32);

impl Rv {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Rv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rv({})", self.0)
    }
}

#[inline]
pub(crate) fn link_to_option(raw: u32) -> Option<Rv> {
    if raw == NIL {
        None
    } else {
        Some(Rv(raw))
    }
}

#[inline]
pub(crate) fn option_to_link(rv: Option<Rv>) -> u32 {
    match rv {
        Some(rv) => rv.raw(),
        None => NIL,
    }
}

/// Lifecycle status of a row version.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum VersionStatus {
    /// Slot is not in use (or an inlined slot waiting to be claimed).
    Invalid = 0,
    /// Exclusively owned by its creator transaction; outcome undecided.
    Pending = 1,
    /// Visible to transactions with a later timestamp.
    Committed = 2,
    /// Committed tombstone; the row reads as nonexistent at and after it.
    Deleted = 3,
    /// Creator aborted; invisible, awaiting garbage collection.
    Aborted = 4,
}

impl VersionStatus {
    #[inline]
    fn from_u8(raw: u8) -> VersionStatus {
        match raw {
            1 => VersionStatus::Pending,
            2 => VersionStatus::Committed,
            3 => VersionStatus::Deleted,
            4 => VersionStatus::Aborted,
            _ => VersionStatus::Invalid,
        }
    }
}

/// One version record.
///
/// The payload lives in page-pool memory addressed by `data`. While the
/// version is Pending and unchained it is exclusively owned by its creator,
/// which may fill the payload; once the status is published with release
/// ordering, readers acquire-load the status before touching the bytes.
pub struct Version {
    wts: AtomicStamp,
    pub(crate) rts: AtomicStamp,
    status: AtomicU8,
    deleted: AtomicBool,
    inlined: AtomicBool,
    size_cls: u8,
    data_size: AtomicU32,
    pub(crate) older: AtomicU32,
    data: *mut u8,
    data_cap: u32,
}

// Payload exclusivity is enforced by the version lifecycle (see above), so
// sharing the raw pointer across threads is sound.
unsafe impl Send for Version {}
unsafe impl Sync for Version {}

impl Version {
    pub(crate) fn new_slot(size_cls: u8, data: *mut u8, data_cap: u32) -> Self {
        Self {
            wts: AtomicStamp::new(Timestamp::ZERO),
            rts: AtomicStamp::new(Timestamp::ZERO),
            status: AtomicU8::new(VersionStatus::Invalid as u8),
            deleted: AtomicBool::new(false),
            inlined: AtomicBool::new(false),
            size_cls,
            data_size: AtomicU32::new(0),
            older: AtomicU32::new(NIL),
            data,
            data_cap,
        }
    }

    /// Write timestamp: the creator transaction's timestamp.
    #[inline]
    pub fn wts(&self) -> Timestamp {
        self.wts.get()
    }

    #[inline]
    pub(crate) fn set_wts(&self, ts: Timestamp) {
        self.wts.set(ts);
    }

    /// Read timestamp: the maximum timestamp of any reader that observed
    /// this version. Monotone.
    #[inline]
    pub fn rts(&self) -> Timestamp {
        self.rts.get()
    }

    #[inline]
    pub fn status(&self) -> VersionStatus {
        VersionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Publishes a status transition. Release ordering makes all payload
    /// writes visible to readers that acquire the new status.
    #[inline]
    pub(crate) fn set_status(&self, status: VersionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Claims a status transition, used to take ownership of an inlined
    /// slot (`Invalid -> Pending`).
    #[inline]
    pub(crate) fn claim_status(&self, from: VersionStatus, to: VersionStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Tombstone flag carried by delete versions.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_deleted(&self, deleted: bool) {
        self.deleted.store(deleted, Ordering::Release);
    }

    /// Whether this slot is a row head's inlined version slot.
    #[inline]
    pub fn is_inlined(&self) -> bool {
        self.inlined.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_inlined(&self) {
        self.inlined.store(true, Ordering::Relaxed);
    }

    /// Size class of the backing slot.
    #[inline]
    pub fn size_cls(&self) -> u8 {
        self.size_cls
    }

    /// Payload length in bytes.
    #[inline]
    pub fn data_size(&self) -> u64 {
        self.data_size.load(Ordering::Acquire) as u64
    }

    pub(crate) fn set_data_size(&self, size: u32) {
        debug_assert!(size <= self.data_cap);
        self.data_size.store(size, Ordering::Release);
    }

    /// Payload bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        let len = self.data_size.load(Ordering::Acquire) as usize;
        unsafe { std::slice::from_raw_parts(self.data, len) }
    }

    /// Mutable payload bytes.
    ///
    /// # Safety
    ///
    /// The caller must exclusively own this version: it is Pending and has
    /// not been published to any chain another thread could traverse, or it
    /// has been chained but no concurrent reader can trust it before the
    /// status release-store.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data_mut(&self) -> &mut [u8] {
        let len = self.data_size.load(Ordering::Relaxed) as usize;
        std::slice::from_raw_parts_mut(self.data, len)
    }

    /// Next-older version in the chain, if any.
    #[inline]
    pub fn older(&self) -> Option<Rv> {
        link_to_option(self.older.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_older(&self, rv: Option<Rv>) {
        self.older.store(option_to_link(rv), Ordering::Release);
    }

    /// Resets a slot for reuse. Only valid while the pool owns it.
    pub(crate) fn reset(&self, data_size: u32) {
        self.wts.set(Timestamp::ZERO);
        self.rts.set(Timestamp::ZERO);
        self.deleted.store(false, Ordering::Relaxed);
        self.data_size.store(data_size, Ordering::Relaxed);
        self.older.store(NIL, Ordering::Relaxed);
        self.status
            .store(VersionStatus::Invalid as u8, Ordering::Release);
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Version")
            .field("wts", &self.wts())
            .field("rts", &self.rts())
            .field("status", &self.status())
            .field("deleted", &self.is_deleted())
            .field("data_size", &self.data_size())
            .field("older", &self.older())
            .finish()
    }
}

/// Sentinel anchoring a row's version chain.
///
/// `older` points at the newest version (possibly Pending mid-commit). When
/// the column family inlines, the head additionally owns a dedicated
/// version slot that writers claim for cache-friendly storage.
pub struct RowHead {
    pub(crate) older: AtomicU32,
    inlined_rv: AtomicU32,
}

impl RowHead {
    pub(crate) fn new() -> Self {
        Self {
            older: AtomicU32::new(NIL),
            inlined_rv: AtomicU32::new(NIL),
        }
    }

    /// Newest version of the row, if any.
    #[inline]
    pub fn older(&self) -> Option<Rv> {
        link_to_option(self.older.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_older(&self, rv: Option<Rv>) {
        self.older.store(option_to_link(rv), Ordering::Release);
    }

    /// The head's dedicated inlined slot, when the column family inlines.
    #[inline]
    pub fn inlined_rv(&self) -> Option<Rv> {
        link_to_option(self.inlined_rv.load(Ordering::Acquire))
    }

    pub(crate) fn set_inlined_rv(&self, rv: Rv) {
        self.inlined_rv.store(rv.raw(), Ordering::Release);
    }
}

impl Default for RowHead {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            VersionStatus::Invalid,
            VersionStatus::Pending,
            VersionStatus::Committed,
            VersionStatus::Deleted,
            VersionStatus::Aborted,
        ] {
            assert_eq!(VersionStatus::from_u8(status as u8), status);
        }
    }

    #[test]
    fn test_link_encoding() {
        assert_eq!(link_to_option(NIL), None);
        assert_eq!(link_to_option(7), Some(Rv(7)));
        assert_eq!(option_to_link(None), NIL);
        assert_eq!(option_to_link(Some(Rv(7))), 7);
    }

    #[test]
    fn test_version_slot_lifecycle() {
        let mut backing = [0u8; 64];
        let slot = Version::new_slot(0, backing.as_mut_ptr(), 64);
        assert_eq!(slot.status(), VersionStatus::Invalid);

        slot.reset(8);
        slot.set_wts(Timestamp::from_parts(5, 0));
        slot.rts.set(Timestamp::from_parts(5, 0));
        slot.set_status(VersionStatus::Pending);

        unsafe { slot.data_mut() }.fill(0xAB);
        slot.set_status(VersionStatus::Committed);

        assert_eq!(slot.data(), &[0xAB; 8]);
        assert_eq!(slot.data_size(), 8);
        assert_eq!(slot.wts(), Timestamp::from_parts(5, 0));
        assert!(!slot.is_deleted());
    }

    #[test]
    fn test_claim_status_single_winner() {
        let mut backing = [0u8; 64];
        let slot = Version::new_slot(0, backing.as_mut_ptr(), 64);
        assert!(slot.claim_status(VersionStatus::Invalid, VersionStatus::Pending));
        assert!(!slot.claim_status(VersionStatus::Invalid, VersionStatus::Pending));
    }
}
