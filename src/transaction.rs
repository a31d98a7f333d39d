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

//! Transactions
//!
//! A transaction runs on exactly one worker thread. During execution it
//! accumulates a private access set against versioned rows; no row-level
//! lock is ever taken. Commit sorts the write set, validates the read set,
//! splices pending versions into the row chains with compare-and-swap,
//! re-validates, and publishes by flipping version statuses. Abort leaves
//! spliced versions chained as aborted tombstones for the external garbage
//! collector and frees everything that never went live.
//!
//! Read-set and write-set membership are deliberately asymmetric: a
//! peek-then-write never registers the base read for validation, because
//! the write installs directly below the newest committed version. Only
//! `read_row` creates a validation obligation.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::access::{AccessHandle, AccessItem, AccessState, HandleSlot, PeekOnlyHandle};
use crate::context::Context;
use crate::hh::HeavyHitterAccounter;
use crate::table::{Table, NEW_ROW_ID};
use crate::timestamp::Timestamp;
use crate::version::{Rv, Version, VersionStatus, NIL};

/// Sentinel `data_size` for `write_row`: reuse the read version's size.
pub const DEFAULT_WRITE_DATA_SIZE: u64 = u64::MAX;

/// Outcome of a commit attempt.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CommitResult {
    /// All writes are visible.
    Committed,
    /// An operation failed to acquire a row or version. Never returned by
    /// `commit` itself; reported by the failing operation.
    AbortedByGetRow,
    /// A read-only access changed before the write set was installed.
    AbortedByPreValidation,
    /// Lost the race while splicing a write version into its chain.
    AbortedByDeferredRowVersionInsert,
    /// A read changed after the write set was installed.
    AbortedByMainValidation,
    /// The host's write hook vetoed the commit.
    AbortedByLogging,
    /// The transaction was not in a committable state.
    Invalid,
}

impl CommitResult {
    pub fn is_committed(self) -> bool {
        self == CommitResult::Committed
    }
}

/// Copies the source payload into the destination, respecting sizes.
pub fn trivial_copier(_cf_id: u16, dest: &mut [u8], src: Option<&[u8]>) -> bool {
    if let Some(src) = src {
        debug_assert!(dest.len() >= src.len());
        let n = src.len().min(dest.len());
        dest[..n].copy_from_slice(&src[..n]);
    }
    true
}

/// Succeeds without touching the payload.
pub fn noop_copier(_cf_id: u16, _dest: &mut [u8], _src: Option<&[u8]>) -> bool {
    true
}

const MIX_K: u64 = 0xC6A4_A793_5BD1_E995;

#[inline]
fn mix(h1: u64, h2: u64) -> u64 {
    let h2 = (h2.wrapping_mul(MIX_K) >> 47).wrapping_mul(MIX_K);
    (h1 ^ h2).wrapping_mul(MIX_K)
}

/// Duplicate-access key: table identity, column family, row.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct AccessKey {
    tbl: usize,
    cf_id: u16,
    row_id: u64,
}

impl AccessKey {
    fn new(tbl: &Arc<Table>, cf_id: u16, row_id: u64) -> Self {
        Self {
            tbl: Arc::as_ptr(tbl) as usize,
            cf_id,
            row_id,
        }
    }

    #[inline]
    fn mixed(&self) -> u64 {
        mix(mix(self.tbl as u64, self.cf_id as u64), self.row_id)
    }
}

impl Hash for AccessKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.mixed());
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tbl@{:#x}/cf{}/row{}", self.tbl, self.cf_id, self.row_id)
    }
}

/// Row remembered after an abort for deterministic replay.
#[derive(Clone)]
pub struct ReserveItem {
    pub tbl: Arc<Table>,
    pub cf_id: u16,
    pub row_id: u64,
    pub read_hint: bool,
    pub write_hint: bool,
}

/// A single-worker MV-OCC transaction.
pub struct Transaction {
    ctx: Context,
    began: bool,
    peek_only: bool,
    ts: Timestamp,
    accesses: Vec<AccessItem>,
    iset_idx: Vec<u16>,
    rset_idx: Vec<u16>,
    wset_idx: Vec<u16>,
    access_history: FxHashMap<AccessKey, u16>,
    consecutive_commits: u32,
    consecutive_aborts: u32,
    to_reserve: SmallVec<[ReserveItem; 4]>,
    abort_hh: Option<HeavyHitterAccounter<AccessKey>>,
}

impl Transaction {
    /// Creates a transaction driven through the given worker context.
    pub fn new(ctx: Context) -> Self {
        let max_access_size = ctx.config().max_access_size;
        let bucket_count = ctx.config().access_bucket_root_count;
        let abort_hh = if ctx.config().abort_hh {
            Some(HeavyHitterAccounter::new(ctx.config().abort_hh_size))
        } else {
            None
        };
        Self {
            ctx,
            began: false,
            peek_only: false,
            ts: Timestamp::ZERO,
            accesses: Vec::with_capacity(max_access_size),
            iset_idx: Vec::with_capacity(max_access_size),
            rset_idx: Vec::with_capacity(max_access_size),
            wset_idx: Vec::with_capacity(max_access_size),
            access_history: FxHashMap::with_capacity_and_hasher(bucket_count, Default::default()),
            consecutive_commits: 0,
            consecutive_aborts: 0,
            to_reserve: SmallVec::new(),
            abort_hh,
        }
    }

    /// Starts the transaction, assigning its timestamp.
    ///
    /// The timestamp is strictly greater than any this worker generated
    /// before and, when `causally_after_ts` is given, greater than that as
    /// well. Returns `false` if the transaction is already running.
    pub fn begin(&mut self, peek_only: bool, causally_after_ts: Option<Timestamp>) -> bool {
        if self.began {
            return false;
        }
        self.to_reserve.clear();
        self.ts = self.ctx.begin_timestamp(causally_after_ts);
        self.peek_only = peek_only;
        self.began = true;
        true
    }

    pub fn has_began(&self) -> bool {
        self.began
    }

    pub fn is_peek_only(&self) -> bool {
        self.peek_only
    }

    /// The transaction timestamp.
    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    /// The worker context.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Commits acknowledged since the last abort.
    pub fn consecutive_commits(&self) -> u32 {
        self.consecutive_commits
    }

    /// Rows recorded by `reserve_after_abort` for replay.
    pub fn reserved(&self) -> &[ReserveItem] {
        &self.to_reserve
    }

    /// Dump of the abort heavy-hitter sketch, if enabled.
    pub fn hh_dump(&self) -> Option<String> {
        self.abort_hh.as_ref().map(|hh| hh.dump_stats())
    }

    // Access-set accessors for the logger.

    pub fn access_size(&self) -> u16 {
        self.accesses.len() as u16
    }

    pub fn iset_size(&self) -> u16 {
        self.iset_idx.len() as u16
    }

    pub fn rset_size(&self) -> u16 {
        self.rset_idx.len() as u16
    }

    pub fn wset_size(&self) -> u16 {
        self.wset_idx.len() as u16
    }

    pub fn iset_idx(&self) -> &[u16] {
        &self.iset_idx
    }

    pub fn rset_idx(&self) -> &[u16] {
        &self.rset_idx
    }

    pub fn wset_idx(&self) -> &[u16] {
        &self.wset_idx
    }

    pub fn accesses(&self) -> &[AccessItem] {
        &self.accesses
    }

    // Handle resolution.

    fn item_ref<'a>(&'a self, rah: &'a AccessHandle) -> Option<&'a AccessItem> {
        match &rah.slot {
            HandleSlot::Empty => None,
            HandleSlot::Local(item) => Some(item),
            HandleSlot::Published(i) => self.accesses.get(*i as usize),
        }
    }

    /// State of the access behind the handle.
    pub fn state(&self, rah: &AccessHandle) -> AccessState {
        self.item_ref(rah)
            .map(|item| item.state)
            .unwrap_or(AccessState::Invalid)
    }

    pub fn can_read(&self, rah: &AccessHandle) -> bool {
        self.item_ref(rah)
            .map(|item| item.write_rv.is_some() || item.read_rv.is_some())
            .unwrap_or(false)
    }

    pub fn can_write(&self, rah: &AccessHandle) -> bool {
        self.item_ref(rah)
            .map(|item| item.write_rv.is_some())
            .unwrap_or(false)
    }

    /// Whether the row behind the handle reads as deleted. An unbound
    /// handle (for example after a failed peek of a deleted row) counts as
    /// deleted.
    pub fn is_deleted(&self, rah: &AccessHandle) -> bool {
        let Some(item) = self.item_ref(rah) else {
            return true;
        };
        let pool = self.ctx.pool();
        item.write_rv.map(|rv| pool.get(rv).is_deleted()).unwrap_or(false)
            || item.read_rv.map(|rv| pool.get(rv).is_deleted()).unwrap_or(false)
    }

    /// Readable payload: the pending write version if any, else the read
    /// version located at peek.
    pub fn data(&self, rah: &AccessHandle) -> Option<&[u8]> {
        let item = self.item_ref(rah)?;
        let rv = item.write_rv.or(item.read_rv)?;
        Some(self.ctx.pool().get(rv).data())
    }

    /// Writable payload of the pending write version.
    pub fn data_mut(&mut self, rah: &AccessHandle) -> Option<&mut [u8]> {
        let item = self.item_ref(rah)?;
        let rv = item.write_rv?;
        // The write version is pending and owned by this transaction.
        Some(unsafe { self.ctx.pool().get(rv).data_mut() })
    }

    /// Row id of the access, needed after `new_row` allocates one.
    pub fn row_id(&self, rah: &AccessHandle) -> Option<u64> {
        self.item_ref(rah).map(|item| item.row_id)
    }

    /// Slot capacity backing the access's current version.
    pub fn rv_size(&self, rah: &AccessHandle) -> u64 {
        let Some(item) = self.item_ref(rah) else {
            return 0;
        };
        match item.write_rv.or(item.read_rv) {
            Some(rv) => {
                crate::version_pool::VersionPool::class_to_size(self.ctx.pool().get(rv).size_cls())
            }
            None => 0,
        }
    }

    /// Payload behind a peek-only handle.
    pub fn peek_data(&self, rah: &PeekOnlyHandle) -> Option<&[u8]> {
        let rv = rah.read_rv?;
        Some(self.ctx.pool().get(rv).data())
    }

    /// Tombstone flag behind a peek-only handle.
    pub fn peek_is_deleted(&self, rah: &PeekOnlyHandle) -> bool {
        rah.read_rv
            .map(|rv| self.ctx.pool().get(rv).is_deleted())
            .unwrap_or(false)
    }

    // Row operations.

    /// Creates a row. On column family 0 the row id must be [`NEW_ROW_ID`]
    /// and a fresh one is allocated; secondary families piggyback on a
    /// supplied id. The copier fills the first version's payload.
    pub fn new_row(
        &mut self,
        rah: &mut AccessHandle,
        tbl: &Arc<Table>,
        cf_id: u16,
        row_id: u64,
        check_dup_access: bool,
        data_size: u64,
        mut copier: impl FnMut(u16, &mut [u8], Option<&[u8]>) -> bool,
    ) -> bool {
        debug_assert!(self.began);
        // new_row requires an explicit size.
        debug_assert_ne!(data_size, DEFAULT_WRITE_DATA_SIZE);
        if !self.began || self.peek_only || rah.is_valid() {
            return false;
        }

        let row_id = if cf_id == 0 {
            if row_id != NEW_ROW_ID {
                return false;
            }
            match self.ctx.allocate_row(tbl) {
                Some(id) => id,
                None => {
                    self.ctx.stats_mut().allocation_failures += 1;
                    return false;
                }
            }
        } else {
            if row_id == NEW_ROW_ID {
                return false;
            }
            row_id
        };

        let head = tbl.head(cf_id, row_id);
        let write_rv =
            match self
                .ctx
                .allocate_version_for_new_row(tbl, cf_id, row_id, head, data_size)
            {
                Some(rv) => rv,
                None => {
                    self.ctx.stats_mut().allocation_failures += 1;
                    if cf_id == 0 {
                        self.ctx.deallocate_row(tbl, row_id);
                    }
                    return false;
                }
            };

        {
            let slot = self.ctx.pool().get(write_rv);
            slot.set_older(None);
            slot.set_wts(self.ts);
            slot.rts.set(self.ts);
            slot.set_status(VersionStatus::Pending);
        }

        let copied = {
            let dest = unsafe { self.ctx.pool().get(write_rv).data_mut() };
            copier(cf_id, dest, None)
        };
        if !copied {
            self.ctx.deallocate_version(write_rv);
            if cf_id == 0 {
                self.ctx.deallocate_row(tbl, row_id);
            }
            return false;
        }

        if check_dup_access {
            let key = AccessKey::new(tbl, cf_id, row_id);
            // New rows must not have been accessed before.
            if self.access_history.contains_key(&key) {
                debug_assert!(false, "new_row on an already-accessed row");
                self.ctx.deallocate_version(write_rv);
                if cf_id == 0 {
                    self.ctx.deallocate_row(tbl, row_id);
                }
                return false;
            }
            self.access_history.insert(key, self.accesses.len() as u16);
        }

        let index = self.push_access(AccessItem {
            i: 0,
            inserted: false,
            state: AccessState::New,
            tbl: Arc::clone(tbl),
            cf_id,
            row_id,
            newer: None,
            write_rv: Some(write_rv),
            read_rv: None,
        });
        self.iset_idx.push(index);
        rah.bind_published(index);
        true
    }

    /// Locates the version of `(cf_id, row_id)` visible at this
    /// transaction's timestamp and binds the handle to a fresh, not yet
    /// published access. Returns `false` when no version is visible or the
    /// chain moved between the two walks.
    pub fn peek_row(
        &mut self,
        rah: &mut AccessHandle,
        tbl: &Arc<Table>,
        cf_id: u16,
        row_id: u64,
        check_dup_access: bool,
        read_hint: bool,
        write_hint: bool,
    ) -> bool {
        debug_assert!(self.began);
        if !self.began || rah.is_valid() {
            return false;
        }
        debug_assert!(row_id < tbl.row_count());

        // Reuse the access item if one exists; its state is preserved.
        if check_dup_access {
            if let Some(&index) = self
                .access_history
                .get(&AccessKey::new(tbl, cf_id, row_id))
            {
                rah.bind_published(index);
                return true;
            }
        }

        let mut newer: Option<Rv> = None;
        let mut rv = tbl.head(cf_id, row_id).older();
        self.auto_locate(&mut newer, &mut rv, read_hint, write_hint);

        let Some(first_rv) = rv else {
            self.on_get_row_failure(tbl, cf_id, row_id, read_hint, write_hint);
            return false;
        };

        self.ctx.pool().get(first_rv).rts.update(self.ts);

        // Re-walk from the head; a different answer means the row was
        // overwritten under our feet.
        let mut newer: Option<Rv> = None;
        let mut rv = tbl.head(cf_id, row_id).older();
        self.auto_locate(&mut newer, &mut rv, read_hint, write_hint);

        if rv != Some(first_rv) {
            self.on_get_row_failure(tbl, cf_id, row_id, read_hint, write_hint);
            return false;
        }

        rah.bind_local(AccessItem {
            i: 0,
            inserted: false,
            state: AccessState::Peek,
            tbl: Arc::clone(tbl),
            cf_id,
            row_id,
            newer,
            write_rv: None,
            read_rv: Some(first_rv),
        });
        true
    }

    /// Peek for read-only queries: never allocates an access item.
    pub fn peek_row_readonly(
        &mut self,
        rah: &mut PeekOnlyHandle,
        tbl: &Arc<Table>,
        cf_id: u16,
        row_id: u64,
        check_dup_access: bool,
    ) -> bool {
        debug_assert!(self.began);
        if !self.began || rah.is_valid() {
            return false;
        }
        debug_assert!(row_id < tbl.row_count());

        if check_dup_access {
            if let Some(&index) = self
                .access_history
                .get(&AccessKey::new(tbl, cf_id, row_id))
            {
                let item = &self.accesses[index as usize];
                rah.tbl = Some(Arc::clone(&item.tbl));
                rah.cf_id = item.cf_id;
                rah.row_id = item.row_id;
                rah.read_rv = item.write_rv.or(item.read_rv);
                return true;
            }
        }

        let mut newer: Option<Rv> = None;
        let mut rv = tbl.head(cf_id, row_id).older();
        self.locate(&mut newer, &mut rv, false, false, false);

        let Some(found) = rv else {
            return false;
        };
        rah.tbl = Some(Arc::clone(tbl));
        rah.cf_id = cf_id;
        rah.row_id = row_id;
        rah.read_rv = Some(found);
        true
    }

    /// Registers the peeked version as a read, creating a commit-time
    /// validation obligation. Idempotent on `Read` and legal on items that
    /// already carry a write.
    pub fn read_row(
        &mut self,
        rah: &mut AccessHandle,
        copier: impl FnMut(u16, &mut [u8], Option<&[u8]>) -> bool,
    ) -> bool {
        debug_assert!(self.began);
        debug_assert!(!self.peek_only);
        if !self.began || self.peek_only {
            return false;
        }

        let state = match self.item_ref(rah) {
            None => return false,
            Some(item) => item.state,
        };
        match state {
            // New rows are readable by default; reading twice is fine.
            AccessState::New | AccessState::Read | AccessState::ReadWrite => return true,
            AccessState::Peek => {}
            _ => return false,
        }

        // First read of a peeked row: publish the item into the access set
        // and the read set.
        let index = match &rah.slot {
            HandleSlot::Published(i) => *i,
            HandleSlot::Local(_) => {
                let HandleSlot::Local(item) =
                    std::mem::replace(&mut rah.slot, HandleSlot::Empty)
                else {
                    unreachable!()
                };
                let key = AccessKey::new(&item.tbl, item.cf_id, item.row_id);
                let index = self.push_access(item);
                self.access_history.entry(key).or_insert(index);
                self.rset_idx.push(index);
                rah.bind_published(index);
                index
            }
            HandleSlot::Empty => return false,
        };
        self.accesses[index as usize].state = AccessState::Read;

        // Promote a version if (1) it is non-inlined, (2) the inlined slot
        // is not in use, and (3) the version was created a while ago.
        let promote = {
            let config = self.ctx.config();
            if config.inlined_row_version && config.promote_non_inlined_version {
                let item = &self.accesses[index as usize];
                if item.tbl.inlining(item.cf_id) {
                    let read_rv = item.read_rv.expect("read item has a read version");
                    let read_version = self.ctx.pool().get(read_rv);
                    let inline_head = if config.inline_with_alt_row {
                        item.tbl.alt_head(item.cf_id, item.row_id)
                    } else {
                        item.tbl.head(item.cf_id, item.row_id)
                    };
                    let inline_free = inline_head
                        .inlined_rv()
                        .map(|rv| self.ctx.pool().get(rv).status() == VersionStatus::Invalid)
                        .unwrap_or(false);
                    !read_version.is_inlined()
                        && read_version.wts() < self.ctx.min_rts()
                        && inline_free
                } else {
                    false
                }
            } else {
                false
            }
        };
        if promote {
            return self.write_row(rah, DEFAULT_WRITE_DATA_SIZE, copier, true);
        }

        true
    }

    /// Allocates this transaction's write version for the row and runs the
    /// copier over it. `Peek -> Write`, `Read -> ReadWrite`; idempotent on
    /// items that already carry a write.
    pub fn write_row(
        &mut self,
        rah: &mut AccessHandle,
        data_size: u64,
        mut copier: impl FnMut(u16, &mut [u8], Option<&[u8]>) -> bool,
        check_dup_access: bool,
    ) -> bool {
        debug_assert!(self.began);
        debug_assert!(!self.peek_only);
        if !self.began || self.peek_only || !rah.is_valid() {
            return false;
        }

        // Publish a still-local item. Only the write set is tracked here;
        // the base read of a peek-then-write is deliberately unvalidated.
        let index = match &rah.slot {
            HandleSlot::Published(i) => *i,
            HandleSlot::Local(_) => {
                let HandleSlot::Local(item) =
                    std::mem::replace(&mut rah.slot, HandleSlot::Empty)
                else {
                    unreachable!()
                };
                let key = AccessKey::new(&item.tbl, item.cf_id, item.row_id);
                if check_dup_access && self.access_history.contains_key(&key) {
                    debug_assert!(false, "duplicate access published twice");
                    rah.slot = HandleSlot::Local(item);
                    return false;
                }
                let index = self.push_access(item);
                if check_dup_access {
                    self.access_history.insert(key, index);
                }
                rah.bind_published(index);
                index
            }
            HandleSlot::Empty => return false,
        };

        let (state, tbl, cf_id, row_id, read_rv) = {
            let item = &self.accesses[index as usize];
            (
                item.state,
                Arc::clone(&item.tbl),
                item.cf_id,
                item.row_id,
                item.read_rv,
            )
        };

        match state {
            // New rows are writable by default; writing twice is fine.
            AccessState::New | AccessState::Write | AccessState::ReadWrite => return true,
            AccessState::Peek | AccessState::Read => {}
            _ => return false,
        }

        let data_size = if data_size == DEFAULT_WRITE_DATA_SIZE {
            let read_rv = read_rv.expect("peeked item has a read version");
            self.ctx.pool().get(read_rv).data_size()
        } else {
            data_size
        };

        let head = tbl.head(cf_id, row_id);
        let write_rv = match self
            .ctx
            .allocate_version_for_existing_row(&tbl, cf_id, row_id, head, data_size)
        {
            Some(rv) => rv,
            None => {
                self.ctx.stats_mut().allocation_failures += 1;
                return false;
            }
        };

        {
            let slot = self.ctx.pool().get(write_rv);
            slot.set_wts(self.ts);
            slot.rts.set(self.ts);
            slot.set_status(VersionStatus::Pending);
        }

        let src_rv = if state == AccessState::Peek {
            None
        } else {
            read_rv
        };
        let copied = {
            let pool = self.ctx.pool();
            let dest = unsafe { pool.get(write_rv).data_mut() };
            let src = src_rv.map(|rv| pool.get(rv).data());
            copier(cf_id, dest, src)
        };
        if !copied {
            self.ctx.deallocate_version(write_rv);
            return false;
        }

        let item = &mut self.accesses[index as usize];
        item.write_rv = Some(write_rv);
        item.state = if state == AccessState::Peek {
            AccessState::Write
        } else {
            AccessState::ReadWrite
        };
        self.wset_idx.push(index);
        true
    }

    /// Marks the access as a delete. `Write -> Delete`,
    /// `ReadWrite -> ReadDelete`; a new row is discarded on the spot.
    /// Double-deleting fails.
    pub fn delete_row(&mut self, rah: &mut AccessHandle) -> bool {
        debug_assert!(self.began);
        debug_assert!(!self.peek_only);
        if !self.began || self.peek_only || !rah.is_valid() {
            return false;
        }

        // Only New/Write/ReadWrite items can be deleted, and those are
        // always published.
        let index = match &rah.slot {
            HandleSlot::Published(i) => *i as usize,
            _ => return false,
        };

        match self.accesses[index].state {
            AccessState::New => {
                let (write_rv, tbl, cf_id, row_id) = {
                    let item = &mut self.accesses[index];
                    item.state = AccessState::Invalid;
                    (
                        item.write_rv.take(),
                        Arc::clone(&item.tbl),
                        item.cf_id,
                        item.row_id,
                    )
                };
                if let Some(rv) = write_rv {
                    self.ctx.deallocate_version(rv);
                }
                if cf_id == 0 {
                    self.ctx.deallocate_row(&tbl, row_id);
                }
            }
            AccessState::Write => self.accesses[index].state = AccessState::Delete,
            AccessState::ReadWrite => self.accesses[index].state = AccessState::ReadDelete,
            _ => return false,
        }

        rah.reset();
        true
    }

    // The visibility walk.

    /// Dispatches `locate` from execution-path hints. Validation is never
    /// inferred from hints; validation callers invoke `locate` directly.
    fn auto_locate(
        &mut self,
        newer: &mut Option<Rv>,
        rv: &mut Option<Rv>,
        read_hint: bool,
        write_hint: bool,
    ) {
        self.locate(newer, rv, read_hint, write_hint, false)
    }

    /// Walks a version chain to the version visible at `self.ts`.
    ///
    /// On return `rv` is the visible version or `None` (conflict), and
    /// `newer` is the chain node whose `older` link an insertion below must
    /// CAS on (`None` meaning the row head).
    fn locate(
        &mut self,
        newer: &mut Option<Rv>,
        rv: &mut Option<Rv>,
        for_read: bool,
        for_write: bool,
        for_validation: bool,
    ) {
        let no_wait = self.ctx.config().no_wait_for_pending;
        let skip_pending = self.ctx.config().skip_pending;
        let newest_only = self.ctx.config().insert_newest_version_only;
        let ts = self.ts;
        let pool = self.ctx.pool();
        let mut chain_len = 0u64;

        loop {
            let Some(current) = *rv else {
                // Rare: a dangling row id, or GC reclaimed past our ts.
                log::debug!("locate: no visible version below {:?}", newer);
                break;
            };
            chain_len += 1;
            let version = pool.get(current);

            if version.wts() < ts {
                let status = if no_wait {
                    let status = version.status();
                    if status == VersionStatus::Pending && (!skip_pending || for_validation) {
                        *rv = None;
                        break;
                    }
                    status
                } else {
                    wait_for_pending(version)
                };

                match status {
                    VersionStatus::Deleted => {
                        *rv = None;
                        break;
                    }
                    VersionStatus::Committed => break,
                    // Aborted versions are invisible; Pending survives here
                    // only under skip_pending. Neither advances the
                    // insertion point.
                    _ => {}
                }
            } else {
                *newer = Some(current);
            }

            if newest_only
                && for_read
                && for_write
                && version.status() != VersionStatus::Aborted
                && version.wts() != ts
            {
                // Writes may only install directly below the newest
                // committed version.
                *rv = None;
                break;
            }

            *rv = version.older();
        }

        if for_write {
            if let Some(current) = *rv {
                // A later reader already committed against this version;
                // overwriting it would break the timestamp order.
                if pool.get(current).rts() > ts {
                    *rv = None;
                }
            }
        }

        let stats = self.ctx.stats_mut();
        if stats.max_chain_len < chain_len {
            stats.max_chain_len = chain_len;
        }
    }

    // Commit protocol.

    /// Runs the commit protocol. `write_func` is the host's durable-log
    /// hook, invoked after the write set is installed and validated but
    /// before any status is published; returning `false` vetoes the
    /// commit.
    pub fn commit(&mut self, write_func: impl FnOnce() -> bool) -> CommitResult {
        if !self.began {
            return CommitResult::Invalid;
        }

        self.sort_wset();

        if !self.pre_validate() {
            return self.finish_abort(CommitResult::AbortedByPreValidation, false);
        }
        if !self.insert_version_deferred() {
            return self.finish_abort(CommitResult::AbortedByDeferredRowVersionInsert, false);
        }
        self.insert_row_deferred();
        if !self.main_validate() {
            return self.finish_abort(CommitResult::AbortedByMainValidation, false);
        }
        self.update_rts();
        if !write_func() {
            return self.finish_abort(CommitResult::AbortedByLogging, false);
        }
        self.publish_writes();

        self.ctx.stats_mut().committed += 1;
        self.consecutive_commits = self.consecutive_commits.saturating_add(1);
        self.consecutive_aborts = 0;
        self.began = false;
        self.clear_access_state();
        CommitResult::Committed
    }

    /// Aborts the transaction. Safe at any point after `begin`; returns
    /// `false` if nothing was running.
    pub fn abort(&mut self, skip_backoff: bool) -> bool {
        if !self.began {
            return false;
        }
        self.finish_abort(CommitResult::Invalid, skip_backoff);
        true
    }

    /// Orders the write set by `(table, cf, row)` so concurrent committers
    /// install versions in one global order and cannot live-lock.
    fn sort_wset(&mut self) {
        let accesses = &self.accesses;
        self.wset_idx.sort_unstable_by_key(|&i| {
            let item = &accesses[i as usize];
            (Arc::as_ptr(&item.tbl) as usize, item.cf_id, item.row_id)
        });
    }

    /// Re-locates every read-only access. Items that also write are
    /// re-checked during version insertion instead.
    fn pre_validate(&mut self) -> bool {
        for j in 0..self.rset_idx.len() {
            let index = self.rset_idx[j] as usize;
            let (state, tbl, cf_id, row_id, read_rv) = {
                let item = &self.accesses[index];
                (
                    item.state,
                    Arc::clone(&item.tbl),
                    item.cf_id,
                    item.row_id,
                    item.read_rv,
                )
            };
            if state != AccessState::Read {
                continue;
            }
            let mut newer: Option<Rv> = None;
            let mut rv = tbl.head(cf_id, row_id).older();
            self.locate(&mut newer, &mut rv, true, false, true);
            if rv != read_rv {
                self.note_conflict(&tbl, cf_id, row_id, true, false);
                return false;
            }
        }
        true
    }

    /// Splices every write version into its chain with CAS, retrying on
    /// contention. Fails when the located version moved, disappeared, or
    /// was read by a later transaction.
    fn insert_version_deferred(&mut self) -> bool {
        for j in 0..self.wset_idx.len() {
            let index = self.wset_idx[j] as usize;
            let (state, tbl, cf_id, row_id, read_rv, write_rv, mut newer) = {
                let item = &self.accesses[index];
                (
                    item.state,
                    Arc::clone(&item.tbl),
                    item.cf_id,
                    item.row_id,
                    item.read_rv,
                    item.write_rv.expect("write-set item has a write version"),
                    item.newer,
                )
            };
            let validates_read =
                matches!(state, AccessState::ReadWrite | AccessState::ReadDelete);

            loop {
                let head = tbl.head(cf_id, row_id);
                let mut rv = match newer {
                    Some(n) => self.ctx.pool().get(n).older(),
                    None => head.older(),
                };
                self.locate(&mut newer, &mut rv, validates_read, true, false);

                if validates_read {
                    // The read version changed; abort without going to
                    // validation.
                    if rv != read_rv {
                        self.note_conflict(&tbl, cf_id, row_id, true, true);
                        return false;
                    }
                } else if rv.is_none() {
                    self.note_conflict(&tbl, cf_id, row_id, false, true);
                    return false;
                }
                let located = rv.expect("located a version to install above");

                // The link below `newer` may have gained a node since the
                // walk; a node newer than us forces a re-walk.
                let observed = match newer {
                    Some(n) => self.ctx.pool().get(n).older.load(Ordering::Acquire),
                    None => head.older.load(Ordering::Acquire),
                };
                if observed == NIL {
                    continue;
                }
                if self.ctx.pool().get(Rv(observed)).wts() > self.ts {
                    continue;
                }

                self.ctx.pool().get(write_rv).set_older(Some(Rv(observed)));
                let spliced = match newer {
                    Some(n) => self
                        .ctx
                        .pool()
                        .get(n)
                        .older
                        .compare_exchange(
                            observed,
                            write_rv.raw(),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok(),
                    None => head
                        .older
                        .compare_exchange(
                            observed,
                            write_rv.raw(),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok(),
                };
                if !spliced {
                    continue;
                }

                // The version is now reachable; abort must tombstone it.
                self.accesses[index].inserted = true;
                self.accesses[index].newer = newer;

                if self.ctx.pool().get(located).rts() > self.ts {
                    // A reader raised rts between the walk and the splice.
                    self.note_conflict(&tbl, cf_id, row_id, validates_read, true);
                    return false;
                }
                break;
            }
        }
        true
    }

    /// Publishes brand-new rows. No concurrent reader can hold these heads
    /// yet, so a plain store and an immediate Committed status suffice.
    fn insert_row_deferred(&mut self) {
        for j in 0..self.iset_idx.len() {
            let index = self.iset_idx[j] as usize;
            if self.accesses[index].state == AccessState::Invalid {
                continue;
            }
            let (tbl, cf_id, row_id, write_rv) = {
                let item = &self.accesses[index];
                (
                    Arc::clone(&item.tbl),
                    item.cf_id,
                    item.row_id,
                    item.write_rv.expect("insert-set item has a write version"),
                )
            };
            tbl.head(cf_id, row_id).set_older(Some(write_rv));
            self.ctx.pool().get(write_rv).set_status(VersionStatus::Committed);
            self.accesses[index].inserted = true;
        }
    }

    /// Re-locates every read after the write set is installed.
    fn main_validate(&mut self) -> bool {
        for j in 0..self.rset_idx.len() {
            let index = self.rset_idx[j] as usize;
            let (tbl, cf_id, row_id, read_rv) = {
                let item = &self.accesses[index];
                (
                    Arc::clone(&item.tbl),
                    item.cf_id,
                    item.row_id,
                    item.read_rv,
                )
            };
            let mut newer: Option<Rv> = None;
            let mut rv = tbl.head(cf_id, row_id).older();
            self.locate(&mut newer, &mut rv, true, false, true);
            if rv != read_rv {
                self.note_conflict(&tbl, cf_id, row_id, true, false);
                return false;
            }
        }
        true
    }

    /// Raises `rts` of every read version to this transaction's timestamp.
    fn update_rts(&mut self) {
        for j in 0..self.rset_idx.len() {
            let index = self.rset_idx[j] as usize;
            if let Some(read_rv) = self.accesses[index].read_rv {
                self.ctx.pool().get(read_rv).rts.update(self.ts);
            }
        }
    }

    /// Flips installed write versions to their terminal status, making the
    /// payloads visible.
    fn publish_writes(&mut self) {
        for j in 0..self.wset_idx.len() {
            let index = self.wset_idx[j] as usize;
            let item = &self.accesses[index];
            let write_rv = item.write_rv.expect("write-set item has a write version");
            let slot = self.ctx.pool().get(write_rv);
            match item.state {
                AccessState::Delete | AccessState::ReadDelete => {
                    slot.set_deleted(true);
                    slot.set_status(VersionStatus::Deleted);
                }
                _ => slot.set_status(VersionStatus::Committed),
            }
        }
    }

    /// Rolls the access set back: reachable pending versions become
    /// aborted tombstones for the garbage collector, everything else
    /// returns to the pool.
    fn finish_abort(&mut self, result: CommitResult, skip_backoff: bool) -> CommitResult {
        debug_assert!(self.began);

        for index in 0..self.accesses.len() {
            let (state, write_rv, inserted, cf_id, row_id) = {
                let item = &self.accesses[index];
                (
                    item.state,
                    item.write_rv,
                    item.inserted,
                    item.cf_id,
                    item.row_id,
                )
            };
            let Some(write_rv) = write_rv else {
                continue;
            };
            if inserted {
                self.ctx.pool().get(write_rv).set_status(VersionStatus::Aborted);
            } else {
                let tbl = Arc::clone(&self.accesses[index].tbl);
                self.ctx.deallocate_version(write_rv);
                if state == AccessState::New && cf_id == 0 {
                    self.ctx.deallocate_row(&tbl, row_id);
                }
            }
        }

        let stats = self.ctx.stats_mut();
        match result {
            CommitResult::AbortedByPreValidation => stats.aborted_by_pre_validation += 1,
            CommitResult::AbortedByDeferredRowVersionInsert => {
                stats.aborted_by_deferred_row_version_insert += 1
            }
            CommitResult::AbortedByMainValidation => stats.aborted_by_main_validation += 1,
            CommitResult::AbortedByLogging => stats.aborted_by_logging += 1,
            _ => {}
        }

        self.consecutive_commits = 0;
        self.consecutive_aborts = self.consecutive_aborts.saturating_add(1);
        self.began = false;
        self.clear_access_state();

        if !skip_backoff {
            self.backoff();
        }
        result
    }

    fn clear_access_state(&mut self) {
        self.accesses.clear();
        self.iset_idx.clear();
        self.rset_idx.clear();
        self.wset_idx.clear();
        self.access_history.clear();
    }

    /// Bounded exponential spin keyed to the abort streak.
    fn backoff(&self) {
        let shift = self.consecutive_aborts.min(10);
        let spins = 16u64 << shift;
        for _ in 0..spins {
            std::hint::spin_loop();
        }
    }

    fn push_access(&mut self, mut item: AccessItem) -> u16 {
        let index = self.accesses.len();
        if index >= self.ctx.config().max_access_size {
            panic!(
                "transaction exceeded max_access_size ({})",
                self.ctx.config().max_access_size
            );
        }
        item.i = index as u16;
        self.accesses.push(item);
        index as u16
    }

    fn on_get_row_failure(
        &mut self,
        tbl: &Arc<Table>,
        cf_id: u16,
        row_id: u64,
        read_hint: bool,
        write_hint: bool,
    ) {
        self.note_conflict(tbl, cf_id, row_id, read_hint, write_hint);
        self.ctx.stats_mut().aborted_by_get_row += 1;
    }

    fn note_conflict(
        &mut self,
        tbl: &Arc<Table>,
        cf_id: u16,
        row_id: u64,
        read_hint: bool,
        write_hint: bool,
    ) {
        if self.ctx.config().reserve_after_abort {
            self.to_reserve.push(ReserveItem {
                tbl: Arc::clone(tbl),
                cf_id,
                row_id,
                read_hint,
                write_hint,
            });
        }
        if let Some(hh) = &mut self.abort_hh {
            hh.account(AccessKey::new(tbl, cf_id, row_id));
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.began {
            self.abort(true);
        }
    }
}

/// Spins until the version leaves the Pending state.
fn wait_for_pending(version: &Version) -> VersionStatus {
    let mut status = version.status();
    while status == VersionStatus::Pending {
        std::hint::spin_loop();
        status = version.status();
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_spreads_close_keys() {
        let a = mix(mix(1, 0), 1);
        let b = mix(mix(1, 0), 2);
        let c = mix(mix(1, 1), 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_trivial_copier_respects_sizes() {
        let mut dest = [0u8; 8];
        let src = [7u8; 4];
        assert!(trivial_copier(0, &mut dest, Some(&src)));
        assert_eq!(&dest[..4], &[7; 4]);
        assert_eq!(&dest[4..], &[0; 4]);

        assert!(trivial_copier(0, &mut dest, None));
        assert!(noop_copier(0, &mut dest, Some(&src)));
    }

    #[test]
    fn test_commit_result_helpers() {
        assert!(CommitResult::Committed.is_committed());
        assert!(!CommitResult::AbortedByMainValidation.is_committed());
    }
}
