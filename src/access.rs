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

//! Per-row access state
//!
//! State chart:
//!
//! ```text
//! Initial accesses:
//! new_row():              . -> New
//! peek_row():             . -> Peek
//!
//! Upgrades:
//! read_row():          Peek -> Read
//! write_row():         Peek -> Write
//! write_row():         Read -> ReadWrite
//! delete_row():       Write -> Delete
//! delete_row():   ReadWrite -> ReadDelete
//! delete_row():         New -> .
//! ```
//!
//! Every other transition is rejected.
//!
//! An [`AccessHandle`] starts out holding a *local* item produced by a
//! peek: a pure peek leaves no validation obligation, so the item joins the
//! transaction's access set only when a later read or write creates one.

use std::sync::Arc;

use crate::table::Table;
use crate::version::Rv;

/// Finite state of one access item.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessState {
    /// Discarded or never initialized.
    Invalid,
    /// Freshly created row; holds the pending first version.
    New,
    /// Visible version located, nothing promised yet.
    Peek,
    /// Read registered for commit-time validation.
    Read,
    /// Read plus a pending overwrite.
    ReadWrite,
    /// Pending overwrite without a validated read.
    Write,
    /// Pending delete without a validated read.
    Delete,
    /// Read plus a pending delete.
    ReadDelete,
}

/// Private per-row state of a transaction.
///
/// Invariant among the version references: `newer.wts > write_rv.wts >
/// read_rv.wts` whenever the respective fields are set.
#[derive(Clone)]
pub struct AccessItem {
    /// Stable index in the transaction's access array.
    pub(crate) i: u16,
    /// Set once the write version is reachable from the row chain.
    pub(crate) inserted: bool,
    pub(crate) state: AccessState,
    pub(crate) tbl: Arc<Table>,
    pub(crate) cf_id: u16,
    pub(crate) row_id: u64,
    /// Chain node directly above the located version; the CAS target for
    /// deferred insertion. `None` means the row head.
    pub(crate) newer: Option<Rv>,
    /// Version this transaction will install on commit.
    pub(crate) write_rv: Option<Rv>,
    /// Visible version located at peek time.
    pub(crate) read_rv: Option<Rv>,
}

impl AccessItem {
    pub fn state(&self) -> AccessState {
        self.state
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.tbl
    }

    pub fn cf_id(&self) -> u16 {
        self.cf_id
    }

    pub fn row_id(&self) -> u64 {
        self.row_id
    }
}

pub(crate) enum HandleSlot {
    Empty,
    /// Item not yet in the access set; owned by the handle.
    Local(AccessItem),
    /// Index into the transaction's access array.
    Published(u16),
}

/// Cursor over one row access of a transaction.
///
/// Data access and state queries go through the owning
/// [`crate::Transaction`], which resolves the handle against its access
/// set.
pub struct AccessHandle {
    pub(crate) slot: HandleSlot,
}

impl AccessHandle {
    pub fn new() -> Self {
        Self {
            slot: HandleSlot::Empty,
        }
    }

    /// Whether the handle is bound to an access.
    pub fn is_valid(&self) -> bool {
        !matches!(self.slot, HandleSlot::Empty)
    }

    /// Releases the handle without touching the underlying access.
    pub fn reset(&mut self) {
        self.slot = HandleSlot::Empty;
    }

    pub(crate) fn bind_local(&mut self, item: AccessItem) {
        debug_assert!(!self.is_valid());
        self.slot = HandleSlot::Local(item);
    }

    pub(crate) fn bind_published(&mut self, index: u16) {
        debug_assert!(!self.is_valid());
        self.slot = HandleSlot::Published(index);
    }
}

impl Default for AccessHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Light handle for read-only peeks.
///
/// Never allocates an access item and never joins the access set; the only
/// thing it carries is the located version.
pub struct PeekOnlyHandle {
    pub(crate) tbl: Option<Arc<Table>>,
    pub(crate) cf_id: u16,
    pub(crate) row_id: u64,
    pub(crate) read_rv: Option<Rv>,
}

impl PeekOnlyHandle {
    pub fn new() -> Self {
        Self {
            tbl: None,
            cf_id: 0,
            row_id: 0,
            read_rv: None,
        }
    }

    /// Whether the peek located a visible version.
    pub fn is_valid(&self) -> bool {
        self.read_rv.is_some()
    }

    pub fn cf_id(&self) -> u16 {
        self.cf_id
    }

    pub fn row_id(&self) -> u64 {
        self.row_id
    }

    pub fn table(&self) -> Option<&Arc<Table>> {
        self.tbl.as_ref()
    }

    pub fn reset(&mut self) {
        self.tbl = None;
        self.read_rv = None;
    }
}

impl Default for PeekOnlyHandle {
    fn default() -> Self {
        Self::new()
    }
}
