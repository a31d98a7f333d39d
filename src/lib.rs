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

//! # Mvocc - multi-version optimistic concurrency control
//!
//! An in-memory, column-family-aware MV-OCC engine ordered by per-worker
//! timestamps. Transactions run without row locks: they accumulate a
//! private access set, then commit by splicing pending versions into
//! per-row version chains with compare-and-swap and publishing them with a
//! status flip. Serializability follows from the total timestamp order,
//! read-timestamp tracking on versions, and commit-time validation.
//!
//! ## Quick start
//!
//! ```rust
//! use mvocc::{AccessHandle, ColumnFamilyDef, Db, EngineConfig, NEW_ROW_ID};
//!
//! let db = Db::new(EngineConfig::default(), 32 << 20, 0).unwrap();
//! let table = db
//!     .create_table(
//!         "accounts",
//!         vec![ColumnFamilyDef { data_size: 8, inlining: false }],
//!         1024,
//!     )
//!     .unwrap();
//!
//! let mut tx = db.transaction();
//! assert!(tx.begin(false, None));
//!
//! let mut handle = AccessHandle::new();
//! assert!(tx.new_row(&mut handle, &table, 0, NEW_ROW_ID, true, 8, |_, dest, _| {
//!     dest.copy_from_slice(&100u64.to_le_bytes());
//!     true
//! }));
//! let row_id = tx.row_id(&handle).unwrap();
//! assert!(tx.commit(|| true).is_committed());
//!
//! let mut tx = db.transaction();
//! assert!(tx.begin(false, None));
//! let mut handle = AccessHandle::new();
//! assert!(tx.peek_row(&mut handle, &table, 0, row_id, true, true, false));
//! assert_eq!(tx.data(&handle).unwrap(), &100u64.to_le_bytes());
//! assert!(tx.commit(|| true).is_committed());
//! ```
//!
//! ## Modules
//!
//! - [`db`] - engine owner: pool, `min_rts` watermark, table catalog
//! - [`transaction`] - the transaction state machine and commit protocol
//! - [`access`] - per-row access states and handles
//! - [`version`] / [`version_pool`] - version records and their slab pool
//! - [`page_pool`] - NUMA-local 2 MiB page slab
//! - [`table`] - column-family-aware tables and row heads
//! - [`timestamp`] - 128-bit ordered timestamps
//! - [`config`] - policy knobs
//! - [`hh`] - heavy-hitter accounting of abort hot spots

pub mod access;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod hh;
pub mod page_pool;
pub mod stats;
pub mod table;
pub mod timestamp;
pub mod transaction;
pub mod version;
pub mod version_pool;

// Re-export main types
pub use access::{AccessHandle, AccessItem, AccessState, PeekOnlyHandle};
pub use config::EngineConfig;
pub use context::Context;
pub use db::{ChainEntry, Db};
pub use error::{Error, Result};
pub use hh::HeavyHitterAccounter;
pub use page_pool::{PagePool, PAGE_SIZE};
pub use stats::Stats;
pub use table::{ColumnFamilyDef, Table, NEW_ROW_ID};
pub use timestamp::{AtomicStamp, Timestamp, TimestampGenerator};
pub use transaction::{
    noop_copier, trivial_copier, CommitResult, ReserveItem, Transaction, DEFAULT_WRITE_DATA_SIZE,
};
pub use version::{Rv, RowHead, Version, VersionStatus};
pub use version_pool::{VersionPool, VERSION_CLASS_COUNT};
