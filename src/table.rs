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

//! Tables and row heads
//!
//! A table is a fixed-capacity set of rows, each carrying one version chain
//! per column family. Column family 0 owns the row id; secondary families
//! piggyback on it. The engine only needs the sentinel lookup, the inlining
//! flags, and the row-id allocator from here.

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::version::RowHead;
use crate::version_pool::VersionPool;

/// Row id placeholder passed to `new_row` on column family 0.
pub const NEW_ROW_ID: u64 = u64::MAX;

/// Static description of one column family.
#[derive(Debug, Clone)]
pub struct ColumnFamilyDef {
    /// Payload bytes per version.
    pub data_size: u64,
    /// Whether rows of this family keep an inlined version slot.
    pub inlining: bool,
}

struct RowIdAllocator {
    next: u64,
    free: Vec<u64>,
}

/// Column-family-aware table with per-row version chains.
pub struct Table {
    name: String,
    cfs: Vec<ColumnFamilyDef>,
    row_capacity: u64,
    heads: Vec<Box<[RowHead]>>,
    alt_heads: Vec<Box<[RowHead]>>,
    row_ids: Mutex<RowIdAllocator>,
}

impl Table {
    /// Creates a table, pre-claiming inlined version slots from `pool` for
    /// every row of every inlining column family.
    pub fn create(
        pool: &VersionPool,
        config: &EngineConfig,
        name: &str,
        cfs: Vec<ColumnFamilyDef>,
        row_capacity: u64,
    ) -> Result<Table> {
        if cfs.is_empty() {
            return Err(Error::InvalidTable(format!(
                "table '{name}' needs at least one column family"
            )));
        }
        if row_capacity == 0 || row_capacity >= NEW_ROW_ID {
            return Err(Error::InvalidTable(format!(
                "table '{name}' has unusable row capacity {row_capacity}"
            )));
        }
        for (cf_id, cf) in cfs.iter().enumerate() {
            if cf.data_size > VersionPool::max_data_size() {
                return Err(Error::DataSizeTooLarge {
                    size: cf.data_size,
                    max: VersionPool::max_data_size(),
                });
            }
            if cf.inlining && VersionPool::size_to_class(cf.data_size).is_none() {
                return Err(Error::InvalidTable(format!(
                    "column family {cf_id} cannot inline {} bytes",
                    cf.data_size
                )));
            }
        }

        let build_heads = || -> Vec<Box<[RowHead]>> {
            cfs.iter()
                .map(|_| {
                    (0..row_capacity)
                        .map(|_| RowHead::new())
                        .collect::<Vec<_>>()
                        .into_boxed_slice()
                })
                .collect()
        };

        let heads = build_heads();
        let alt_heads = if config.inline_with_alt_row {
            build_heads()
        } else {
            Vec::new()
        };

        let table = Table {
            name: name.to_string(),
            cfs,
            row_capacity,
            heads,
            alt_heads,
            row_ids: Mutex::new(RowIdAllocator {
                next: 0,
                free: Vec::new(),
            }),
        };

        if config.inlined_row_version {
            for cf_id in 0..table.cfs.len() {
                if !table.cfs[cf_id].inlining {
                    continue;
                }
                let data_size = table.cfs[cf_id].data_size;
                for row_id in 0..row_capacity {
                    let rv = pool.allocate(data_size).ok_or(Error::PoolExhausted)?;
                    pool.adopt_inlined(rv);
                    let head = if config.inline_with_alt_row {
                        table.alt_head(cf_id as u16, row_id)
                    } else {
                        table.head(cf_id as u16, row_id)
                    };
                    head.set_inlined_rv(rv);
                }
            }
        }

        Ok(table)
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of column families.
    pub fn cf_count(&self) -> u16 {
        self.cfs.len() as u16
    }

    /// The sentinel anchoring the version chain of `(cf_id, row_id)`.
    #[inline]
    pub fn head(&self, cf_id: u16, row_id: u64) -> &RowHead {
        &self.heads[cf_id as usize][row_id as usize]
    }

    /// The alternate sentinel, used when inlined slots ride on the
    /// alternate row. Falls back to the primary sentinel otherwise.
    #[inline]
    pub fn alt_head(&self, cf_id: u16, row_id: u64) -> &RowHead {
        if self.alt_heads.is_empty() {
            self.head(cf_id, row_id)
        } else {
            &self.alt_heads[cf_id as usize][row_id as usize]
        }
    }

    /// Whether the column family keeps inlined version slots.
    #[inline]
    pub fn inlining(&self, cf_id: u16) -> bool {
        self.cfs[cf_id as usize].inlining
    }

    /// Payload bytes per version of the column family.
    #[inline]
    pub fn data_size(&self, cf_id: u16) -> u64 {
        self.cfs[cf_id as usize].data_size
    }

    /// Fixed row capacity.
    #[inline]
    pub fn row_count(&self) -> u64 {
        self.row_capacity
    }

    /// Hands out an unused row id, reusing freed ids first.
    pub(crate) fn allocate_row_id(&self) -> Option<u64> {
        let mut ids = self.row_ids.lock();
        if let Some(id) = ids.free.pop() {
            return Some(id);
        }
        if ids.next < self.row_capacity {
            let id = ids.next;
            ids.next += 1;
            Some(id)
        } else {
            None
        }
    }

    /// Returns a row id to the allocator.
    pub(crate) fn deallocate_row_id(&self, row_id: u64) {
        self.row_ids.lock().free.push(row_id);
    }
}
