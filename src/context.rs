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

//! Per-worker context
//!
//! Glue between a transaction and the shared engine: forwards row and
//! version allocation, carries the worker's timestamp generator and
//! counters, and exposes the global `min_rts` the external garbage
//! collector advances.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::stats::Stats;
use crate::table::Table;
use crate::timestamp::{AtomicStamp, Timestamp, TimestampGenerator};
use crate::version::{Rv, RowHead, VersionStatus};
use crate::version_pool::VersionPool;

/// Worker-local engine access. One context drives one [`crate::Transaction`].
pub struct Context {
    pool: Arc<VersionPool>,
    min_rts: Arc<AtomicStamp>,
    config: EngineConfig,
    ts_gen: TimestampGenerator,
    stats: Stats,
}

impl Context {
    /// Creates a context on worker `lane`.
    pub fn new(
        pool: Arc<VersionPool>,
        min_rts: Arc<AtomicStamp>,
        config: EngineConfig,
        lane: u64,
    ) -> Self {
        Self {
            pool,
            min_rts,
            config,
            ts_gen: TimestampGenerator::new(lane),
            stats: Stats::default(),
        }
    }

    /// The shared version pool.
    #[inline]
    pub fn pool(&self) -> &VersionPool {
        &self.pool
    }

    /// Engine configuration.
    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Worker counters.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    /// Lower bound on any live transaction's timestamp, advanced by the
    /// external garbage collector.
    #[inline]
    pub fn min_rts(&self) -> Timestamp {
        self.min_rts.get()
    }

    /// Generates the next transaction timestamp for this worker, past
    /// `causally_after` when supplied.
    pub(crate) fn begin_timestamp(&mut self, causally_after: Option<Timestamp>) -> Timestamp {
        if let Some(ts) = causally_after {
            self.ts_gen.advance_past(ts);
        }
        self.ts_gen.generate()
    }

    /// Allocates a fresh row id from the table (column family 0 only).
    pub fn allocate_row(&self, tbl: &Table) -> Option<u64> {
        tbl.allocate_row_id()
    }

    /// Returns a row id to the table's allocator.
    pub fn deallocate_row(&self, tbl: &Table, row_id: u64) {
        tbl.deallocate_row_id(row_id);
    }

    /// Allocates the first version of a brand-new row.
    pub fn allocate_version_for_new_row(
        &self,
        tbl: &Table,
        cf_id: u16,
        row_id: u64,
        _head: &RowHead,
        data_size: u64,
    ) -> Option<Rv> {
        self.allocate_version(tbl, cf_id, row_id, data_size)
    }

    /// Allocates a version to overwrite an existing row.
    pub fn allocate_version_for_existing_row(
        &self,
        tbl: &Table,
        cf_id: u16,
        row_id: u64,
        _head: &RowHead,
        data_size: u64,
    ) -> Option<Rv> {
        self.allocate_version(tbl, cf_id, row_id, data_size)
    }

    fn allocate_version(&self, tbl: &Table, cf_id: u16, row_id: u64, data_size: u64) -> Option<Rv> {
        if let Some(rv) = self.try_claim_inlined(tbl, cf_id, row_id, data_size) {
            return Some(rv);
        }
        self.pool.allocate(data_size)
    }

    /// Attempts to claim the row's dedicated inlined slot.
    fn try_claim_inlined(&self, tbl: &Table, cf_id: u16, row_id: u64, data_size: u64) -> Option<Rv> {
        if !self.config.inlined_row_version || !tbl.inlining(cf_id) {
            return None;
        }
        let head = if self.config.inline_with_alt_row {
            tbl.alt_head(cf_id, row_id)
        } else {
            tbl.head(cf_id, row_id)
        };
        let rv = head.inlined_rv()?;
        let slot = self.pool.get(rv);
        if data_size > VersionPool::class_to_size(slot.size_cls()) {
            return None;
        }
        if !slot.claim_status(VersionStatus::Invalid, VersionStatus::Pending) {
            return None;
        }
        slot.set_data_size(data_size as u32);
        slot.set_older(None);
        slot.set_deleted(false);
        Some(rv)
    }

    /// Frees a version that never became visible, or releases an inlined
    /// slot back to its claimable state.
    pub fn deallocate_version(&self, rv: Rv) {
        self.pool.deallocate(rv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_pool::{PagePool, PAGE_SIZE};
    use crate::table::ColumnFamilyDef;

    fn test_context(config: EngineConfig) -> (Context, Arc<VersionPool>) {
        let pool = Arc::new(
            VersionPool::new(PagePool::new(2 * PAGE_SIZE as u64, 0).unwrap()).unwrap(),
        );
        let min_rts = Arc::new(AtomicStamp::new(Timestamp::ZERO));
        (
            Context::new(Arc::clone(&pool), min_rts, config, 0),
            pool,
        )
    }

    fn inlining_table(pool: &VersionPool, config: &EngineConfig) -> Table {
        Table::create(
            pool,
            config,
            "t",
            vec![ColumnFamilyDef {
                data_size: 16,
                inlining: true,
            }],
            4,
        )
        .unwrap()
    }

    #[test]
    fn test_inlined_claim_then_fallback() {
        let config = EngineConfig::default();
        let (ctx, pool) = test_context(config.clone());
        let tbl = inlining_table(&pool, &config);
        let head = tbl.head(0, 0);

        let first = ctx
            .allocate_version_for_existing_row(&tbl, 0, 0, head, 16)
            .unwrap();
        assert!(pool.get(first).is_inlined());
        assert_eq!(pool.get(first).status(), VersionStatus::Pending);

        // Slot already claimed, second allocation falls back to the pool.
        let second = ctx
            .allocate_version_for_existing_row(&tbl, 0, 0, head, 16)
            .unwrap();
        assert!(!pool.get(second).is_inlined());

        // Releasing the inlined slot makes it claimable again.
        ctx.deallocate_version(first);
        let third = ctx
            .allocate_version_for_existing_row(&tbl, 0, 0, head, 16)
            .unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn test_oversized_payload_skips_inlined_slot() {
        let config = EngineConfig::default();
        let (ctx, pool) = test_context(config.clone());
        let tbl = inlining_table(&pool, &config);
        let head = tbl.head(0, 0);

        // 100 bytes does not fit the 64-byte class of the inlined slot.
        let rv = ctx
            .allocate_version_for_existing_row(&tbl, 0, 0, head, 100)
            .unwrap();
        assert!(!pool.get(rv).is_inlined());
    }

    #[test]
    fn test_begin_timestamp_respects_causality() {
        let config = EngineConfig::default();
        let (mut ctx, _pool) = test_context(config);
        let far_future = Timestamp::from_parts(u64::MAX - 5, 9);
        let ts = ctx.begin_timestamp(Some(far_future));
        assert!(ts > far_future);
    }
}
