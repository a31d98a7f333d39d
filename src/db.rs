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

//! Engine owner
//!
//! Ties the shared pieces together: the version pool, the global `min_rts`
//! watermark the external garbage collector advances, and the table
//! catalog. Hands out per-worker contexts with distinct timestamp lanes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::page_pool::PagePool;
use crate::table::{ColumnFamilyDef, Table};
use crate::timestamp::{AtomicStamp, Timestamp};
use crate::transaction::Transaction;
use crate::version::VersionStatus;
use crate::version_pool::VersionPool;

/// One entry of a diagnostic chain walk.
#[derive(Debug, Clone, Copy)]
pub struct ChainEntry {
    pub wts: Timestamp,
    pub rts: Timestamp,
    pub status: VersionStatus,
    pub deleted: bool,
}

/// The engine instance.
pub struct Db {
    pool: Arc<VersionPool>,
    min_rts: Arc<AtomicStamp>,
    config: EngineConfig,
    tables: RwLock<FxHashMap<String, Arc<Table>>>,
    next_lane: AtomicU64,
}

impl Db {
    /// Builds an engine with `pool_bytes` of version memory on NUMA node
    /// `numa_id`.
    pub fn new(config: EngineConfig, pool_bytes: u64, numa_id: u8) -> Result<Arc<Db>> {
        config.validate().map_err(Error::InvalidConfig)?;
        let pages = PagePool::new(pool_bytes, numa_id)?;
        let pool = Arc::new(VersionPool::new(pages)?);
        Ok(Arc::new(Self {
            pool,
            min_rts: Arc::new(AtomicStamp::new(Timestamp::ZERO)),
            config,
            tables: RwLock::new(FxHashMap::default()),
            next_lane: AtomicU64::new(0),
        }))
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared version pool.
    pub fn pool(&self) -> &Arc<VersionPool> {
        &self.pool
    }

    /// Creates a table in the catalog.
    pub fn create_table(
        &self,
        name: &str,
        cfs: Vec<ColumnFamilyDef>,
        row_capacity: u64,
    ) -> Result<Arc<Table>> {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(Error::TableAlreadyExists(name.to_string()));
        }
        let table = Arc::new(Table::create(
            &self.pool,
            &self.config,
            name,
            cfs,
            row_capacity,
        )?);
        tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Looks a table up by name.
    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Creates a worker context on a fresh timestamp lane.
    pub fn context(&self) -> Context {
        let lane = self.next_lane.fetch_add(1, Ordering::AcqRel);
        Context::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.min_rts),
            self.config.clone(),
            lane,
        )
    }

    /// Creates a transaction on a fresh worker context.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.context())
    }

    /// Lower bound on any live transaction's timestamp.
    pub fn min_rts(&self) -> Timestamp {
        self.min_rts.get()
    }

    /// Raises the `min_rts` watermark. Called by the external garbage
    /// collector once every worker has passed `ts`.
    pub fn advance_min_rts(&self, ts: Timestamp) {
        self.min_rts.update(ts);
    }

    /// Walks a row's version chain newest-first. Diagnostic only.
    pub fn chain_snapshot(&self, tbl: &Table, cf_id: u16, row_id: u64) -> Vec<ChainEntry> {
        let mut out = Vec::new();
        let mut link = tbl.head(cf_id, row_id).older();
        while let Some(rv) = link {
            let version = self.pool.get(rv);
            out.push(ChainEntry {
                wts: version.wts(),
                rts: version.rts(),
                status: version.status(),
                deleted: version.is_deleted(),
            });
            link = version.older();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_pool::PAGE_SIZE;

    fn small_db() -> Arc<Db> {
        Db::new(EngineConfig::default(), 16 * PAGE_SIZE as u64, 0).unwrap()
    }

    fn one_cf() -> Vec<ColumnFamilyDef> {
        vec![ColumnFamilyDef {
            data_size: 8,
            inlining: false,
        }]
    }

    #[test]
    fn test_catalog() {
        let db = small_db();
        let created = db.create_table("orders", one_cf(), 64).unwrap();
        let found = db.table("orders").unwrap();
        assert!(Arc::ptr_eq(&created, &found));

        assert!(matches!(
            db.create_table("orders", one_cf(), 64),
            Err(Error::TableAlreadyExists(_))
        ));
        assert!(matches!(db.table("missing"), Err(Error::TableNotFound(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            max_access_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            Db::new(config, PAGE_SIZE as u64, 0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_contexts_get_distinct_lanes() {
        let db = small_db();
        let a = db.transaction();
        let b = db.transaction();
        drop(a);
        drop(b);
        assert_eq!(db.next_lane.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_min_rts_watermark() {
        let db = small_db();
        assert_eq!(db.min_rts(), Timestamp::ZERO);
        db.advance_min_rts(Timestamp::from_parts(100, 0));
        db.advance_min_rts(Timestamp::from_parts(50, 0));
        assert_eq!(db.min_rts(), Timestamp::from_parts(100, 0));
    }
}
