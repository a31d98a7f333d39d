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

//! Per-worker observational counters

/// Plain counters kept per worker context. Never shared, never on a lock.
#[derive(Debug, Default, Clone)]
pub struct Stats {
    /// Transactions that committed.
    pub committed: u64,
    /// Operations that failed to acquire a row or version.
    pub aborted_by_get_row: u64,
    /// Commits rejected during pre-validation.
    pub aborted_by_pre_validation: u64,
    /// Commits rejected while splicing write versions.
    pub aborted_by_deferred_row_version_insert: u64,
    /// Commits rejected during main validation.
    pub aborted_by_main_validation: u64,
    /// Commits vetoed by the host write hook.
    pub aborted_by_logging: u64,
    /// Version or row allocations that came back empty.
    pub allocation_failures: u64,
    /// Longest version chain walked by `locate`.
    pub max_chain_len: u64,
}

impl Stats {
    /// Total aborted commits.
    pub fn aborted(&self) -> u64 {
        self.aborted_by_pre_validation
            + self.aborted_by_deferred_row_version_insert
            + self.aborted_by_main_validation
            + self.aborted_by_logging
    }
}
