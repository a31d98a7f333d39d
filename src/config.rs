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

//! Engine configuration
//!
//! Every concurrency-control policy knob is a runtime field here. A single
//! [`EngineConfig`] is attached to the [`crate::Db`] at construction and
//! copied into each worker context.

/// Configuration options for the MV-OCC engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard cap on access items per transaction.
    /// Exceeding it is a programmer error and panics.
    /// Default: 1024
    pub max_access_size: usize,

    /// Initial bucket count reserved in the duplicate-access map.
    /// Default: 16
    pub access_bucket_root_count: usize,

    /// If true, `locate` samples a Pending version's status once and gives
    /// up instead of spin-waiting for the owner to resolve it.
    /// Default: false
    pub no_wait_for_pending: bool,

    /// If true (and not validating), Pending versions are stepped over
    /// rather than treated as a conflict. Only meaningful together with
    /// `no_wait_for_pending`.
    /// Default: false
    pub skip_pending: bool,

    /// If true, a combined read-write locate refuses to install a version
    /// anywhere but directly below the newest committed version.
    /// Default: true
    pub insert_newest_version_only: bool,

    /// If true, rows involved in an aborted transaction are remembered so
    /// the host can replay them deterministically.
    /// Default: false
    pub reserve_after_abort: bool,

    /// Enables the per-row inlined version slot for column families that
    /// opt into inlining.
    /// Default: true
    pub inlined_row_version: bool,

    /// Places the inlined slot on the alternate row sentinel instead of the
    /// primary one.
    /// Default: false
    pub inline_with_alt_row: bool,

    /// While reading a sufficiently old non-inlined version, escalate to a
    /// write that materializes an inlined copy.
    /// Default: false
    pub promote_non_inlined_version: bool,

    /// Tracks abort hot spots in a heavy-hitter sketch. Diagnostic only.
    /// Default: false
    pub abort_hh: bool,

    /// Slot count of the heavy-hitter sketch.
    /// Default: 16
    pub abort_hh_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_access_size: 1024,
            access_bucket_root_count: 16,
            no_wait_for_pending: false,
            skip_pending: false,
            insert_newest_version_only: true,
            reserve_after_abort: false,
            inlined_row_version: true,
            inline_with_alt_row: false,
            promote_non_inlined_version: false,
            abort_hh: false,
            abort_hh_size: 16,
        }
    }
}

impl EngineConfig {
    /// Validates the configuration, returning a message for the first
    /// problem found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_access_size == 0 || self.max_access_size > u16::MAX as usize {
            return Err(format!(
                "max_access_size must be in 1..={}, got {}",
                u16::MAX,
                self.max_access_size
            ));
        }
        if self.abort_hh && self.abort_hh_size == 0 {
            return Err("abort_hh_size must be non-zero when abort_hh is enabled".to_string());
        }
        if self.skip_pending && !self.no_wait_for_pending {
            return Err("skip_pending requires no_wait_for_pending".to_string());
        }
        Ok(())
    }
}
