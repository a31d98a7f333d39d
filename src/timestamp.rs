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

//! Timestamps for transaction ordering
//!
//! A [`Timestamp`] is a totally ordered 128-bit value combining a 64-bit
//! tick with a 64-bit worker lane. Ticks come from the system clock with
//! skew protection; lanes break ties between workers, so two workers can
//! never produce equal timestamps and each worker's sequence is strictly
//! increasing.
//!
//! [`AtomicStamp`] is the shared-memory cell used for version read
//! timestamps: it supports a lock-free raise-to-max, never lowering the
//! stored value.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam::atomic::AtomicCell;

/// Totally ordered 128-bit transaction timestamp.
///
/// Layout: `(tick << 64) | lane`. Ordering compares the tick first and the
/// lane second, which falls out of the raw integer comparison.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u128);

impl Timestamp {
    /// The smallest timestamp; precedes every generated one.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Builds a timestamp from a tick and a worker lane.
    #[inline]
    pub fn from_parts(tick: u64, lane: u64) -> Self {
        Timestamp(((tick as u128) << 64) | lane as u128)
    }

    /// The clock component.
    #[inline]
    pub fn tick(self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// The worker lane component.
    #[inline]
    pub fn lane(self) -> u64 {
        self.0 as u64
    }

    #[inline]
    pub(crate) fn raw(self) -> u128 {
        self.0
    }

    #[inline]
    pub(crate) fn from_raw(raw: u128) -> Self {
        Timestamp(raw)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}:{})", self.tick(), self.lane())
    }
}

/// Atomic timestamp cell with raise-to-max semantics.
///
/// Backs the `rts` field of row versions. The stored value only ever grows;
/// concurrent updates linearize through a compare-and-swap loop.
pub struct AtomicStamp(AtomicCell<u128>);

impl AtomicStamp {
    /// Creates a cell holding `ts`.
    pub fn new(ts: Timestamp) -> Self {
        AtomicStamp(AtomicCell::new(ts.raw()))
    }

    /// Reads the current value.
    #[inline]
    pub fn get(&self) -> Timestamp {
        Timestamp::from_raw(self.0.load())
    }

    /// Overwrites the current value unconditionally.
    ///
    /// Only valid while the owning version is exclusively held (Pending and
    /// not yet chained); shared versions must go through [`Self::update`].
    #[inline]
    pub fn set(&self, ts: Timestamp) {
        self.0.store(ts.raw());
    }

    /// Raises the stored value to `max(current, ts)`.
    pub fn update(&self, ts: Timestamp) {
        let mut current = self.0.load();
        while current < ts.raw() {
            match self.0.compare_exchange(current, ts.raw()) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

impl fmt::Debug for AtomicStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomicStamp({:?})", self.get())
    }
}

/// Per-worker timestamp generator.
///
/// Uses the system clock as the tick base but guarantees strict per-worker
/// monotonicity even if the clock stalls or goes backwards: the next tick is
/// `max(now, last + 1)`.
pub struct TimestampGenerator {
    lane: u64,
    last_tick: u64,
}

impl TimestampGenerator {
    /// Creates a generator for the given worker lane.
    pub fn new(lane: u64) -> Self {
        Self { lane, last_tick: 0 }
    }

    /// The worker lane of this generator.
    pub fn lane(&self) -> u64 {
        self.lane
    }

    /// Produces a timestamp strictly greater than every timestamp this
    /// generator has produced before.
    pub fn generate(&mut self) -> Timestamp {
        let now = clock_tick();
        let tick = if now > self.last_tick {
            now
        } else {
            self.last_tick + 1
        };
        self.last_tick = tick;
        Timestamp::from_parts(tick, self.lane)
    }

    /// Ensures the next generated timestamp compares greater than `ts`,
    /// regardless of which lane produced it.
    pub fn advance_past(&mut self, ts: Timestamp) {
        if ts.tick() > self.last_tick {
            self.last_tick = ts.tick();
        }
    }
}

/// Current system time in nanoseconds, clamped to be positive.
fn clock_tick() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}
