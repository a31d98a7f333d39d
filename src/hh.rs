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

//! Heavy-hitter accounting for abort hot spots
//!
//! A fixed-size `(key, count)` table maintained with the Misra-Gries
//! majority algorithm: increment on match, occupy an empty slot, otherwise
//! decrement every slot. Keys surviving with a positive count are the
//! frequent elements. Diagnostic only; never on the hot path.

use std::fmt::Display;
use std::fmt::Write as _;
use std::hash::Hash;

use rustc_hash::FxHashMap;

struct CountEntry<K> {
    key: Option<K>,
    count: u64,
}

/// Misra-Gries sketch over abort keys, with an optional pretty-name map
/// for human-readable dumps.
pub struct HeavyHitterAccounter<K> {
    counts: Vec<CountEntry<K>>,
    names: FxHashMap<K, String>,
}

impl<K: Eq + Hash + Clone + Display> HeavyHitterAccounter<K> {
    /// Creates a sketch with `slots` counters.
    pub fn new(slots: usize) -> Self {
        let mut counts = Vec::with_capacity(slots);
        for _ in 0..slots {
            counts.push(CountEntry {
                key: None,
                count: 0,
            });
        }
        Self {
            counts,
            names: FxHashMap::default(),
        }
    }

    /// Registers a pretty name for a key.
    pub fn add_name(&mut self, key: K, pretty_name: String) {
        self.names.insert(key, pretty_name);
    }

    /// Accounts one occurrence of `key`.
    pub fn account(&mut self, key: K) {
        let mut empty_slot = None;
        for (i, entry) in self.counts.iter_mut().enumerate() {
            if entry.key.as_ref() == Some(&key) {
                entry.count += 1;
                return;
            }
            if empty_slot.is_none() && entry.count == 0 {
                empty_slot = Some(i);
            }
        }

        if let Some(i) = empty_slot {
            self.counts[i].key = Some(key);
            self.counts[i].count = 1;
            return;
        }

        for entry in &mut self.counts {
            if entry.count != 0 {
                entry.count -= 1;
            }
        }
    }

    /// Current estimated count for `key`, zero if not tracked.
    pub fn estimate(&self, key: &K) -> u64 {
        self.counts
            .iter()
            .find(|entry| entry.key.as_ref() == Some(key))
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    /// Dumps the surviving keys ordered by descending count.
    pub fn dump_stats(&self) -> String {
        let mut survivors: Vec<(&K, u64)> = self
            .counts
            .iter()
            .filter(|entry| entry.count != 0)
            .filter_map(|entry| entry.key.as_ref().map(|key| (key, entry.count)))
            .collect();
        survivors.sort_by(|a, b| b.1.cmp(&a.1));

        let mut out = String::new();
        for (key, count) in survivors {
            match self.names.get(key) {
                Some(name) => {
                    let _ = writeln!(out, "Access item: {name}, count={count}");
                }
                None => {
                    let _ = writeln!(out, "Access item: {key}, count={count}");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_matches() {
        let mut hh = HeavyHitterAccounter::new(4);
        for _ in 0..5 {
            hh.account("hot");
        }
        hh.account("cold");
        assert_eq!(hh.estimate(&"hot"), 5);
        assert_eq!(hh.estimate(&"cold"), 1);
    }

    #[test]
    fn test_decrement_when_full() {
        let mut hh = HeavyHitterAccounter::new(2);
        hh.account("a");
        hh.account("a");
        hh.account("b");
        // Table full; a third distinct key decrements everyone.
        hh.account("c");
        assert_eq!(hh.estimate(&"a"), 1);
        assert_eq!(hh.estimate(&"b"), 0);
        assert_eq!(hh.estimate(&"c"), 0);
        // The drained slot is reusable.
        hh.account("c");
        assert_eq!(hh.estimate(&"c"), 1);
    }

    #[test]
    fn test_majority_survives() {
        let mut hh = HeavyHitterAccounter::new(2);
        for i in 0..100 {
            hh.account("majority");
            hh.account(if i % 2 == 0 { "x" } else { "y" });
        }
        assert!(hh.estimate(&"majority") > 0);
    }

    #[test]
    fn test_dump_ordered_and_named() {
        let mut hh = HeavyHitterAccounter::new(4);
        hh.add_name("k1", "orders/row 7".to_string());
        for _ in 0..3 {
            hh.account("k1");
        }
        hh.account("k2");
        let dump = hh.dump_stats();
        let first = dump.lines().next().unwrap();
        assert!(first.contains("orders/row 7"));
        assert!(first.contains("count=3"));
        assert!(dump.lines().nth(1).unwrap().contains("k2"));
    }
}
