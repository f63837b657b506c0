/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::collections::HashMap;

use parking_lot::Mutex;

/// Thread-safe multiset of labels for outputs that matched no link predicate
/// and were discarded into the null sink.
#[derive(Default)]
pub struct GarbageRecorder {
    counts: Mutex<HashMap<String, u64>>,
}

impl GarbageRecorder {
    /// Count one discarded output under `label`.
    pub fn record(&self, label: impl Into<String>) {
        *self.counts.lock().entry(label.into()).or_insert(0) += 1;
    }

    /// How many outputs were discarded under `label`.
    pub fn count(&self, label: &str) -> u64 {
        self.counts.lock().get(label).copied().unwrap_or(0)
    }

    /// Snapshot of every label and its count.
    pub fn counts(&self) -> HashMap<String, u64> {
        self.counts.lock().clone()
    }

    /// Total number of discarded outputs.
    pub fn total(&self) -> u64 {
        self.counts.lock().values().sum()
    }
}
