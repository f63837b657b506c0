/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

static COUNTERS: Lazy<Mutex<HashMap<String, u64>>> = Lazy::new(Default::default);

/// Derive a process-wide unique display name from a friendly type name by
/// appending a per-name monotonic counter: the first call with
/// `"BufferBlock"` yields `"BufferBlock1"`, the second `"BufferBlock2"`.
pub fn unique_name(friendly: &str) -> String {
    let mut counters = COUNTERS.lock();
    let counter = counters.entry(friendly.to_string()).or_insert(0);
    *counter += 1;
    format!("{}{}", friendly, counter)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counters_are_per_name() {
        let first = unique_name("NameTestUnit");
        let second = unique_name("NameTestUnit");
        let other = unique_name("NameTestOther");
        assert_eq!(first, "NameTestUnit1");
        assert_eq!(second, "NameTestUnit2");
        assert_eq!(other, "NameTestOther1");
    }
}
