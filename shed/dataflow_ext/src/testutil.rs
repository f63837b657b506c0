/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Test doubles for lifecycle tests: a block whose completion is resolved by
//! hand, and a logger that captures formatted records.

use std::sync::Arc;
use std::sync::Mutex;

use dataflow_blocks::Block;
use dataflow_blocks::Completion;
use dataflow_blocks::CompletionCell;
use dataflow_blocks::SharedFault;
use slog::o;
use slog::Drain;
use slog::Logger;

/// A block with no worker: tests resolve its completion explicitly.
pub(crate) struct ManualBlock {
    name: String,
    buffered: usize,
    cell: Arc<CompletionCell>,
}

impl ManualBlock {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Self::with_buffered(name, 0)
    }

    pub(crate) fn with_buffered(name: &str, buffered: usize) -> Arc<Self> {
        Arc::new(ManualBlock {
            name: name.to_string(),
            buffered,
            cell: CompletionCell::new(),
        })
    }

    pub(crate) fn resolve_ok(&self) {
        self.cell.try_set(Ok(()));
    }

    pub(crate) fn resolve_err(&self, error: SharedFault) {
        self.cell.try_set(Err(error));
    }
}

impl Block for ManualBlock {
    fn name(&self) -> &str {
        &self.name
    }

    fn buffered_count(&self) -> usize {
        self.buffered
    }

    fn complete(&self) {
        self.cell.try_set(Ok(()));
    }

    fn fault(&self, error: SharedFault) {
        self.cell.try_set(Err(error));
    }

    fn completion(&self) -> Completion {
        Completion::from_cell(Arc::clone(&self.cell))
    }
}

struct CaptureDrain {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Drain for CaptureDrain {
    type Ok = ();
    type Err = slog::Never;

    fn log(
        &self,
        record: &slog::Record<'_>,
        _values: &slog::OwnedKVList,
    ) -> Result<Self::Ok, Self::Err> {
        self.lines
            .lock()
            .expect("lock poisoned")
            .push(format!("{} {}", record.level(), record.msg()));
        Ok(())
    }
}

/// A logger that appends `"LEVEL message"` lines to the returned buffer.
pub(crate) fn logger_to() -> (Logger, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let drain = CaptureDrain {
        lines: Arc::clone(&lines),
    };
    (Logger::root(drain.fuse(), o!()), lines)
}
