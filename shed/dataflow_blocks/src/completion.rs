/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::future::IntoFuture;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::SharedFault;

/// Terminal outcome of a block or container: success, or a shared fault
/// (which may be a failure, a cancellation, or a propagated marker).
pub type Outcome = Result<(), SharedFault>;

/// One-shot outcome slot.
///
/// The first `try_set` wins; every waiter, past or future, observes the same
/// outcome. This is the single synchronization point between a unit's worker,
/// external faulters, and completion observers.
pub struct CompletionCell {
    state: Mutex<Option<Outcome>>,
    notify: Notify,
}

impl CompletionCell {
    /// A fresh, unresolved cell.
    pub fn new() -> Arc<Self> {
        Arc::new(CompletionCell {
            state: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    /// Resolve the cell. Returns `true` if this call won the terminal race.
    pub fn try_set(&self, outcome: Outcome) -> bool {
        let won = {
            let mut state = self.state.lock();
            if state.is_none() {
                *state = Some(outcome);
                true
            } else {
                false
            }
        };
        if won {
            self.notify.notify_waiters();
        }
        won
    }

    /// The outcome, if the cell is already resolved.
    pub fn peek(&self) -> Option<Outcome> {
        self.state.lock().clone()
    }

    /// Wait for the cell to resolve.
    pub async fn wait(&self) -> Outcome {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.peek() {
                return outcome;
            }
            notified.await;
        }
    }
}

/// Cloneable handle to a unit's terminal outcome.
///
/// Any number of handles may wait on the same cell; all of them resolve with
/// the same [`Outcome`]. The handle also implements [`IntoFuture`], so it can
/// be awaited directly.
#[derive(Clone)]
pub struct Completion {
    cell: Arc<CompletionCell>,
}

impl Completion {
    /// Handle observing `cell`.
    pub fn from_cell(cell: Arc<CompletionCell>) -> Self {
        Completion { cell }
    }

    /// The outcome, if already terminal.
    pub fn peek(&self) -> Option<Outcome> {
        self.cell.peek()
    }

    /// Whether the unit has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.cell.peek().is_some()
    }

    /// Wait for the terminal outcome.
    pub async fn wait(&self) -> Outcome {
        self.cell.wait().await
    }
}

impl IntoFuture for Completion {
    type Output = Outcome;
    type IntoFuture = BoxFuture<'static, Outcome>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.cell.wait().await }.boxed()
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("terminal", &self.is_terminal())
            .finish()
    }
}
