/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::completion::Completion;
use crate::error::PostError;
use crate::error::SharedFault;
use crate::link::LinkOptions;

/// Default bound of a block's input queue.
pub const DEFAULT_CAPACITY: usize = 256;

/// Uniform surface of an asynchronous processing block.
pub trait Block: Send + Sync + 'static {
    /// Display name, unique within the process unless explicitly overridden.
    fn name(&self) -> &str;

    /// Number of items currently queued at the block's input.
    fn buffered_count(&self) -> usize;

    /// Signal that no further input will be posted. The block drains its
    /// queue, finishes in-flight work, forwards completion along propagating
    /// links, and resolves its completion with success. Idempotent.
    fn complete(&self);

    /// Transition the block to a faulted terminal state. Queued items are
    /// discarded and propagating links are faulted with the same error. The
    /// first terminal outcome wins; later calls are no-ops.
    fn fault(&self, error: SharedFault);

    /// Handle to the block's terminal outcome.
    fn completion(&self) -> Completion;
}

/// A block that accepts input items of type `T`.
pub trait TargetBlock<T>: Block {
    /// Post without waiting. The item is handed back if the queue is full or
    /// the block no longer accepts input.
    fn try_post(&self, item: T) -> Result<(), PostError<T>>;

    /// Post, waiting for queue capacity. Errors only when the block no
    /// longer accepts input.
    fn send(&self, item: T) -> BoxFuture<'static, Result<(), PostError<T>>>;
}

/// A block that produces output items of type `T` and can be linked to
/// downstream targets.
pub trait SourceBlock<T>: Block {
    /// Attach `target` to this block's output. Links are consulted in
    /// attachment order; each item goes to the first link whose predicate
    /// accepts it.
    fn link_to(&self, target: Arc<dyn TargetBlock<T>>, options: LinkOptions<T>);
}

/// Construction options common to all blocks.
#[derive(Clone)]
pub struct BlockOptions {
    /// Explicit display name; auto-numbered from the block type's friendly
    /// name when absent.
    pub name: Option<String>,
    /// Bound of the input queue.
    pub capacity: usize,
    /// How many items the body may process concurrently. Outputs are still
    /// emitted in input order.
    pub parallelism: usize,
}

impl Default for BlockOptions {
    fn default() -> Self {
        BlockOptions {
            name: None,
            capacity: DEFAULT_CAPACITY,
            parallelism: 1,
        }
    }
}

impl BlockOptions {
    /// Options with an explicit display name.
    pub fn named(name: impl Into<String>) -> Self {
        BlockOptions {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Replace the input queue bound.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Replace the body concurrency.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }
}
