/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::sync::Arc;

use futures::future;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::block::Block;
use crate::block::BlockOptions;
use crate::block::SourceBlock;
use crate::block::TargetBlock;
use crate::completion::Completion;
use crate::error::PostError;
use crate::error::SharedFault;
use crate::link::LinkOptions;
use crate::pump::BlockState;
use crate::pump::Body;

/// An identity pass-through block with its own bounded queue, used to
/// decouple a producer from a consumer.
pub struct BufferBlock<T> {
    state: BlockState<T, T>,
}

impl<T> BufferBlock<T>
where
    T: Send + 'static,
{
    /// A fresh buffer.
    pub fn new(options: BlockOptions) -> Arc<Self> {
        let body: Body<T, T> = Arc::new(|item| future::ready(Ok(Some(item))).boxed());
        Arc::new(BufferBlock {
            state: BlockState::spawn("BufferBlock", options, body),
        })
    }
}

impl<T> Block for BufferBlock<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        self.state.name()
    }

    fn buffered_count(&self) -> usize {
        self.state.buffered_count()
    }

    fn complete(&self) {
        self.state.complete()
    }

    fn fault(&self, error: SharedFault) {
        self.state.fault(error)
    }

    fn completion(&self) -> Completion {
        self.state.completion()
    }
}

impl<T> TargetBlock<T> for BufferBlock<T>
where
    T: Send + 'static,
{
    fn try_post(&self, item: T) -> Result<(), PostError<T>> {
        self.state.try_post(item)
    }

    fn send(&self, item: T) -> BoxFuture<'static, Result<(), PostError<T>>> {
        self.state.send(item)
    }
}

impl<T> SourceBlock<T> for BufferBlock<T>
where
    T: Send + 'static,
{
    fn link_to(&self, target: Arc<dyn TargetBlock<T>>, options: LinkOptions<T>) {
        self.state.link(target, options)
    }
}
