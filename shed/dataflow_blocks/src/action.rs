/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use futures::future;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::block::Block;
use crate::block::BlockOptions;
use crate::block::TargetBlock;
use crate::completion::Completion;
use crate::error::PostError;
use crate::error::SharedFault;
use crate::pump::BlockState;
use crate::pump::Body;

/// A terminal block: consumes every input item without producing output.
/// With a discarding body it doubles as a null sink.
pub struct ActionBlock<I> {
    state: BlockState<I, ()>,
}

impl<I> ActionBlock<I>
where
    I: Send + 'static,
{
    /// Block with a synchronous body. An `Err` from the body is the block's
    /// originating failure.
    pub fn new<F>(options: BlockOptions, body: F) -> Arc<Self>
    where
        F: Fn(I) -> Result<()> + Send + Sync + 'static,
    {
        let body: Body<I, ()> =
            Arc::new(move |item| future::ready(body(item).map(|()| None)).boxed());
        Arc::new(ActionBlock {
            state: BlockState::spawn("ActionBlock", options, body),
        })
    }

    /// Block with an asynchronous body.
    pub fn new_async<F, Fut>(options: BlockOptions, body: F) -> Arc<Self>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let body: Body<I, ()> = Arc::new(move |item| {
            let fut = body(item);
            async move { fut.await.map(|()| None) }.boxed()
        });
        Arc::new(ActionBlock {
            state: BlockState::spawn("ActionBlock", options, body),
        })
    }
}

impl<I> Block for ActionBlock<I>
where
    I: Send + 'static,
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

impl<I> TargetBlock<I> for ActionBlock<I>
where
    I: Send + 'static,
{
    fn try_post(&self, item: I) -> Result<(), PostError<I>> {
        self.state.try_post(item)
    }

    fn send(&self, item: I) -> BoxFuture<'static, Result<(), PostError<I>>> {
        self.state.send(item)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use assert_matches::assert_matches;

    #[tokio::test]
    async fn consumes_everything_then_completes() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = ActionBlock::new(BlockOptions::default(), {
            let seen = Arc::clone(&seen);
            move |_: u32| {
                seen.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        });
        for item in 0..10 {
            sink.try_post(item).expect("post failed");
        }
        sink.complete();
        assert_matches!(sink.completion().wait().await, Ok(()));
        assert_eq!(seen.load(Ordering::Relaxed), 10);
    }
}
