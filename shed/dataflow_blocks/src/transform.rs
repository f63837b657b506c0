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
use crate::block::SourceBlock;
use crate::block::TargetBlock;
use crate::completion::Completion;
use crate::error::PostError;
use crate::error::SharedFault;
use crate::link::LinkOptions;
use crate::pump::BlockState;
use crate::pump::Body;

/// A block applying a transform to every input item and offering the result
/// to its output links.
pub struct TransformBlock<I, O> {
    state: BlockState<I, O>,
}

impl<I, O> TransformBlock<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Block with a synchronous body. An `Err` from the body is the block's
    /// originating failure and tears the block down.
    pub fn new<F>(options: BlockOptions, body: F) -> Arc<Self>
    where
        F: Fn(I) -> Result<O> + Send + Sync + 'static,
    {
        let body: Body<I, O> =
            Arc::new(move |item| future::ready(body(item).map(Some)).boxed());
        Arc::new(TransformBlock {
            state: BlockState::spawn("TransformBlock", options, body),
        })
    }

    /// Block with an asynchronous body.
    pub fn new_async<F, Fut>(options: BlockOptions, body: F) -> Arc<Self>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let body: Body<I, O> = Arc::new(move |item| {
            let fut = body(item);
            async move { fut.await.map(Some) }.boxed()
        });
        Arc::new(TransformBlock {
            state: BlockState::spawn("TransformBlock", options, body),
        })
    }
}

impl<I, O> Block for TransformBlock<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
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

impl<I, O> TargetBlock<I> for TransformBlock<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn try_post(&self, item: I) -> Result<(), PostError<I>> {
        self.state.try_post(item)
    }

    fn send(&self, item: I) -> BoxFuture<'static, Result<(), PostError<I>>> {
        self.state.send(item)
    }
}

impl<I, O> SourceBlock<O> for TransformBlock<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn link_to(&self, target: Arc<dyn TargetBlock<O>>, options: LinkOptions<O>) {
        self.state.link(target, options)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use anyhow::anyhow;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    use crate::action::ActionBlock;

    #[tokio::test]
    async fn transforms_and_propagates_completion() {
        let items = Arc::new(Mutex::new(Vec::new()));
        let sink = ActionBlock::new(BlockOptions::default(), {
            let items = Arc::clone(&items);
            move |item| {
                items.lock().push(item);
                Ok(())
            }
        });
        let doubler = TransformBlock::new(BlockOptions::default(), |item: i32| Ok(item * 2));
        doubler.link_to(sink.clone(), LinkOptions::propagate());

        for item in [1, 2, 3] {
            doubler.try_post(item).expect("post failed");
        }
        doubler.complete();

        assert_matches!(doubler.completion().wait().await, Ok(()));
        assert_matches!(sink.completion().wait().await, Ok(()));
        assert_eq!(*items.lock(), vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn body_error_is_an_originating_fault() {
        let items = Arc::new(Mutex::new(Vec::new()));
        let sink = ActionBlock::new(BlockOptions::default(), {
            let items = Arc::clone(&items);
            move |item| {
                items.lock().push(item);
                Ok(())
            }
        });
        let block = TransformBlock::new(BlockOptions::default(), |item: i32| {
            if item == 2 {
                Err(anyhow!("boom"))
            } else {
                Ok(item)
            }
        });
        block.link_to(sink.clone(), LinkOptions::propagate());
        block.try_post(1).expect("post failed");
        block.try_post(2).expect("post failed");

        let error = block
            .completion()
            .wait()
            .await
            .expect_err("expected a fault");
        assert!(!error.is_propagated());
        assert_eq!(error.inner().to_string(), "boom");

        // Terminal blocks reject further input.
        assert_matches!(block.try_post(3), Err(PostError::Closed(3)));
    }

    #[tokio::test]
    async fn external_fault_reaches_propagating_links() {
        let sink = ActionBlock::new(BlockOptions::default(), |_: i32| Ok(()));
        let block = TransformBlock::new(BlockOptions::default(), |item: i32| Ok(item));
        block.link_to(sink.clone(), LinkOptions::propagate());

        block.fault(SharedFault::canceled());

        let error = block
            .completion()
            .wait()
            .await
            .expect_err("expected a fault");
        assert!(error.is_cancellation());
        let downstream = sink
            .completion()
            .wait()
            .await
            .expect_err("expected the fault to propagate");
        assert!(downstream.is_cancellation());
    }

    #[tokio::test]
    async fn parallel_bodies_preserve_input_order() {
        let items = Arc::new(Mutex::new(Vec::new()));
        let sink = ActionBlock::new(BlockOptions::default(), {
            let items = Arc::clone(&items);
            move |item| {
                items.lock().push(item);
                Ok(())
            }
        });
        let block = TransformBlock::new_async(
            BlockOptions::default().with_parallelism(4),
            |item: u64| async move {
                // Later items finish first; output order must not change.
                tokio::time::sleep(std::time::Duration::from_millis(10 - item)).await;
                Ok(item)
            },
        );
        block.link_to(sink.clone(), LinkOptions::propagate());

        for item in 0..8u64 {
            block.try_post(item).expect("post failed");
        }
        block.complete();
        assert_matches!(block.completion().wait().await, Ok(()));
        assert_matches!(sink.completion().wait().await, Ok(()));
        assert_eq!(*items.lock(), (0..8).collect::<Vec<_>>());
    }
}
