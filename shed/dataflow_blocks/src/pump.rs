/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::block::BlockOptions;
use crate::block::TargetBlock;
use crate::completion::Completion;
use crate::completion::CompletionCell;
use crate::error::PostError;
use crate::error::SharedFault;
use crate::link::LinkOptions;
use crate::link::LinkSet;
use crate::name::unique_name;

/// Body of a block: consumes one input item, optionally yields one output
/// item. An `Err` is the block's originating failure.
pub(crate) type Body<I, O> =
    Arc<dyn Fn(I) -> BoxFuture<'static, anyhow::Result<Option<O>>> + Send + Sync>;

/// State shared between a block facade and its worker task. All three
/// concrete blocks are this state plus a body.
pub(crate) struct BlockState<I, O> {
    name: String,
    sender: Mutex<Option<mpsc::Sender<I>>>,
    queued: Arc<AtomicUsize>,
    cell: Arc<CompletionCell>,
    links: Arc<LinkSet<O>>,
}

impl<I, O> BlockState<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Allocate the channel, spawn the worker, and return the facade state.
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(friendly: &str, options: BlockOptions, body: Body<I, O>) -> Self {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| unique_name(friendly));
        let (sender, receiver) = mpsc::channel(options.capacity.max(1));
        let queued = Arc::new(AtomicUsize::new(0));
        let cell = CompletionCell::new();
        let links = Arc::new(LinkSet::new());
        tokio::spawn(run_pump(
            receiver,
            Arc::clone(&queued),
            Arc::clone(&cell),
            Arc::clone(&links),
            options.parallelism,
            body,
        ));
        BlockState {
            name,
            sender: Mutex::new(Some(sender)),
            queued,
            cell,
            links,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn buffered_count(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    pub(crate) fn complete(&self) {
        self.sender.lock().take();
    }

    pub(crate) fn fault(&self, error: SharedFault) {
        if self.cell.try_set(Err(error)) {
            self.sender.lock().take();
        }
    }

    pub(crate) fn completion(&self) -> Completion {
        Completion::from_cell(Arc::clone(&self.cell))
    }

    pub(crate) fn try_post(&self, item: I) -> Result<(), PostError<I>> {
        let sender = self.sender.lock().clone();
        match sender {
            None => Err(PostError::Closed(item)),
            Some(sender) => match sender.try_send(item) {
                Ok(()) => {
                    self.queued.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Full(item)) => Err(PostError::Full(item)),
                Err(mpsc::error::TrySendError::Closed(item)) => Err(PostError::Closed(item)),
            },
        }
    }

    pub(crate) fn send(&self, item: I) -> BoxFuture<'static, Result<(), PostError<I>>> {
        let sender = self.sender.lock().clone();
        let queued = Arc::clone(&self.queued);
        Box::pin(async move {
            match sender {
                None => Err(PostError::Closed(item)),
                Some(sender) => match sender.send(item).await {
                    Ok(()) => {
                        queued.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                    Err(mpsc::error::SendError(item)) => Err(PostError::Closed(item)),
                },
            }
        })
    }

    pub(crate) fn link(&self, target: Arc<dyn TargetBlock<O>>, options: LinkOptions<O>) {
        self.links.add(target, options);
    }
}

/// The worker loop: pull items, apply the body with the configured
/// concurrency (outputs stay in input order), offer outputs to the links,
/// and race everything against the block's own terminal state so an
/// external fault tears the worker down promptly.
async fn run_pump<I, O>(
    receiver: mpsc::Receiver<I>,
    queued: Arc<AtomicUsize>,
    cell: Arc<CompletionCell>,
    links: Arc<LinkSet<O>>,
    parallelism: usize,
    body: Body<I, O>,
) where
    I: Send + 'static,
    O: Send + 'static,
{
    let mut receiver = receiver;
    let inbound = stream::poll_fn(move |cx| receiver.poll_recv(cx));
    let mut results = inbound
        .map(move |item| {
            queued.fetch_sub(1, Ordering::Relaxed);
            body(item)
        })
        .buffered(parallelism.max(1));

    let outcome = loop {
        let next = tokio::select! {
            terminal = cell.wait() => {
                if let Err(error) = terminal {
                    links.fault_targets(&error);
                }
                return;
            }
            next = results.next() => next,
        };
        match next {
            // Input closed and every queued item processed.
            None => break Ok(()),
            Some(Ok(Some(output))) => {
                tokio::select! {
                    terminal = cell.wait() => {
                        if let Err(error) = terminal {
                            links.fault_targets(&error);
                        }
                        return;
                    }
                    () = links.offer(output) => {}
                }
            }
            Some(Ok(None)) => {}
            Some(Err(error)) => break Err(SharedFault::new(error)),
        }
    };

    // Propagate the terminal state exactly once: if an external fault won
    // the race while we were finishing, forward that instead of our own
    // outcome.
    let won = cell.try_set(outcome.clone());
    let effective = if won {
        outcome
    } else {
        cell.peek().unwrap_or(outcome)
    };
    match effective {
        Ok(()) => links.complete_targets(),
        Err(error) => links.fault_targets(&error),
    }
}
