/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::anyhow;
use dataflow_blocks::Block;
use dataflow_blocks::BlockOptions;
use dataflow_blocks::BufferBlock;
use dataflow_blocks::SourceBlock;
use dataflow_blocks::TargetBlock;
use dataflow_blocks::TransformBlock;
use parking_lot::Mutex;
use slog::info;

use crate::core::FlowCore;
use crate::error::FlowError;
use crate::flow::Flow;
use crate::flow::FlowInput;
use crate::flow::FlowOutput;
use crate::flow::OutputPort;
use crate::link::link_block_to_flow;
use crate::options::FlowOptions;

/// Exact-copy fan-out with backpressure.
///
/// Every item posted to the broadcaster is delivered, in post order, to its
/// primary output and to every additionally attached target. Copies are
/// made per target (`Clone` by default, or a custom copy function), and
/// delivery is an awaited send into a dedicated per-target buffer: a slow
/// consumer slows the broadcaster down instead of losing items. This is the
/// opposite trade-off from broadcast-by-latest primitives, which drop.
pub struct Broadcaster<T> {
    core: Arc<FlowCore>,
    transform: Arc<TransformBlock<T, T>>,
    port: OutputPort<T>,
    buffers: Arc<Mutex<Vec<Arc<BufferBlock<T>>>>>,
    primary_linked: AtomicBool,
}

impl<T> Broadcaster<T>
where
    T: Clone + Send + 'static,
{
    /// Broadcaster copying items with [`Clone`].
    pub fn new(options: FlowOptions) -> Self {
        Self::with_copy(options, T::clone)
    }
}

impl<T> Broadcaster<T>
where
    T: Send + 'static,
{
    /// Broadcaster with a custom per-target copy function.
    pub fn with_copy<C>(options: FlowOptions, copy: C) -> Self
    where
        C: Fn(&T) -> T + Send + Sync + 'static,
    {
        let core = FlowCore::new("Broadcaster", options);
        let buffers: Arc<Mutex<Vec<Arc<BufferBlock<T>>>>> = Arc::new(Mutex::new(Vec::new()));
        let copy = Arc::new(copy);

        let transform = TransformBlock::new_async(BlockOptions::default(), {
            let buffers = Arc::clone(&buffers);
            move |item: T| {
                let attached: Vec<_> = buffers.lock().clone();
                let copy = Arc::clone(&copy);
                async move {
                    for buffer in attached {
                        let duplicate = copy(&item);
                        buffer
                            .send(duplicate)
                            .await
                            .map_err(|_| anyhow!("copy buffer '{}' rejected an item", buffer.name()))?;
                    }
                    // The original flows down the primary output edge.
                    Ok(item)
                }
            }
        });
        let as_child: Arc<dyn Block> = transform.clone();
        core.register_block(as_child)
            .expect("a freshly created block cannot be a duplicate");
        let as_source: Arc<dyn SourceBlock<T>> = transform.clone();
        let port = OutputPort::new(as_source);

        Broadcaster {
            core,
            transform,
            port,
            buffers,
            primary_linked: AtomicBool::new(false),
        }
    }

    /// Attach one more downstream target.
    ///
    /// The first target becomes the primary output edge. Every further
    /// target gets a dedicated copy buffer, registered as a child that only
    /// completes after the broadcast transform is done, and linked to the
    /// target through the container link protocol.
    pub fn go_to<F>(&self, other: &F)
    where
        F: FlowInput<T>,
    {
        if !self.primary_linked.swap(true, Ordering::SeqCst) {
            self.link_to(other);
            return;
        }

        let index = self.buffers.lock().len() + 1;
        let buffer = BufferBlock::new(BlockOptions::named(format!("Buffer{}", index)));
        let as_child: Arc<dyn Block> = buffer.clone();
        self.core
            .register_block(as_child)
            .expect("a freshly created buffer cannot be a duplicate");
        info!(
            self.core.logger(),
            "attached broadcast target";
            "buffer" => buffer.name(),
            "target" => other.name()
        );

        // The buffer depends on the broadcast transform: its input closes
        // only once the transform has successfully completed, so the
        // aggregated completion waits for the buffer to drain afterwards.
        tokio::spawn({
            let transform_completion = self.transform.completion();
            let buffer = Arc::clone(&buffer);
            async move {
                if transform_completion.wait().await.is_ok() {
                    buffer.complete();
                }
            }
        });

        self.buffers.lock().push(Arc::clone(&buffer));
        let as_source: Arc<dyn SourceBlock<T>> = buffer;
        link_block_to_flow(&self.core, as_source, other);
    }

    /// Predicate routing is not supported on a broadcaster: every target
    /// receives every item.
    pub fn go_to_when<F, P>(&self, _other: &F, _predicate: P) -> Result<(), FlowError>
    where
        F: FlowInput<T>,
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Err(FlowError::PredicateNotSupported {
            container: self.name().to_string(),
        })
    }
}

impl<T> Flow for Broadcaster<T>
where
    T: Send + 'static,
{
    fn core(&self) -> &Arc<FlowCore> {
        &self.core
    }
}

impl<T> FlowInput<T> for Broadcaster<T>
where
    T: Send + 'static,
{
    fn input_block(&self) -> Arc<dyn TargetBlock<T>> {
        self.transform.clone()
    }
}

impl<T> FlowOutput<T> for Broadcaster<T>
where
    T: Send + 'static,
{
    fn output_port(&self) -> &OutputPort<T> {
        &self.port
    }
}
