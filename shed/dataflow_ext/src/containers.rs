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
use dataflow_blocks::ActionBlock;
use dataflow_blocks::Block;
use dataflow_blocks::BlockOptions;
use dataflow_blocks::SourceBlock;
use dataflow_blocks::TargetBlock;
use dataflow_blocks::TransformBlock;

use crate::core::FlowCore;
use crate::flow::Flow;
use crate::flow::FlowInput;
use crate::flow::FlowOutput;
use crate::flow::OutputPort;
use crate::options::FlowOptions;

/// A container around a single transform block: one input, one output.
pub struct TransformFlow<I, O> {
    core: Arc<FlowCore>,
    block: Arc<TransformBlock<I, O>>,
    port: OutputPort<O>,
}

impl<I, O> TransformFlow<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Container with a synchronous transform body.
    pub fn new<F>(options: FlowOptions, body: F) -> Self
    where
        F: Fn(I) -> Result<O> + Send + Sync + 'static,
    {
        Self::from_block(options, TransformBlock::new(BlockOptions::default(), body))
    }

    /// Container with an asynchronous transform body.
    pub fn new_async<F, Fut>(options: FlowOptions, body: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        Self::from_block(
            options,
            TransformBlock::new_async(BlockOptions::default(), body),
        )
    }

    /// Container around an existing transform block, e.g. one built with a
    /// bounded capacity or a custom degree of parallelism.
    pub fn from_block(options: FlowOptions, block: Arc<TransformBlock<I, O>>) -> Self {
        let core = FlowCore::new("TransformFlow", options);
        let as_child: Arc<dyn Block> = block.clone();
        core.register_block(as_child)
            .expect("the first child of a fresh container cannot be a duplicate");
        let as_source: Arc<dyn SourceBlock<O>> = block.clone();
        let port = OutputPort::new(as_source);
        TransformFlow { core, block, port }
    }

    /// The underlying block.
    pub fn block(&self) -> &Arc<TransformBlock<I, O>> {
        &self.block
    }
}

impl<I, O> Flow for TransformFlow<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn core(&self) -> &Arc<FlowCore> {
        &self.core
    }
}

impl<I, O> FlowInput<I> for TransformFlow<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn input_block(&self) -> Arc<dyn TargetBlock<I>> {
        self.block.clone()
    }
}

impl<I, O> FlowOutput<O> for TransformFlow<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn output_port(&self) -> &OutputPort<O> {
        &self.port
    }
}

/// A container around a single action block: one input, no output.
pub struct ActionFlow<I> {
    core: Arc<FlowCore>,
    block: Arc<ActionBlock<I>>,
}

impl<I> ActionFlow<I>
where
    I: Send + 'static,
{
    /// Container with a synchronous body.
    pub fn new<F>(options: FlowOptions, body: F) -> Self
    where
        F: Fn(I) -> Result<()> + Send + Sync + 'static,
    {
        Self::from_block(options, ActionBlock::new(BlockOptions::default(), body))
    }

    /// Container with an asynchronous body.
    pub fn new_async<F, Fut>(options: FlowOptions, body: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::from_block(
            options,
            ActionBlock::new_async(BlockOptions::default(), body),
        )
    }

    /// Container around an existing action block.
    pub fn from_block(options: FlowOptions, block: Arc<ActionBlock<I>>) -> Self {
        let core = FlowCore::new("ActionFlow", options);
        let as_child: Arc<dyn Block> = block.clone();
        core.register_block(as_child)
            .expect("the first child of a fresh container cannot be a duplicate");
        ActionFlow { core, block }
    }

    /// The underlying block.
    pub fn block(&self) -> &Arc<ActionBlock<I>> {
        &self.block
    }
}

impl<I> Flow for ActionFlow<I>
where
    I: Send + 'static,
{
    fn core(&self) -> &Arc<FlowCore> {
        &self.core
    }
}

impl<I> FlowInput<I> for ActionFlow<I>
where
    I: Send + 'static,
{
    fn input_block(&self) -> Arc<dyn TargetBlock<I>> {
        self.block.clone()
    }
}
