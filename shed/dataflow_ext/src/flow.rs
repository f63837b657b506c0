/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dataflow_blocks::Block;
use dataflow_blocks::BlockOptions;
use dataflow_blocks::Completion;
use dataflow_blocks::LinkOptions;
use dataflow_blocks::PostError;
use dataflow_blocks::Predicate;
use dataflow_blocks::SharedFault;
use dataflow_blocks::SourceBlock;
use dataflow_blocks::TargetBlock;
use dataflow_blocks::TransformBlock;
use dataflow_blocks::unique_name;
use parking_lot::Mutex;
use slog::info;

use crate::core::FlowCore;
use crate::error::FlowError;
use crate::garbage::GarbageRecorder;
use crate::link::link_block_to_flow;

/// A dataflow container: a named unit with children, an aggregated
/// completion, and a fault entry point.
pub trait Flow {
    /// The lifecycle core of this container.
    fn core(&self) -> &Arc<FlowCore>;

    /// Display name, unique within this container type.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Aggregated completion of every child.
    fn completion(&self) -> Completion {
        self.core().completion()
    }

    /// Total number of items buffered across all children.
    fn buffered_count(&self) -> usize {
        self.core().buffered_count()
    }

    /// Tear down every child with a fault.
    fn fault(&self, error: SharedFault) {
        self.core().fault(error)
    }
}

/// A container with a public typed ingress.
pub trait FlowInput<I: Send + 'static>: Flow {
    /// The ingress block.
    fn input_block(&self) -> Arc<dyn TargetBlock<I>>;

    /// Post every item of `items` into the input, waiting for queue
    /// capacity as needed. Returns the number of items posted. The input is
    /// left open: completing it is the caller's decision.
    fn pull_from<It>(&self, items: It) -> impl Future<Output = Result<usize, FlowError>> + Send
    where
        It: IntoIterator<Item = I> + Send,
        It::IntoIter: Send,
    {
        let input = self.input_block();
        let logger = self.core().logger().clone();
        async move {
            let mut count = 0usize;
            for item in items {
                safe_post(&*input, item).await?;
                count += 1;
            }
            info!(logger, "pulled items into input"; "count" => count);
            Ok(count)
        }
    }

    /// Attach an external source block so its items flow into this
    /// container's input and its completion closes the input.
    fn link_from(&self, source: &dyn SourceBlock<I>) {
        info!(self.core().logger(), "linking from source block"; "source" => source.name());
        source.link_to(self.input_block(), LinkOptions::propagate());
    }
}

/// Deliver `item` to `target`, waiting for queue capacity. The fast path
/// posts synchronously; a full queue falls back to an awaited send, so
/// every item of a finite, healthy pipeline is eventually delivered.
pub async fn safe_post<T: Send + 'static>(
    target: &dyn TargetBlock<T>,
    item: T,
) -> Result<(), FlowError> {
    match target.try_post(item) {
        Ok(()) => Ok(()),
        Err(PostError::Full(item)) => match target.send(item).await {
            Ok(()) => Ok(()),
            Err(_) => Err(FlowError::PostFailed {
                block: target.name().to_string(),
            }),
        },
        Err(PostError::Closed(_)) => Err(FlowError::PostFailed {
            block: target.name().to_string(),
        }),
    }
}

/// Output-side state of a single-output container: the egress block, the
/// predicates installed so far (in installation order), and the recorder
/// for discarded outputs.
pub struct OutputPort<O> {
    block: Arc<dyn SourceBlock<O>>,
    conditions: Arc<Mutex<Vec<Predicate<O>>>>,
    garbage: Arc<GarbageRecorder>,
}

impl<O: 'static> OutputPort<O> {
    /// A port over the given egress block.
    pub fn new(block: Arc<dyn SourceBlock<O>>) -> Self {
        OutputPort {
            block,
            conditions: Arc::new(Mutex::new(Vec::new())),
            garbage: Arc::new(GarbageRecorder::default()),
        }
    }

    /// The egress block.
    pub fn block(&self) -> &Arc<dyn SourceBlock<O>> {
        &self.block
    }

    /// The discarded-output statistics.
    pub fn garbage(&self) -> &Arc<GarbageRecorder> {
        &self.garbage
    }

    pub(crate) fn push_condition(&self, predicate: Predicate<O>) {
        self.conditions.lock().push(predicate);
    }

    /// The "nothing matched" predicate: true for items rejected by every
    /// condition installed so far. Evaluated dynamically, so it must be
    /// installed after all conditional links.
    pub(crate) fn leftover_predicate(&self) -> Predicate<O> {
        let conditions = Arc::clone(&self.conditions);
        Arc::new(move |item: &O| !conditions.lock().iter().any(|predicate| predicate(item)))
    }
}

/// A container with a public typed egress and conditional routing.
///
/// Conditional links are consulted in installation order and the first
/// matching predicate wins, so [`FlowOutput::link_left_to_null`] must be
/// installed last.
pub trait FlowOutput<O: Send + 'static>: Flow {
    /// The output-side state.
    fn output_port(&self) -> &OutputPort<O>;

    /// The discarded-output statistics.
    fn garbage(&self) -> &Arc<GarbageRecorder> {
        self.output_port().garbage()
    }

    /// Unconditionally link this container's output into `other` via the
    /// container link protocol.
    fn link_to<F>(&self, other: &F)
    where
        F: FlowInput<O>,
    {
        link_block_to_flow(self.core(), Arc::clone(self.output_port().block()), other);
    }

    /// Route outputs accepted by `predicate` through `transform` into
    /// `other`. The predicate is recorded for leftover tracking, an
    /// intermediate transform block is registered as a child, and the
    /// transform's output is linked to `other` via the container link
    /// protocol.
    fn transform_and_link_when<T, F, Tr, P>(&self, other: &F, transform: Tr, predicate: P)
    where
        T: Send + 'static,
        F: FlowInput<T>,
        Tr: Fn(O) -> T + Send + Sync + 'static,
        P: Fn(&O) -> bool + Send + Sync + 'static,
    {
        let predicate: Predicate<O> = Arc::new(predicate);
        self.output_port().push_condition(Arc::clone(&predicate));

        let converter = TransformBlock::new(BlockOptions::default(), move |item| Ok(transform(item)));
        let as_child: Arc<dyn Block> = converter.clone();
        self.core()
            .register_block(as_child)
            .expect("freshly created converter cannot be a duplicate");
        self.output_port().block().link_to(
            converter.clone(),
            LinkOptions {
                propagate_completion: true,
                predicate: Some(predicate),
            },
        );
        let as_source: Arc<dyn SourceBlock<T>> = converter;
        link_block_to_flow(self.core(), as_source, other);
    }

    /// [`FlowOutput::transform_and_link_when`] with the always-true
    /// predicate.
    fn transform_and_link<T, F, Tr>(&self, other: &F, transform: Tr)
    where
        T: Send + 'static,
        F: FlowInput<T>,
        Tr: Fn(O) -> T + Send + Sync + 'static,
    {
        self.transform_and_link_when(other, transform, |_| true)
    }

    /// Send outputs that matched no installed predicate to a discarding
    /// sink, recording each under its type's friendly name in the garbage
    /// statistics. A type-erased [`AnyItem`] output is recorded under the
    /// runtime type it carries, not under the erased wrapper.
    fn link_left_to_null(&self) {
        let garbage = Arc::clone(self.output_port().garbage());
        let fallback = friendly_type_name::<O>();
        self.link_left_to_null_with(move |item: &O| {
            let label = (item as &dyn Any)
                .downcast_ref::<AnyItem>()
                .map_or(fallback, AnyItem::type_label);
            garbage.record(label);
        });
    }

    /// [`FlowOutput::link_left_to_null`] with a custom observer for each
    /// discarded output.
    fn link_left_to_null_with<Obs>(&self, observer: Obs)
    where
        Obs: Fn(&O) + Send + Sync + 'static,
    {
        let leftover = self.output_port().leftover_predicate();
        let sink = dataflow_blocks::ActionBlock::new(
            BlockOptions::named(unique_name("NullSink")),
            move |item: O| {
                observer(&item);
                Ok(())
            },
        );
        let as_child: Arc<dyn Block> = sink.clone();
        self.core()
            .register_block(as_child)
            .expect("freshly created sink cannot be a duplicate");
        self.output_port().block().link_to(
            sink,
            LinkOptions {
                propagate_completion: true,
                predicate: Some(leftover),
            },
        );
    }
}

/// A type-erased item that remembers the friendly name of the concrete
/// type it carries, so a discarded item is attributed to its runtime type
/// rather than to the erased wrapper.
pub struct AnyItem {
    label: &'static str,
    value: Box<dyn Any + Send>,
}

impl AnyItem {
    /// Erase `value`, capturing its type's friendly name.
    pub fn new<T: Send + 'static>(value: T) -> Self {
        AnyItem {
            label: friendly_type_name::<T>(),
            value: Box::new(value),
        }
    }

    /// Friendly name of the erased type.
    pub fn type_label(&self) -> &'static str {
        self.label
    }

    /// Whether the erased value is a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Recover the concrete value, or hand the item back untouched.
    pub fn downcast<T: 'static>(self) -> Result<T, AnyItem> {
        match self.value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(AnyItem {
                label: self.label,
                value,
            }),
        }
    }
}

impl fmt::Debug for AnyItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyItem").field("type", &self.label).finish()
    }
}

/// Downcast links for containers whose output is a type-erased
/// [`AnyItem`]: route by runtime type, unboxing on the way.
pub trait FlowOutputAny: FlowOutput<AnyItem> {
    /// Route outputs of runtime type `T` into `other`.
    fn link_by_type<T, F>(&self, other: &F)
    where
        T: Send + 'static,
        F: FlowInput<T>,
    {
        self.transform_and_link_when(
            other,
            |item: AnyItem| match item.downcast::<T>() {
                Ok(item) => item,
                // The link predicate admits only values of type `T`.
                Err(_) => unreachable!("downcast link received a mismatched type"),
            },
            |item: &AnyItem| item.is::<T>(),
        )
    }
}

impl<X> FlowOutputAny for X where X: FlowOutput<AnyItem> {}

/// Last path segment of a type name, for garbage labels and logs.
pub(crate) fn friendly_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
