/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::sync::Arc;
use std::sync::Weak;

use anyhow::Result;
use dataflow_blocks::unique_name;
use dataflow_blocks::Block;
use dataflow_blocks::Completion;
use dataflow_blocks::CompletionCell;
use dataflow_blocks::Outcome;
use dataflow_blocks::Propagated;
use dataflow_blocks::SharedFault;
use futures::future;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use slog::debug;
use slog::error;
use slog::o;
use slog::Logger;

use crate::child::Child;
use crate::error::FlowError;
use crate::options::FlowOptions;
use crate::options::PerformanceMode;

/// Callback invoked when a child completes successfully. An `Err` is
/// treated like a failure of the child itself.
pub type SuccessCallback = Box<dyn FnOnce() -> Result<()> + Send>;

/// Lifecycle core of a container.
///
/// A `FlowCore` owns the children list, the aggregated completion, the
/// fault entry point, and the optional performance monitor. Typed
/// containers embed an `Arc<FlowCore>` and register their blocks with it
/// during construction.
///
/// The children list is append-only while the container runs, and children
/// may only be registered by components that are themselves reachable while
/// the container is still running; that is what lets the aggregation loop
/// terminate.
///
/// Registration, linking, and monitoring spawn observer tasks, so cores must
/// be created from within a tokio runtime.
pub struct FlowCore {
    name: String,
    options: FlowOptions,
    logger: Logger,
    self_ref: Weak<FlowCore>,
    children: Mutex<Arc<Vec<Child>>>,
    cell: Arc<CompletionCell>,
    driver: OnceCell<()>,
    cleanup: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FlowCore {
    /// A fresh core named by suffixing `friendly` with a process-wide
    /// counter, e.g. `"Broadcaster"` becomes `"Broadcaster1"`.
    pub fn new(friendly: &str, options: FlowOptions) -> Arc<Self> {
        let name = unique_name(friendly);
        let logger = options.logger.new(o!("container" => name.clone()));
        let core = Arc::new_cyclic(|weak| FlowCore {
            name,
            options,
            logger,
            self_ref: weak.clone(),
            children: Mutex::new(Arc::new(Vec::new())),
            cell: CompletionCell::new(),
            driver: OnceCell::new(),
            cleanup: Mutex::new(None),
        });
        if core.options.container_monitor || core.options.block_monitor {
            tokio::spawn(monitor_loop(Arc::downgrade(&core)));
        }
        core
    }

    /// The container's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The options the container was created with.
    pub fn options(&self) -> &FlowOptions {
        &self.options
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.logger
    }

    pub(crate) fn weak_ref(&self) -> Weak<FlowCore> {
        self.self_ref.clone()
    }

    /// Register a block as a lifecycle child. Fails if the same block is
    /// already registered, directly or through a nested container.
    pub fn register_block(&self, block: Arc<dyn Block>) -> Result<(), FlowError> {
        self.register_block_with(block, None)
    }

    /// Like [`FlowCore::register_block`], with a callback to run when the
    /// block completes successfully.
    pub fn register_block_with(
        &self,
        block: Arc<dyn Block>,
        on_success: Option<SuccessCallback>,
    ) -> Result<(), FlowError> {
        let identity = block_identity(&block);
        let mut children = self.children.lock();
        let duplicate = children
            .iter()
            .flat_map(Child::blocks)
            .any(|existing| block_identity(&existing) == identity);
        if duplicate {
            return Err(FlowError::DuplicateChild {
                container: self.name.clone(),
                block: block.name().to_string(),
            });
        }
        let child = Child::block(self, block, on_success);
        debug!(self.logger, "registered block child"; "child" => child.name());
        append(&mut children, child);
        Ok(())
    }

    /// Register a nested container as a lifecycle child. The nested
    /// container must already have its own children registered.
    pub fn register_flow(&self, flow: Arc<FlowCore>) {
        self.register_flow_with(flow, None)
    }

    /// Like [`FlowCore::register_flow`], with a success callback.
    pub fn register_flow_with(&self, flow: Arc<FlowCore>, on_success: Option<SuccessCallback>) {
        let child = Child::flow(self, flow, on_success);
        debug!(self.logger, "registered container child"; "child" => child.name());
        let mut children = self.children.lock();
        append(&mut children, child);
    }

    /// Every underlying block, flattened through nested containers, in
    /// registration order.
    pub fn blocks(&self) -> Vec<Arc<dyn Block>> {
        self.children_snapshot()
            .iter()
            .flat_map(Child::blocks)
            .collect()
    }

    /// Total number of items buffered across all children.
    pub fn buffered_count(&self) -> usize {
        self.children_snapshot()
            .iter()
            .map(Child::buffered_count)
            .sum()
    }

    /// Whether the aggregated completion has resolved.
    pub fn is_terminal(&self) -> bool {
        self.cell.peek().is_some()
    }

    /// Install a hook to run exactly once when the aggregated completion
    /// resolves.
    pub fn on_cleanup(&self, hook: impl FnOnce() + Send + 'static) {
        *self.cleanup.lock() = Some(Box::new(hook));
    }

    /// The aggregated completion of every registered child.
    ///
    /// The aggregation is started on first observation and memoized; every
    /// handle resolves with the same outcome. Observing the completion of a
    /// container with no children yields [`FlowError::NoChildRegistered`].
    pub fn completion(&self) -> Completion {
        self.driver.get_or_init(|| {
            if let Some(core) = self.self_ref.upgrade() {
                tokio::spawn(async move {
                    let outcome = core.run_lifecycle().await;
                    core.cell.try_set(outcome);
                });
            }
        });
        Completion::from_cell(Arc::clone(&self.cell))
    }

    /// Await every child on a stable snapshot of the children list: if
    /// children were registered while awaiting (a broadcaster attaching a
    /// copy buffer, say), loop and await the larger snapshot too.
    async fn run_lifecycle(&self) -> Outcome {
        let mut snapshot = self.children_snapshot();
        if snapshot.is_empty() {
            return Err(SharedFault::new(anyhow::Error::new(
                FlowError::NoChildRegistered {
                    container: self.name.clone(),
                },
            )));
        }
        loop {
            let outcomes =
                future::join_all(snapshot.iter().map(|child| child.wrapped().wait())).await;
            let latest = self.children_snapshot();
            if Arc::ptr_eq(&latest, &snapshot) {
                self.run_cleanup();
                return unwrap_with_priority(outcomes);
            }
            snapshot = latest;
        }
    }

    fn run_cleanup(&self) {
        if let Some(hook) = self.cleanup.lock().take() {
            hook();
        }
    }

    /// Tear down every not-yet-terminal underlying block.
    ///
    /// The error each block receives depends on `error`: a propagated
    /// marker passes through untouched, a cancellation becomes
    /// [`Propagated::SiblingUnitCanceled`], anything else becomes
    /// [`Propagated::SiblingUnitFailed`]. The originator of a failure keeps
    /// its own cause; only its peers see the marker.
    pub fn fault(&self, error: SharedFault) {
        let outgoing = if error.is_propagated() {
            error.clone()
        } else if error.is_cancellation() {
            SharedFault::propagated(Propagated::SiblingUnitCanceled)
        } else {
            SharedFault::propagated(Propagated::SiblingUnitFailed)
        };
        error!(self.logger, "faulting container"; "cause" => %error);
        for block in self.blocks() {
            if !block.completion().is_terminal() {
                block.fault(outgoing.clone());
            }
        }
    }

    fn children_snapshot(&self) -> Arc<Vec<Child>> {
        Arc::clone(&self.children.lock())
    }
}

fn append(children: &mut Arc<Vec<Child>>, child: Child) {
    let mut list = (**children).clone();
    list.push(child);
    *children = Arc::new(list);
}

fn block_identity(block: &Arc<dyn Block>) -> *const u8 {
    Arc::as_ptr(block) as *const u8
}

/// Pick the aggregate outcome of a set of children: the highest-priority
/// fault wins, where an originating error outranks a cancellation, which
/// outranks a propagated marker. Within a rank the first observed wins, so
/// the completion of a container surfaces the originating diagnosis rather
/// than the markers it scattered over the siblings.
fn unwrap_with_priority(outcomes: Vec<Outcome>) -> Outcome {
    fn rank(error: &SharedFault) -> u8 {
        if error.is_propagated() {
            2
        } else if error.is_cancellation() {
            1
        } else {
            0
        }
    }

    let mut best: Option<SharedFault> = None;
    for outcome in outcomes {
        if let Err(error) = outcome {
            let better = match &best {
                None => true,
                Some(current) => rank(&error) < rank(current),
            };
            if better {
                best = Some(error);
            }
        }
    }
    match best {
        None => Ok(()),
        Some(error) => Err(error),
    }
}

/// Cooperative monitor: every interval, log the container and/or per-block
/// buffered counts. Exits when the container completes or is dropped.
async fn monitor_loop(core: Weak<FlowCore>) {
    let interval = match core.upgrade() {
        Some(core) => core.options.monitor_interval,
        None => return,
    };
    loop {
        tokio::time::sleep(interval).await;
        let Some(core) = core.upgrade() else { return };
        if core.is_terminal() {
            return;
        }
        let verbose = core.options.performance_mode == PerformanceMode::Verbose;
        if core.options.container_monitor {
            let count = core.buffered_count();
            if count > 0 || verbose {
                debug!(core.logger, "buffered items"; "count" => count);
            }
        }
        if core.options.block_monitor {
            for block in core.blocks() {
                let count = block.buffered_count();
                if count > 0 || verbose {
                    debug!(
                        core.logger,
                        "buffered items in block";
                        "block" => block.name(),
                        "count" => count
                    );
                }
            }
        }
    }
}
