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

use dataflow_blocks::Block;
use dataflow_blocks::Completion;
use dataflow_blocks::CompletionCell;
use dataflow_blocks::SharedFault;
use slog::error;
use slog::Logger;

use crate::core::FlowCore;
use crate::core::SuccessCallback;

/// A lifecycle child of a container: either a raw block or a nested
/// container. Both carry the completion already wrapped with the fault
/// classification rules.
#[derive(Clone)]
pub(crate) enum ChildKind {
    Block(Arc<dyn Block>),
    Flow(Arc<FlowCore>),
}

#[derive(Clone)]
pub(crate) struct Child {
    name: String,
    kind: ChildKind,
    wrapped: Completion,
}

impl Child {
    pub(crate) fn block(
        owner: &FlowCore,
        block: Arc<dyn Block>,
        on_success: Option<SuccessCallback>,
    ) -> Self {
        let name = block.name().to_string();
        let wrapped = wrap_completion(owner, name.clone(), block.completion(), on_success);
        Child {
            name,
            kind: ChildKind::Block(block),
            wrapped,
        }
    }

    pub(crate) fn flow(
        owner: &FlowCore,
        flow: Arc<FlowCore>,
        on_success: Option<SuccessCallback>,
    ) -> Self {
        let name = flow.name().to_string();
        let wrapped = wrap_completion(owner, name.clone(), flow.completion(), on_success);
        Child {
            name,
            kind: ChildKind::Flow(flow),
            wrapped,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// The child's completion with fault classification applied.
    pub(crate) fn wrapped(&self) -> &Completion {
        &self.wrapped
    }

    /// Every underlying block, flattened through nested containers, in
    /// registration order.
    pub(crate) fn blocks(&self) -> Vec<Arc<dyn Block>> {
        match &self.kind {
            ChildKind::Block(block) => vec![Arc::clone(block)],
            ChildKind::Flow(flow) => flow.blocks(),
        }
    }

    pub(crate) fn buffered_count(&self) -> usize {
        match &self.kind {
            ChildKind::Block(block) => block.buffered_count(),
            ChildKind::Flow(flow) => flow.buffered_count(),
        }
    }
}

/// Wrap a raw child completion with the container's fault semantics.
///
/// The wrapped completion resolves with the same outcome as the raw one,
/// except that a success callback failure turns success into a failure. On
/// the way it decides whether the container must be faulted:
///
/// * an originating failure or a cancellation tears the container down, so
///   siblings stop too;
/// * a propagated marker does not — the child went down *because* the
///   container was already faulting, and re-faulting would cascade forever.
///
/// The owner is held weakly: a wrapper never keeps a dead container alive,
/// and faulting through the upgrade is safe to re-enter.
fn wrap_completion(
    owner: &FlowCore,
    unit: String,
    raw: Completion,
    on_success: Option<SuccessCallback>,
) -> Completion {
    let cell = CompletionCell::new();
    let wrapped = Completion::from_cell(Arc::clone(&cell));
    let weak: Weak<FlowCore> = owner.weak_ref();
    let logger: Logger = owner.logger().clone();
    tokio::spawn(async move {
        let outcome = match raw.wait().await {
            Err(error) => {
                if !error.is_propagated() {
                    if let Some(owner) = weak.upgrade() {
                        owner.fault(error.clone());
                    }
                }
                Err(error)
            }
            Ok(()) => match on_success.map(|callback| callback()).transpose() {
                Ok(_) => Ok(()),
                Err(cause) => {
                    let error = SharedFault::new(cause);
                    error!(
                        logger,
                        "success callback failed";
                        "unit" => %unit,
                        "error" => %error
                    );
                    if let Some(owner) = weak.upgrade() {
                        owner.fault(error.clone());
                    }
                    Err(error)
                }
            },
        };
        cell.try_set(outcome);
    });
    wrapped
}
