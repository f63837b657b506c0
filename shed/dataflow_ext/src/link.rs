/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::sync::Arc;

use dataflow_blocks::Block;
use dataflow_blocks::LinkOptions;
use dataflow_blocks::Outcome;
use dataflow_blocks::Propagated;
use dataflow_blocks::SharedFault;
use dataflow_blocks::SourceBlock;
use futures::future;
use slog::info;

use crate::core::FlowCore;
use crate::flow::FlowInput;

/// Couple `source_block` (owned by container `source`) to `target`'s input.
///
/// The edge itself never propagates completion. Instead:
///
/// * the target's input is closed only once BOTH the block and the whole
///   source container have completed successfully — the source may have
///   other reasons to keep the target alive beyond this one block;
/// * a failed or canceled source faults the target with the matching
///   `OtherContainer…` marker;
/// * a target that dies before the source is done faults the source the
///   same way.
///
/// The markers are propagated kinds, so landing them on the peer cannot
/// start another round of faults, and `complete` being idempotent rules out
/// double-completion.
pub fn link_block_to_flow<T, F>(
    source: &Arc<FlowCore>,
    source_block: Arc<dyn SourceBlock<T>>,
    target: &F,
) where
    T: Send + 'static,
    F: FlowInput<T>,
{
    let input = target.input_block();
    source_block.link_to(Arc::clone(&input), LinkOptions::detached());
    info!(
        source.logger(),
        "linked to container";
        "source_block" => source_block.name(),
        "target" => target.name()
    );

    let block_completion = source_block.completion();
    let source_completion = source.completion();
    let target_core = Arc::clone(target.core());
    let target_completion = target_core.completion();

    // Forward direction: resolve the target's input when the source side is
    // fully done.
    tokio::spawn({
        let target_core = Arc::clone(&target_core);
        async move {
            let (block_outcome, container_outcome) =
                future::join(block_completion.wait(), source_completion.wait()).await;
            if target_core.is_terminal() {
                return;
            }
            match combine(block_outcome, container_outcome) {
                Ok(()) => input.complete(),
                Err(error) if error.is_cancellation() => {
                    target_core.fault(SharedFault::propagated(Propagated::OtherContainerCanceled))
                }
                Err(_) => {
                    target_core.fault(SharedFault::propagated(Propagated::OtherContainerFailed))
                }
            }
        }
    });

    // Reverse direction: a target that dies early takes the source with it.
    tokio::spawn({
        let source_core = Arc::clone(source);
        async move {
            let outcome = target_completion.wait().await;
            if source_core.is_terminal() {
                return;
            }
            if let Err(error) = outcome {
                info!(
                    source_core.logger(),
                    "faulted by linked downstream container";
                    "error" => %error
                );
                let kind = if error.is_cancellation() {
                    Propagated::OtherContainerCanceled
                } else {
                    Propagated::OtherContainerFailed
                };
                source_core.fault(SharedFault::propagated(kind));
            }
        }
    });
}

/// Fold the block and container outcomes of the source side into one:
/// success only if both succeeded, and a failure outranks a cancellation.
fn combine(block: Outcome, container: Outcome) -> Outcome {
    match (block, container) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(error), Ok(())) | (Ok(()), Err(error)) => Err(error),
        (Err(block_error), Err(container_error)) => {
            if !block_error.is_cancellation() {
                Err(block_error)
            } else {
                Err(container_error)
            }
        }
    }
}
