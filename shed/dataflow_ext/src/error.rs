/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use thiserror::Error;

/// Errors raised by container composition itself, as opposed to faults
/// flowing through a running pipeline.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The aggregated completion was observed before any child was
    /// registered.
    #[error("container '{container}' has no registered child")]
    NoChildRegistered {
        /// The offending container.
        container: String,
    },

    /// The same underlying block was registered twice in one container.
    #[error("block '{block}' is already registered in container '{container}'")]
    DuplicateChild {
        /// The offending container.
        container: String,
        /// The block that was registered twice.
        block: String,
    },

    /// Predicate routing was requested on a component that delivers every
    /// item to every target.
    #[error("predicate linking is not supported by '{container}'")]
    PredicateNotSupported {
        /// The component the predicate was offered to.
        container: String,
    },

    /// An item could not be delivered to a block's input.
    #[error("posting to block '{block}' failed: the block no longer accepts input")]
    PostFailed {
        /// The rejecting block.
        block: String,
    },
}
