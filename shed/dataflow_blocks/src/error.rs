/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Marker errors that only signal that a peer unit went down.
///
/// A propagated error carries no original cause on purpose: the unit that
/// originated the failure surfaces the real diagnosis through its own
/// completion, while its peers merely learn that they were torn down because
/// of it. Faulting a unit with a propagated error never triggers another
/// round of fault propagation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum Propagated {
    /// A unit registered in the same container failed.
    #[error("a sibling unit failed")]
    SiblingUnitFailed,
    /// A unit registered in the same container was canceled.
    #[error("a sibling unit was canceled")]
    SiblingUnitCanceled,
    /// A container linked to this one failed.
    #[error("a linked container failed")]
    OtherContainerFailed,
    /// A container linked to this one was canceled.
    #[error("a linked container was canceled")]
    OtherContainerCanceled,
}

impl Propagated {
    /// Whether this marker stands for a cancellation rather than a failure.
    pub fn is_cancellation(self) -> bool {
        matches!(
            self,
            Propagated::SiblingUnitCanceled | Propagated::OtherContainerCanceled
        )
    }
}

/// Terminal outcome of a unit that was canceled rather than failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("the unit was canceled")]
pub struct Canceled;

/// Cloneable wrapper around [`anyhow::Error`].
///
/// A terminal outcome is observed by many parties at once (every waiter on a
/// completion, plus every sibling that gets faulted with it), so the error
/// must be cheap to hand out. Storing the cause in an `Arc` makes the whole
/// outcome `Clone` without losing the original error chain.
#[derive(Clone)]
pub struct SharedFault(Arc<anyhow::Error>);

impl SharedFault {
    /// Wrap an error for shared observation.
    pub fn new(error: anyhow::Error) -> Self {
        SharedFault(Arc::new(error))
    }

    /// The cancellation outcome.
    pub fn canceled() -> Self {
        SharedFault::new(anyhow::Error::new(Canceled))
    }

    /// A propagated marker outcome.
    pub fn propagated(kind: Propagated) -> Self {
        SharedFault::new(anyhow::Error::new(kind))
    }

    /// The propagated marker wrapped by this fault, if any.
    pub fn propagated_kind(&self) -> Option<Propagated> {
        self.0.downcast_ref::<Propagated>().copied()
    }

    /// Whether this fault is a propagated marker rather than an originating
    /// error.
    pub fn is_propagated(&self) -> bool {
        self.propagated_kind().is_some()
    }

    /// Whether this fault stands for a cancellation, either directly or as a
    /// propagated marker.
    pub fn is_cancellation(&self) -> bool {
        self.0.downcast_ref::<Canceled>().is_some()
            || self.propagated_kind().is_some_and(Propagated::is_cancellation)
    }

    /// The wrapped error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// Downcast the wrapped error to a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Display for SharedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for SharedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for SharedFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let inner: &(dyn std::error::Error + 'static) = (*self.0).as_ref();
        Some(inner)
    }
}

impl From<anyhow::Error> for SharedFault {
    fn from(error: anyhow::Error) -> Self {
        SharedFault::new(error)
    }
}

/// Error returned when posting to a target block.
///
/// The rejected item is handed back so the caller can retry.
pub enum PostError<T> {
    /// The block's input queue is full.
    Full(T),
    /// The block no longer accepts input.
    Closed(T),
}

impl<T> PostError<T> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            PostError::Full(item) | PostError::Closed(item) => item,
        }
    }

    /// Whether the block is terminally closed, as opposed to transiently
    /// full.
    pub fn is_closed(&self) -> bool {
        matches!(self, PostError::Closed(_))
    }
}

impl<T> fmt::Debug for PostError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostError::Full(_) => f.write_str("Full(..)"),
            PostError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for PostError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostError::Full(_) => f.write_str("the block's input queue is full"),
            PostError::Closed(_) => f.write_str("the block no longer accepts input"),
        }
    }
}

impl<T> std::error::Error for PostError<T> {}

#[cfg(test)]
mod test {
    use super::*;

    use anyhow::anyhow;

    #[test]
    fn classification() {
        let originating = SharedFault::new(anyhow!("disk on fire"));
        assert!(!originating.is_propagated());
        assert!(!originating.is_cancellation());

        let canceled = SharedFault::canceled();
        assert!(!canceled.is_propagated());
        assert!(canceled.is_cancellation());

        let sibling = SharedFault::propagated(Propagated::SiblingUnitCanceled);
        assert!(sibling.is_propagated());
        assert!(sibling.is_cancellation());
        assert_eq!(sibling.propagated_kind(), Some(Propagated::SiblingUnitCanceled));

        let other = SharedFault::propagated(Propagated::OtherContainerFailed);
        assert!(other.is_propagated());
        assert!(!other.is_cancellation());
    }

    #[test]
    fn clones_share_the_cause() {
        let fault = SharedFault::new(anyhow!("root cause"));
        let clone = fault.clone();
        assert_eq!(fault.to_string(), clone.to_string());
        assert!(clone.downcast_ref::<Canceled>().is_none());
    }
}
