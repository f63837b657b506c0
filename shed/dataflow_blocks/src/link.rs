/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::block::Block;
use crate::block::TargetBlock;
use crate::error::SharedFault;

/// Filter deciding whether a link accepts an item.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Options for a single output link.
pub struct LinkOptions<T> {
    /// Forward the source's completion and faults to the target. Edges
    /// inside one container propagate; edges between containers do not, and
    /// are driven by the container link protocol instead.
    pub propagate_completion: bool,
    /// Only offer items accepted by this filter; `None` accepts everything.
    pub predicate: Option<Predicate<T>>,
}

impl<T> LinkOptions<T> {
    /// Propagating link with no filter.
    pub fn propagate() -> Self {
        LinkOptions {
            propagate_completion: true,
            predicate: None,
        }
    }

    /// Non-propagating link with no filter.
    pub fn detached() -> Self {
        LinkOptions {
            propagate_completion: false,
            predicate: None,
        }
    }

    /// Attach a filter to the link.
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

impl<T> Clone for LinkOptions<T> {
    fn clone(&self) -> Self {
        LinkOptions {
            propagate_completion: self.propagate_completion,
            predicate: self.predicate.clone(),
        }
    }
}

struct Link<T> {
    target: Arc<dyn TargetBlock<T>>,
    options: LinkOptions<T>,
}

/// Ordered set of output links implementing the first-match routing rule.
pub(crate) struct LinkSet<T> {
    links: Mutex<Vec<Link<T>>>,
    added: Notify,
}

impl<T: Send + 'static> LinkSet<T> {
    pub(crate) fn new() -> Self {
        LinkSet {
            links: Mutex::new(Vec::new()),
            added: Notify::new(),
        }
    }

    pub(crate) fn add(&self, target: Arc<dyn TargetBlock<T>>, options: LinkOptions<T>) {
        self.links.lock().push(Link { target, options });
        self.added.notify_waiters();
    }

    fn first_match(&self, item: &T) -> Option<Arc<dyn TargetBlock<T>>> {
        self.links
            .lock()
            .iter()
            .find(|link| {
                link.options
                    .predicate
                    .as_ref()
                    .map_or(true, |predicate| predicate(item))
            })
            .map(|link| Arc::clone(&link.target))
    }

    /// Deliver `item` to the first matching link, waiting for capacity.
    ///
    /// An item no link accepts stays here until a matching link is
    /// attached, back-pressuring the caller. A target that rejects the item
    /// has stopped accepting input for good, so it is unlinked and the item
    /// is offered to the remaining links; resolution for a permanently
    /// unroutable item comes from fault propagation, not from here.
    pub(crate) async fn offer(&self, mut item: T) {
        loop {
            let notified = self.added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.first_match(&item) {
                Some(target) => match target.send(item).await {
                    Ok(()) => return,
                    Err(rejection) => {
                        item = rejection.into_inner();
                        self.remove(&target);
                    }
                },
                None => notified.await,
            }
        }
    }

    fn remove(&self, target: &Arc<dyn TargetBlock<T>>) {
        let needle = Arc::as_ptr(target) as *const u8;
        self.links
            .lock()
            .retain(|link| Arc::as_ptr(&link.target) as *const u8 != needle);
    }

    /// Forward completion to every propagating link.
    pub(crate) fn complete_targets(&self) {
        for target in self.propagating_targets() {
            target.complete();
        }
    }

    /// Forward a fault to every propagating link.
    pub(crate) fn fault_targets(&self, error: &SharedFault) {
        for target in self.propagating_targets() {
            target.fault(error.clone());
        }
    }

    fn propagating_targets(&self) -> Vec<Arc<dyn TargetBlock<T>>> {
        self.links
            .lock()
            .iter()
            .filter(|link| link.options.propagate_completion)
            .map(|link| Arc::clone(&link.target))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::action::ActionBlock;
    use crate::block::Block;
    use crate::block::BlockOptions;

    fn collector(store: Arc<Mutex<Vec<i32>>>) -> Arc<ActionBlock<i32>> {
        ActionBlock::new(BlockOptions::default(), move |item| {
            store.lock().push(item);
            Ok(())
        })
    }

    #[tokio::test]
    async fn first_matching_link_wins() {
        let even_items = Arc::new(Mutex::new(Vec::new()));
        let rest_items = Arc::new(Mutex::new(Vec::new()));
        let evens = collector(Arc::clone(&even_items));
        let rest = collector(Arc::clone(&rest_items));

        let links = LinkSet::new();
        links.add(
            evens.clone(),
            LinkOptions::propagate().with_predicate(|item: &i32| item % 2 == 0),
        );
        links.add(rest.clone(), LinkOptions::propagate());

        for item in [1, 2, 3, 4] {
            links.offer(item).await;
        }
        links.complete_targets();
        evens.completion().wait().await.expect("evens failed");
        rest.completion().wait().await.expect("rest failed");

        assert_eq!(*even_items.lock(), vec![2, 4]);
        assert_eq!(*rest_items.lock(), vec![1, 3]);
    }

    #[tokio::test]
    async fn unmatched_offer_waits_for_a_link() {
        let items = Arc::new(Mutex::new(Vec::new()));
        let sink = collector(Arc::clone(&items));

        let links = Arc::new(LinkSet::new());
        let offer = tokio::spawn({
            let links = Arc::clone(&links);
            async move { links.offer(7).await }
        });
        tokio::task::yield_now().await;
        assert!(!offer.is_finished());

        links.add(sink.clone(), LinkOptions::propagate());
        offer.await.expect("offer panicked");

        links.complete_targets();
        sink.completion().wait().await.expect("sink failed");
        assert_eq!(*items.lock(), vec![7]);
    }
}
