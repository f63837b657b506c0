/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! End-to-end pipelines exercising container composition: linking, fault
//! propagation across containers, conditional routing, broadcasting, and
//! bounded-input pulls.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use assert_matches::assert_matches;
use dataflow_ext::ActionBlock;
use dataflow_ext::ActionFlow;
use dataflow_ext::AnyItem;
use dataflow_ext::Block;
use dataflow_ext::BlockOptions;
use dataflow_ext::Broadcaster;
use dataflow_ext::Flow;
use dataflow_ext::FlowCore;
use dataflow_ext::FlowInput;
use dataflow_ext::FlowOptions;
use dataflow_ext::FlowOutput;
use dataflow_ext::FlowOutputAny;
use dataflow_ext::Propagated;
use dataflow_ext::TargetBlock;
use dataflow_ext::TransformFlow;
use parking_lot::Mutex;

fn collecting_sink<T: Send + 'static>(items: &Arc<Mutex<Vec<T>>>) -> ActionFlow<T> {
    ActionFlow::new(FlowOptions::default(), {
        let items = Arc::clone(items);
        move |item: T| {
            items.lock().push(item);
            Ok(())
        }
    })
}

#[tokio::test]
async fn transform_pipeline_doubles_items() {
    let results = Arc::new(Mutex::new(Vec::new()));
    let doubler = TransformFlow::new(FlowOptions::default(), |item: i32| Ok(item * 2));
    let sink = collecting_sink(&results);
    doubler.link_to(&sink);

    let posted = doubler.pull_from(vec![1, 2, 3]).await.expect("pull failed");
    assert_eq!(posted, 3);
    doubler.input_block().complete();

    assert_matches!(doubler.completion().wait().await, Ok(()));
    assert_matches!(sink.completion().wait().await, Ok(()));
    assert_eq!(*results.lock(), vec![2, 4, 6]);
}

#[tokio::test]
async fn downstream_failure_faults_the_upstream_container() {
    let upstream = TransformFlow::new(FlowOptions::default(), |item: i32| Ok(item));
    let downstream = ActionFlow::new(FlowOptions::default(), |item: i32| {
        if item == 42 {
            Err(anyhow!("rejected 42"))
        } else {
            Ok(())
        }
    });
    upstream.link_to(&downstream);

    upstream
        .pull_from(vec![1, 42, 3])
        .await
        .expect("pull failed");

    let downstream_error = downstream
        .completion()
        .wait()
        .await
        .expect_err("downstream should surface its own failure");
    assert_eq!(downstream_error.inner().to_string(), "rejected 42");

    let upstream_error = upstream
        .completion()
        .wait()
        .await
        .expect_err("upstream should be faulted by the link");
    assert_eq!(
        upstream_error.propagated_kind(),
        Some(Propagated::OtherContainerFailed)
    );
}

#[tokio::test]
async fn upstream_failure_faults_the_downstream_container() {
    let upstream = TransformFlow::new(FlowOptions::default(), |item: i32| {
        if item == 42 {
            Err(anyhow!("upstream exploded"))
        } else {
            Ok(item)
        }
    });
    let downstream = ActionFlow::new(FlowOptions::default(), |_: i32| Ok(()));
    upstream.link_to(&downstream);

    upstream
        .pull_from(vec![1, 42, 3])
        .await
        .expect("pull failed");

    let upstream_error = upstream
        .completion()
        .wait()
        .await
        .expect_err("upstream should surface its own failure");
    assert_eq!(upstream_error.inner().to_string(), "upstream exploded");

    let downstream_error = downstream
        .completion()
        .wait()
        .await
        .expect_err("downstream should be faulted by the link");
    assert_eq!(
        downstream_error.propagated_kind(),
        Some(Propagated::OtherContainerFailed)
    );
}

#[tokio::test]
async fn upstream_cancellation_is_surfaced_downstream_as_canceled() {
    use dataflow_ext::SharedFault;

    let upstream = TransformFlow::new(FlowOptions::default(), |item: i32| Ok(item));
    let downstream = ActionFlow::new(FlowOptions::default(), |_: i32| Ok(()));
    upstream.link_to(&downstream);

    upstream.fault(SharedFault::canceled());

    let upstream_error = upstream
        .completion()
        .wait()
        .await
        .expect_err("the canceled upstream cannot succeed");
    assert!(upstream_error.is_cancellation());

    let downstream_error = downstream
        .completion()
        .wait()
        .await
        .expect_err("the downstream should observe the cancellation");
    assert_eq!(
        downstream_error.propagated_kind(),
        Some(Propagated::OtherContainerCanceled)
    );
}

#[tokio::test]
async fn downstream_input_closes_when_the_upstream_container_is_done() {
    let results = Arc::new(Mutex::new(Vec::new()));
    let upstream = TransformFlow::new(FlowOptions::default(), |item: u32| Ok(item + 1));
    let downstream = collecting_sink(&results);
    upstream.link_to(&downstream);

    upstream.pull_from(0..5).await.expect("pull failed");
    assert!(!downstream.completion().is_terminal());

    upstream.input_block().complete();
    assert_matches!(upstream.completion().wait().await, Ok(()));
    assert_matches!(downstream.completion().wait().await, Ok(()));
    assert_eq!(*results.lock(), vec![1, 2, 3, 4, 5]);
}

#[derive(Debug, PartialEq)]
struct Cat(&'static str);
#[derive(Debug, PartialEq)]
struct Dog(&'static str);
#[derive(Debug, PartialEq)]
struct Fish(&'static str);
#[derive(Debug)]
struct Bird(&'static str);

#[tokio::test]
async fn conditional_routing_by_runtime_type() {
    let cats = Arc::new(Mutex::new(Vec::new()));
    let dogs = Arc::new(Mutex::new(Vec::new()));
    let fish = Arc::new(Mutex::new(Vec::new()));

    let router = TransformFlow::new(FlowOptions::default(), |item: AnyItem| Ok(item));
    let cat_sink = collecting_sink(&cats);
    let dog_sink = collecting_sink(&dogs);
    let fish_sink = collecting_sink(&fish);

    router.link_by_type::<Cat, _>(&cat_sink);
    router.link_by_type::<Dog, _>(&dog_sink);
    router.link_by_type::<Fish, _>(&fish_sink);
    router.link_left_to_null();

    let animals = vec![
        AnyItem::new(Cat("misha")),
        AnyItem::new(Dog("rex")),
        AnyItem::new(Bird("tweety")),
        AnyItem::new(Fish("nemo")),
    ];
    router.pull_from(animals).await.expect("pull failed");
    router.input_block().complete();

    assert_matches!(router.completion().wait().await, Ok(()));
    assert_matches!(cat_sink.completion().wait().await, Ok(()));
    assert_matches!(dog_sink.completion().wait().await, Ok(()));
    assert_matches!(fish_sink.completion().wait().await, Ok(()));

    assert_eq!(*cats.lock(), vec![Cat("misha")]);
    assert_eq!(*dogs.lock(), vec![Dog("rex")]);
    assert_eq!(*fish.lock(), vec![Fish("nemo")]);
    assert_eq!(router.garbage().count("Bird"), 1);
    assert_eq!(router.garbage().total(), 1);
}

#[tokio::test]
async fn routing_picks_the_first_matching_edge() {
    let small = Arc::new(Mutex::new(Vec::new()));
    let medium = Arc::new(Mutex::new(Vec::new()));

    let router = TransformFlow::new(FlowOptions::default(), |item: i32| Ok(item));
    let small_sink = collecting_sink(&small);
    let medium_sink = collecting_sink(&medium);

    router.transform_and_link_when(&small_sink, |item| item, |item: &i32| *item < 10);
    router.transform_and_link_when(&medium_sink, |item| item, |item: &i32| *item < 100);
    router.link_left_to_null();

    router
        .pull_from(vec![5, 42, 1000])
        .await
        .expect("pull failed");
    router.input_block().complete();

    assert_matches!(router.completion().wait().await, Ok(()));
    assert_matches!(small_sink.completion().wait().await, Ok(()));
    assert_matches!(medium_sink.completion().wait().await, Ok(()));

    // 5 matches both predicates; the earlier edge wins.
    assert_eq!(*small.lock(), vec![5]);
    assert_eq!(*medium.lock(), vec![42]);
    assert_eq!(router.garbage().count("i32"), 1);
}

#[tokio::test]
async fn broadcaster_loses_nothing_even_with_a_slow_target() {
    const ITEMS: i64 = 1000;

    let outputs: Vec<_> = (0..3).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();
    let fast_first = collecting_sink(&outputs[0]);
    let slow = ActionFlow::new_async(FlowOptions::default(), {
        let items = Arc::clone(&outputs[1]);
        move |item: i64| {
            let items = Arc::clone(&items);
            async move {
                tokio::time::sleep(Duration::from_micros(20)).await;
                items.lock().push(item);
                Ok(())
            }
        }
    });
    let fast_second = collecting_sink(&outputs[2]);

    let broadcaster = Broadcaster::new(FlowOptions::default());
    broadcaster.go_to(&fast_first);
    broadcaster.go_to(&slow);
    broadcaster.go_to(&fast_second);

    broadcaster.pull_from(0..ITEMS).await.expect("pull failed");
    broadcaster.input_block().complete();

    assert_matches!(broadcaster.completion().wait().await, Ok(()));
    assert_matches!(fast_first.completion().wait().await, Ok(()));
    assert_matches!(slow.completion().wait().await, Ok(()));
    assert_matches!(fast_second.completion().wait().await, Ok(()));

    let expected: Vec<i64> = (0..ITEMS).collect();
    for output in &outputs {
        assert_eq!(*output.lock(), expected);
    }
}

#[tokio::test]
async fn sibling_blocks_are_faulted_with_the_originating_error_surfaced() {
    let core = FlowCore::new("TwoChildren", FlowOptions::default());
    let failing = ActionBlock::new(BlockOptions::default(), |_: i32| Err(anyhow!("child one died")));
    let healthy = ActionBlock::new(BlockOptions::default(), |_: i32| Ok(()));
    let as_child: Arc<dyn Block> = failing.clone();
    core.register_block(as_child).expect("register failed");
    let as_child: Arc<dyn Block> = healthy.clone();
    core.register_block(as_child).expect("register failed");

    failing.try_post(1).expect("post failed");

    let error = core
        .completion()
        .wait()
        .await
        .expect_err("the originating error should surface");
    assert_eq!(error.inner().to_string(), "child one died");

    let sibling_error = healthy
        .completion()
        .wait()
        .await
        .expect_err("the sibling should be torn down");
    assert_eq!(
        sibling_error.propagated_kind(),
        Some(Propagated::SiblingUnitFailed)
    );
}

#[tokio::test]
async fn bounded_input_pull_delivers_everything_in_order() {
    const ITEMS: usize = 10_000;

    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = ActionFlow::from_block(
        FlowOptions::default(),
        ActionBlock::new(BlockOptions::default().with_capacity(16), {
            let results = Arc::clone(&results);
            move |item: usize| {
                results.lock().push(item);
                Ok(())
            }
        }),
    );

    let posted = sink.pull_from(0..ITEMS).await.expect("pull failed");
    assert_eq!(posted, ITEMS);
    sink.input_block().complete();

    assert_matches!(sink.completion().wait().await, Ok(()));
    assert_eq!(*results.lock(), (0..ITEMS).collect::<Vec<_>>());
}
