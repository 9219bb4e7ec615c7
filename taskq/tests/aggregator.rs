//! Aggregation tests
//!
//! Tests grouping through the basic queue:
//! - Size-triggered batches and member order
//! - Time-triggered batches
//! - No nested batching
//! - Racing triggers
//! - Concurrent producers filling groups

mod common;

use common::memory_store;
use std::collections::HashSet;
use std::time::Duration;
use taskq::{
    AggregatorConfig, EnqueueOutcome, GroupedOutcome, Queue, Store, Task, TaskQueue, TaskStatus,
};

fn grouped(id: &str, group: &str, size: usize) -> Task {
    Task::builder("notify")
        .id(id)
        .payload_value("user", id)
        .group(group)
        .max_batch_size(size)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_batch_triggers_at_size() {
    let (_, store) = memory_store();
    let queue = Queue::new("notifications", store.clone()).unwrap();

    for id in ["u1", "u2", "u3"] {
        let outcome = queue.enqueue_grouped(grouped(id, "digest", 4)).await.unwrap();
        assert_eq!(outcome, GroupedOutcome::Grouped);
        assert!(queue.is_empty().await.unwrap());
    }

    let outcome = queue.enqueue_grouped(grouped("u4", "digest", 4)).await.unwrap();
    let batch_id = match outcome {
        GroupedOutcome::BatchEnqueued { task_id, outcome } => {
            assert_eq!(outcome, EnqueueOutcome::Accepted);
            task_id
        }
        other => panic!("unexpected outcome {:?}", other),
    };

    let batch = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(batch.id, batch_id);
    assert!(batch.is_aggregated);
    assert_eq!(batch.status, TaskStatus::Pending);
    assert_eq!(batch.original_tasks, vec!["u1", "u2", "u3", "u4"]);
    assert_eq!(batch.payload["task_count"], 4);

    let members = queue.aggregator().load_members(&batch).await.unwrap();
    assert_eq!(members.len(), 4);
    assert!(members.iter().all(|m| m.group() == Some("digest")));
    assert!(!store.exists("task:u1").await.unwrap());
}

#[tokio::test]
async fn test_groups_are_independent() {
    let (_, store) = memory_store();
    let queue = Queue::new("multi", store).unwrap();

    queue.enqueue_grouped(grouped("a1", "a", 2)).await.unwrap();
    queue.enqueue_grouped(grouped("b1", "b", 2)).await.unwrap();
    let outcome = queue.enqueue_grouped(grouped("a2", "a", 2)).await.unwrap();

    assert!(matches!(outcome, GroupedOutcome::BatchEnqueued { .. }));
    assert_eq!(queue.aggregator().pending("b").await.unwrap(), vec!["b1"]);
}

#[tokio::test]
async fn test_ungrouped_and_aggregated_tasks_skip_grouping() {
    let (_, store) = memory_store();
    let queue = Queue::new("plain", store).unwrap();

    let plain = Task::builder("t").id("p").build().unwrap();
    assert_eq!(
        queue.enqueue_grouped(plain).await.unwrap(),
        GroupedOutcome::Enqueued(EnqueueOutcome::Accepted)
    );

    queue.enqueue_grouped(grouped("g1", "g", 1)).await.unwrap();
    queue.dequeue().await.unwrap();
    let batch = queue.dequeue().await.unwrap().unwrap();
    assert!(batch.is_aggregated);

    // Re-submitting an aggregated task never nests it in another batch
    let outcome = queue.enqueue_grouped(batch).await.unwrap();
    assert_eq!(outcome, GroupedOutcome::Enqueued(EnqueueOutcome::Accepted));
    assert!(queue.dequeue().await.unwrap().unwrap().is_aggregated);
}

#[tokio::test]
async fn test_duplicate_member() {
    let (_, store) = memory_store();
    let queue = Queue::new("dupes", store).unwrap();

    queue.enqueue_grouped(grouped("x", "g", 5)).await.unwrap();
    let outcome = queue.enqueue_grouped(grouped("x", "g", 5)).await.unwrap();
    assert_eq!(outcome, GroupedOutcome::DuplicateId);
    assert_eq!(queue.aggregator().pending("g").await.unwrap(), vec!["x"]);
}

#[tokio::test]
async fn test_flush_after_wait_time() {
    let (_, store) = memory_store();
    let queue = Queue::new("timed", store)
        .unwrap()
        .with_aggregator_config(
            AggregatorConfig::new()
                .max_size(100)
                .grace_period(Duration::from_millis(60)),
        );

    queue.enqueue_grouped(grouped("a", "slow", 0)).await.unwrap();
    queue.enqueue_grouped(grouped("b", "slow", 0)).await.unwrap();

    assert!(!queue.aggregator().is_due("slow").await.unwrap());
    assert!(queue.flush_group("slow").await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(queue.aggregator().is_due("slow").await.unwrap());

    let flushed = queue.flush_group("slow").await.unwrap();
    assert!(matches!(flushed, Some(GroupedOutcome::BatchEnqueued { .. })));
    assert!(queue.flush_group("slow").await.unwrap().is_none());

    let batch = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(batch.original_tasks, vec!["a", "b"]);
}

#[tokio::test]
async fn test_racing_flushes_trigger_once() {
    let (_, store) = memory_store();
    let queue = Queue::new("racing", store)
        .unwrap()
        .with_aggregator_config(AggregatorConfig::new().max_size(100).grace_period(Duration::from_millis(20)));

    for id in ["a", "b", "c"] {
        queue.enqueue_grouped(grouped(id, "g", 0)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move { queue.flush_group("g").await.unwrap() }));
    }

    let mut triggered = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            triggered += 1;
        }
    }
    assert_eq!(triggered, 1);
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_lose_no_member() {
    let (_, store) = memory_store();
    let queue = Queue::new("fan_in", store).unwrap();

    let mut handles = Vec::new();
    for n in 0..64 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            queue
                .enqueue_grouped(grouped(&format!("m{}", n), "g", 4))
                .await
                .unwrap()
        }));
    }

    let mut batches_enqueued = 0;
    for handle in handles {
        match handle.await.unwrap() {
            GroupedOutcome::Grouped => {}
            GroupedOutcome::BatchEnqueued { outcome, .. } => {
                assert_eq!(outcome, EnqueueOutcome::Accepted);
                batches_enqueued += 1;
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    let mut collected = Vec::new();
    let mut batches = 0;
    while let Some(batch) = queue.dequeue().await.unwrap() {
        assert!(batch.is_aggregated);
        assert!(!batch.original_tasks.is_empty());
        collected.extend(batch.original_tasks);
        batches += 1;
    }
    assert_eq!(batches, batches_enqueued);
    collected.extend(queue.aggregator().pending("g").await.unwrap());

    let unique: HashSet<&String> = collected.iter().collect();
    assert_eq!(collected.len(), 64);
    assert_eq!(unique.len(), 64);
}
