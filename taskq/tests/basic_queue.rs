//! Basic queue functionality tests
//!
//! Tests the fundamental queue operations:
//! - FIFO enqueue/dequeue
//! - Id uniqueness and at-most-once delivery under concurrency
//! - Content deduplication
//! - Blocking dequeue and consistency errors

mod common;

use common::{memory_store, task, task_with_payload};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use taskq::{EngineMetrics, EnqueueOutcome, Error, Queue, Store, TaskQueue};

#[tokio::test]
async fn test_fifo_order() {
    let (_, store) = memory_store();
    let queue = Queue::new("fifo", store).unwrap();

    for id in ["a", "b", "c"] {
        assert_eq!(queue.enqueue(task("test", id)).await.unwrap(), EnqueueOutcome::Accepted);
    }
    assert_eq!(queue.len().await.unwrap(), 3);

    let mut order = Vec::new();
    while let Some(t) = queue.dequeue().await.unwrap() {
        order.push(t.id);
    }
    assert_eq!(order, vec!["a", "b", "c"]);
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_concurrent_enqueue_same_id() {
    let (_, store) = memory_store();
    let queue = Queue::new("race", store).unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move { queue.enqueue(task("test", "same")).await }));
    }

    let mut accepted = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            EnqueueOutcome::Accepted => accepted += 1,
            EnqueueOutcome::DuplicateId => duplicates += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(duplicates, 15);
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_dequeue_delivers_once() {
    let (_, store) = memory_store();
    let queue = Queue::new("consumers", store).unwrap();
    for i in 0..50 {
        queue.enqueue(task("test", &format!("t{}", i))).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(t) = queue.dequeue().await.unwrap() {
                seen.push(t.id);
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), 50);
    assert_eq!(unique.len(), 50);
}

#[tokio::test]
async fn test_dedup_window() {
    let (_, store) = memory_store();
    let queue = Queue::new("dedup", store.clone())
        .unwrap()
        .with_deduplication(Duration::from_millis(100));

    let first = task_with_payload("a", json!({"user": 1, "action": "welcome"}));
    let second = task_with_payload("b", json!({"action": "welcome", "user": 1}));
    let other = task_with_payload("c", json!({"user": 2, "action": "welcome"}));

    assert_eq!(queue.enqueue(first).await.unwrap(), EnqueueOutcome::Accepted);
    assert_eq!(queue.enqueue(second.clone()).await.unwrap(), EnqueueOutcome::DuplicateContent);
    assert_eq!(queue.enqueue(other).await.unwrap(), EnqueueOutcome::Accepted);
    assert!(!store.exists("task:b").await.unwrap());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(queue.enqueue(second).await.unwrap(), EnqueueOutcome::Accepted);
    assert_eq!(queue.len().await.unwrap(), 3);
}

#[tokio::test]
async fn test_dedup_is_per_queue() {
    let (_, store) = memory_store();
    let emails = Queue::new("emails", store.clone())
        .unwrap()
        .with_deduplication(Duration::from_secs(60));
    let sms = Queue::new("sms", store)
        .unwrap()
        .with_deduplication(Duration::from_secs(60));

    let payload = json!({"user": 1});
    assert!(emails.enqueue(task_with_payload("a", payload.clone())).await.unwrap().is_accepted());
    assert!(sms.enqueue(task_with_payload("b", payload)).await.unwrap().is_accepted());
}

#[tokio::test]
async fn test_duplicate_into_result() {
    let (_, store) = memory_store();
    let queue = Queue::new("strict", store).unwrap();

    queue.enqueue(task("test", "x")).await.unwrap().into_result("x").unwrap();
    let err = queue
        .enqueue(task("test", "x"))
        .await
        .unwrap()
        .into_result("x")
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateTask { .. }));
}

#[tokio::test]
async fn test_missing_record_is_consistency_error() {
    let (_, store) = memory_store();
    let queue = Queue::new("broken", store.clone()).unwrap();
    queue.enqueue(task("test", "x")).await.unwrap();
    store.del(&["task:x".to_string()]).await.unwrap();

    assert!(matches!(queue.dequeue().await, Err(Error::Consistency(_))));
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn test_corrupt_record_is_serialization_error() {
    let (_, store) = memory_store();
    let queue = Queue::new("corrupt", store.clone()).unwrap();
    queue.enqueue(task("test", "x")).await.unwrap();
    queue.enqueue(task("test", "y")).await.unwrap();
    store.hset("task:x", "data", "{not json").await.unwrap();

    assert!(matches!(queue.dequeue().await, Err(Error::Serialization(_))));
    assert_eq!(queue.dequeue().await.unwrap().unwrap().id, "y");
}

#[tokio::test]
async fn test_blocking_dequeue() {
    let (_, store) = memory_store();
    let queue = Queue::new("blocking", store).unwrap();

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            queue.enqueue(task("test", "late")).await.unwrap();
        })
    };

    let got = queue.dequeue_blocking(Duration::from_secs(2)).await.unwrap();
    assert_eq!(got.map(|t| t.id).as_deref(), Some("late"));
    producer.await.unwrap();

    let nothing = queue.dequeue_blocking(Duration::from_millis(50)).await.unwrap();
    assert!(nothing.is_none());
}

#[tokio::test]
async fn test_metrics() {
    let (_, store) = memory_store();
    let metrics = EngineMetrics::new().unwrap();
    let queue = Queue::new("observed", store).unwrap().with_metrics(metrics.clone());

    queue.enqueue(task("test", "x")).await.unwrap();
    queue.enqueue(task("test", "x")).await.unwrap();
    queue.dequeue().await.unwrap();
    queue.len().await.unwrap();

    let output = metrics.gather_text();
    assert!(output.contains("outcome=\"accepted\""));
    assert!(output.contains("outcome=\"duplicate_id\""));
    assert!(output.contains("taskq_tasks_dequeued_total"));
    assert!(output.contains("taskq_queue_depth"));
}
