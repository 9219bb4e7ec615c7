//! Redis-backed tests
//!
//! Runs the queue family against a real Redis server to check the Lua
//! scripts behave like the in-memory store. Set `REDIS_URL` to point at the
//! server.

mod common;

use common::{redis_store, task, unique_name};
use std::sync::Arc;
use std::time::Duration;
use taskq::{
    BackoffPolicy, DelayQueue, EnqueueOutcome, Error, GroupedOutcome, Inspector, PriorityScheduler,
    Queue, RetryQueue, SchedulerMode, Slot, Store, Task, TaskQueue, TaskStatus,
};

fn unique_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[tokio::test]
#[ignore = "Requires Redis server"]
async fn test_redis_enqueue_dequeue() {
    let store = redis_store().await;
    let queue = Queue::new(unique_name("basic"), store.clone()).unwrap();
    let id = unique_id();

    assert_eq!(queue.enqueue(task("test", &id)).await.unwrap(), EnqueueOutcome::Accepted);
    assert_eq!(queue.enqueue(task("test", &id)).await.unwrap(), EnqueueOutcome::DuplicateId);
    assert_eq!(queue.len().await.unwrap(), 1);

    let got = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(got.id, id);
    assert!(!store.exists(&format!("task:{}", id)).await.unwrap());
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "Requires Redis server"]
async fn test_redis_dedup() {
    let store = redis_store().await;
    let queue = Queue::new(unique_name("dedup"), store)
        .unwrap()
        .with_deduplication(Duration::from_millis(200));
    let payload = serde_json::json!({ "nonce": unique_id() });

    let first = common::task_with_payload(&unique_id(), payload.clone());
    let second = common::task_with_payload(&unique_id(), payload);

    assert!(queue.enqueue(first.clone()).await.unwrap().is_accepted());
    assert_eq!(queue.enqueue(second.clone()).await.unwrap(), EnqueueOutcome::DuplicateContent);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(queue.enqueue(second).await.unwrap().is_accepted());

    while queue.dequeue().await.unwrap().is_some() {}
}

#[tokio::test]
#[ignore = "Requires Redis server"]
async fn test_redis_blocking_dequeue_times_out() {
    let store = redis_store().await;
    let queue = Queue::new(unique_name("blocking"), store).unwrap();
    assert!(queue.dequeue_blocking(Duration::from_millis(200)).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "Requires Redis server"]
async fn test_redis_delay_and_missing_record() {
    let store = redis_store().await;
    let queue = DelayQueue::new(unique_name("delay"), store.clone()).unwrap();
    let id = unique_id();

    queue
        .enqueue_after(task("test", &id), Duration::from_millis(150))
        .await
        .unwrap();
    assert!(queue.dequeue().await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(queue.dequeue().await.unwrap().unwrap().id, id);

    store.zadd(queue.queue_key(), &unique_id(), 0.0).await.unwrap();
    assert!(matches!(queue.dequeue().await, Err(Error::Consistency(_))));
}

#[tokio::test]
#[ignore = "Requires Redis server"]
async fn test_redis_retry_to_dead_letter() {
    let store = redis_store().await;
    let dlq = Queue::new(unique_name("dead"), store.clone()).unwrap();
    let retries = RetryQueue::new(unique_name("retry"), store)
        .unwrap()
        .with_backoff(BackoffPolicy::new(Duration::ZERO, Duration::ZERO))
        .with_dead_letter(dlq.clone());

    let mut current = Task::builder("test").id(unique_id()).max_retry(1).build().unwrap();
    assert!(!retries.retry(current).await.unwrap().is_dead_lettered());
    current = retries.dequeue().await.unwrap().unwrap();
    assert_eq!(current.status, TaskStatus::Retrying);
    assert!(retries.retry(current).await.unwrap().is_dead_lettered());

    let dead = dlq.dequeue().await.unwrap().unwrap();
    assert_eq!(dead.status, TaskStatus::DeadLetter);
}

#[tokio::test]
#[ignore = "Requires Redis server"]
async fn test_redis_grouping() {
    let store = redis_store().await;
    let queue = Queue::new(unique_name("group"), store).unwrap();
    let group = unique_id();

    let ids: Vec<String> = (0..3).map(|_| unique_id()).collect();
    let mut last = GroupedOutcome::Grouped;
    for id in &ids {
        let t = Task::builder("notify").id(id.clone()).group(group.clone()).max_batch_size(3).build().unwrap();
        last = queue.enqueue_grouped(t).await.unwrap();
    }
    assert!(matches!(last, GroupedOutcome::BatchEnqueued { .. }));

    let batch = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(batch.original_tasks, ids);
    assert_eq!(queue.aggregator().load_members(&batch).await.unwrap().len(), 3);
}

#[tokio::test]
#[ignore = "Requires Redis server"]
async fn test_redis_weighted_scheduler() {
    let store: Arc<dyn Store> = redis_store().await;
    let q1 = Arc::new(Queue::new(unique_name("w1"), store.clone()).unwrap());
    let q2 = Arc::new(Queue::new(unique_name("w2"), store.clone()).unwrap());
    for _ in 0..4 {
        q1.enqueue(task("q1", &unique_id())).await.unwrap();
        q2.enqueue(task("q2", &unique_id())).await.unwrap();
    }

    let mut scheduler = PriorityScheduler::new(unique_name("sched"), SchedulerMode::Weighted, store).unwrap();
    scheduler.add_queue(q1, Slot::Weight(3)).await.unwrap();
    scheduler.add_queue(q2, Slot::Weight(1)).await.unwrap();

    let mut served = Vec::new();
    for _ in 0..4 {
        served.push(scheduler.get_task().await.unwrap().unwrap().task_type);
    }
    assert_eq!(served.iter().filter(|t| *t == "q1").count(), 3);

    scheduler.reset_credits().await.unwrap();
    while scheduler.get_task().await.unwrap().is_some() {}
}

#[tokio::test]
#[ignore = "Requires Redis server"]
async fn test_redis_ack_ttl_below_one_second() {
    let store = redis_store().await;
    let inspector = Inspector::new(store).with_task_ttl(Duration::from_millis(100));

    let mut done = task("test", &unique_id());
    done.status = TaskStatus::Completed;
    inspector.ack(&done).await.unwrap();
    assert!(inspector.get_task(&done.id).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(inspector.get_task(&done.id).await.unwrap().is_none());
}
