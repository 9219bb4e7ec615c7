//! Basic FIFO queue
//!
//! Ids are pushed with `LPUSH` and popped with `RPOP` from `queue:<name>`.
//! An optional content-deduplication mode rejects a payload that is already
//! in flight, and grouped enqueues go through the queue's [`Aggregator`].

use super::{EnqueueOutcome, QueueCore, TaskQueue};
use crate::aggregator::{Aggregator, AggregatorConfig, GroupAdd};
use crate::config;
use crate::error::StoreContext;
use crate::observability::EngineMetrics;
use crate::storage::{Keys, Reply, Script, Store};
use crate::task::Task;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Queue type prefix of basic queues
pub const QUEUE_TYPE: &str = "queue";

/// Result of [`Queue::enqueue_grouped`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupedOutcome {
    /// Task had no group and was enqueued directly
    Enqueued(EnqueueOutcome),
    /// Task joined its group, no batch yet
    Grouped,
    /// Task completed its group and the aggregated task was enqueued
    BatchEnqueued {
        /// Id of the aggregated task
        task_id: String,
        /// Enqueue outcome of the aggregated task
        outcome: EnqueueOutcome,
    },
    /// A record with the same id already exists
    DuplicateId,
}

/// FIFO queue
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use taskq::{MemoryStore, Queue, Task, TaskQueue};
///
/// # async fn example() -> taskq::Result<()> {
/// let queue = Queue::new("emails", Arc::new(MemoryStore::new()))?;
/// let task = Task::builder("email:send").payload_value("to", "a@b.c").build()?;
///
/// queue.enqueue(task).await?;
/// let next = queue.dequeue().await?;
/// assert!(next.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Queue {
    core: QueueCore,
    dedup_ttl: Option<Duration>,
    aggregator: Aggregator,
}

impl Queue {
    /// Create a queue named `name`
    pub fn new(name: impl Into<String>, store: Arc<dyn Store>) -> Result<Self> {
        let core = QueueCore::new(QUEUE_TYPE, name, store)?;
        let aggregator = Aggregator::new(core.name.clone(), core.store.clone())?;
        Ok(Self {
            core,
            dedup_ttl: None,
            aggregator,
        })
    }

    /// Reject tasks whose payload is already in flight for `ttl`
    #[must_use]
    pub fn with_deduplication(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = Some(ttl);
        self
    }

    /// Reject tasks whose payload is already in flight for the configured
    /// `dedup_ttl`
    #[must_use]
    pub fn with_default_deduplication(self) -> Self {
        self.with_deduplication(config::get_dedup_ttl())
    }

    /// Set aggregation defaults for grouped enqueues
    #[must_use]
    pub fn with_aggregator_config(mut self, config: AggregatorConfig) -> Self {
        self.aggregator = self.aggregator.with_config(config);
        self
    }

    /// Record into `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.aggregator = self.aggregator.with_metrics(metrics.clone());
        self.core.metrics = Some(metrics);
        self
    }

    /// Aggregator used by grouped enqueues
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Content deduplication window, if enabled
    pub fn dedup_ttl(&self) -> Option<Duration> {
        self.dedup_ttl
    }

    /// Pop an id and take its record
    async fn take_next(&self, popped: Option<String>) -> Result<Option<Task>> {
        match popped {
            Some(id) => self.core.take_record(&id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Dequeue, waiting up to `timeout` for a task to arrive
    pub async fn dequeue_blocking(&self, timeout: Duration) -> Result<Option<Task>> {
        let popped = self
            .core
            .store
            .brpop(&self.core.key, timeout)
            .await
            .context("dequeue_blocking", &self.core.key)?;
        self.take_next(popped).await
    }

    /// Enqueue a task, routing grouped tasks through the aggregator
    ///
    /// Tasks without a group key, and aggregated tasks, are enqueued
    /// directly. Otherwise the task joins its group; when that fills the
    /// group, the aggregated task is built and enqueued here.
    pub async fn enqueue_grouped(&self, task: Task) -> Result<GroupedOutcome> {
        let group = match task.group() {
            Some(group) if !task.is_aggregated => Some(group.to_string()),
            _ => None,
        };
        let group = match group {
            Some(group) => group,
            None => return self.enqueue(task).await.map(GroupedOutcome::Enqueued),
        };

        match self.aggregator.add_task_to_group(&task).await? {
            GroupAdd::Added => Ok(GroupedOutcome::Grouped),
            GroupAdd::DuplicateId => Ok(GroupedOutcome::DuplicateId),
            GroupAdd::Trigger => match self.aggregator.trigger_batch(&group).await {
                Ok(batch) => {
                    let task_id = batch.id.clone();
                    let outcome = self.enqueue(batch).await?;
                    Ok(GroupedOutcome::BatchEnqueued { task_id, outcome })
                }
                // Another producer drained the group first
                Err(Error::EmptyGroup(_)) => Ok(GroupedOutcome::Grouped),
                Err(e) => Err(e),
            },
        }
    }

    /// Enqueue the batch of a group whose wait time has run out
    ///
    /// Returns `None` when the group is not due or another caller already
    /// triggered it.
    pub async fn flush_group(&self, group_key: &str) -> Result<Option<GroupedOutcome>> {
        match self.aggregator.poll_expired(group_key).await? {
            Some(batch) => {
                let task_id = batch.id.clone();
                let outcome = self.enqueue(batch).await?;
                Ok(Some(GroupedOutcome::BatchEnqueued { task_id, outcome }))
            }
            None => Ok(None),
        }
    }

    /// Drop the content marker of a task before its TTL runs out
    pub async fn release_dedup(&self, task: &Task) -> Result<bool> {
        let dedup_key = Keys::dedup(&self.core.name, &task.content_hash()?);
        let removed = self
            .core
            .store
            .del(std::slice::from_ref(&dedup_key))
            .await
            .context("release_dedup", &dedup_key)?;
        Ok(removed > 0)
    }
}

#[async_trait]
impl TaskQueue for Queue {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn queue_key(&self) -> &str {
        &self.core.key
    }

    async fn enqueue(&self, task: Task) -> Result<EnqueueOutcome> {
        let data = QueueCore::encode(&task)?;
        let record_key = task.record_key();

        let reply = match self.dedup_ttl {
            Some(ttl) if !task.is_aggregated => {
                let dedup_key = Keys::dedup(&self.core.name, &task.content_hash()?);
                let ttl_ms = ttl.as_millis().max(1).to_string();
                self.core
                    .store
                    .eval(
                        Script::EnqueueDedup,
                        vec![record_key, self.core.key.clone(), dedup_key],
                        vec![data, task.id.clone(), ttl_ms],
                    )
                    .await
            }
            _ => {
                self.core
                    .store
                    .eval(
                        Script::Enqueue,
                        vec![record_key, self.core.key.clone()],
                        vec![data, task.id.clone()],
                    )
                    .await
            }
        };

        let outcome = EnqueueOutcome::from_reply(
            reply.and_then(Reply::into_int).context("enqueue", &self.core.key)?,
        )?;
        self.core.record_outcome(&task, outcome);
        Ok(outcome)
    }

    async fn dequeue(&self) -> Result<Option<Task>> {
        let popped = self
            .core
            .store
            .rpop(&self.core.key)
            .await
            .context("dequeue", &self.core.key)?;
        self.take_next(popped).await
    }

    async fn len(&self) -> Result<u64> {
        let len = self
            .core
            .store
            .llen(&self.core.key)
            .await
            .context("len", &self.core.key)?;
        self.core.record_depth(len);
        Ok(len)
    }
}
