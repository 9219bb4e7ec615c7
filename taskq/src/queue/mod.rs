//! Queue family
//!
//! Every queue stores a task as a record at `task:<id>` plus its id in one
//! membership structure, and writes both in a single atomic script.
//! [`Queue`] is a FIFO list, [`DelayQueue`] a sorted set scored by due time,
//! [`RetryQueue`] a delay queue with backoff and a dead-letter queue.

pub mod basic;
pub mod delay;
pub mod retry;

pub use basic::{GroupedOutcome, Queue};
pub use delay::DelayQueue;
pub use retry::{BackoffPolicy, RetryDecision, RetryQueue};

use crate::error::{DuplicateKind, StoreContext};
use crate::observability::EngineMetrics;
use crate::storage::{Keys, Reply, Script, Store};
use crate::task::Task;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Result of an enqueue attempt
///
/// Duplicates are reported, not raised: a rejected duplicate is a successful
/// no-op. Use [`EnqueueOutcome::into_result`] to treat them as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Record stored and id queued
    Accepted,
    /// A record with the same id already exists
    DuplicateId,
    /// Same payload already in flight on a deduplicating queue
    DuplicateContent,
}

impl EnqueueOutcome {
    /// Interpret a tri-state script reply
    pub(crate) fn from_reply(reply: i64) -> Result<Self> {
        match reply {
            1 => Ok(EnqueueOutcome::Accepted),
            0 => Ok(EnqueueOutcome::DuplicateId),
            -1 => Ok(EnqueueOutcome::DuplicateContent),
            other => Err(Error::Consistency(format!("unexpected enqueue reply {}", other))),
        }
    }

    /// Check if the task was stored
    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted)
    }

    /// Turn duplicate outcomes into [`Error::DuplicateTask`]
    pub fn into_result(self, id: &str) -> Result<()> {
        match self {
            EnqueueOutcome::Accepted => Ok(()),
            EnqueueOutcome::DuplicateId => Err(Error::DuplicateTask {
                id: id.to_string(),
                kind: DuplicateKind::Id,
            }),
            EnqueueOutcome::DuplicateContent => Err(Error::DuplicateTask {
                id: id.to_string(),
                kind: DuplicateKind::Content,
            }),
        }
    }

    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            EnqueueOutcome::Accepted => "accepted",
            EnqueueOutcome::DuplicateId => "duplicate_id",
            EnqueueOutcome::DuplicateContent => "duplicate_content",
        }
    }
}

/// Common interface of every queue variant
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Queue name
    fn name(&self) -> &str;

    /// Store key of the membership structure
    fn queue_key(&self) -> &str;

    /// Store a task and make it available
    async fn enqueue(&self, task: Task) -> Result<EnqueueOutcome>;

    /// Take the next available task; `None` when nothing is available
    async fn dequeue(&self) -> Result<Option<Task>>;

    /// Number of queued ids
    async fn len(&self) -> Result<u64>;

    /// Check if nothing is queued
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// State and helpers shared by the queue variants
#[derive(Clone)]
pub(crate) struct QueueCore {
    pub(crate) name: String,
    pub(crate) key: String,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) metrics: Option<EngineMetrics>,
}

impl QueueCore {
    pub(crate) fn new(queue_type: &str, name: impl Into<String>, store: Arc<dyn Store>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config("queue name cannot be empty".into()));
        }
        Ok(Self {
            key: Keys::queue(queue_type, &name),
            name,
            store,
            metrics: None,
        })
    }

    /// Validate and serialize a task for storage
    pub(crate) fn encode(task: &Task) -> Result<String> {
        task.validate()?;
        task.encode()
    }

    /// Fetch-and-delete the record of an id that just left the queue
    pub(crate) async fn take_record(&self, id: &str) -> Result<Task> {
        let record_key = Keys::task(id);
        let data = self
            .store
            .eval(Script::TakeRecord, vec![record_key.clone()], Vec::new())
            .await
            .and_then(Reply::into_bulk)
            .context("take_record", &record_key)?;

        match data {
            Some(data) => self.decode(&data),
            None => Err(self.missing_record(id)),
        }
    }

    pub(crate) fn decode(&self, data: &str) -> Result<Task> {
        let task = Task::decode(data)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_dequeue(&self.name);
        }
        tracing::debug!("Task dequeued: {} from queue {}", task.id, self.name);
        Ok(task)
    }

    pub(crate) fn missing_record(&self, id: &str) -> Error {
        tracing::warn!("Task {} left queue {} but its record is missing", id, self.name);
        if let Some(metrics) = &self.metrics {
            metrics.record_consistency_error(&self.name);
        }
        Error::Consistency(format!("record of task {} missing after dequeue from {}", id, self.key))
    }

    pub(crate) fn record_outcome(&self, task: &Task, outcome: EnqueueOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_enqueue(&self.name, outcome.as_str());
        }
        match outcome {
            EnqueueOutcome::Accepted => {
                tracing::debug!("Task enqueued: {} to queue {}", task.id, self.name)
            }
            EnqueueOutcome::DuplicateId => {
                tracing::warn!("Task {} already exists, not enqueued to {}", task.id, self.name)
            }
            EnqueueOutcome::DuplicateContent => {
                tracing::warn!("Task {} has a duplicate payload in queue {}", task.id, self.name)
            }
        }
    }

    pub(crate) fn record_depth(&self, depth: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.set_queue_depth(&self.name, depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_reply() {
        assert_eq!(EnqueueOutcome::from_reply(1).unwrap(), EnqueueOutcome::Accepted);
        assert_eq!(EnqueueOutcome::from_reply(0).unwrap(), EnqueueOutcome::DuplicateId);
        assert_eq!(EnqueueOutcome::from_reply(-1).unwrap(), EnqueueOutcome::DuplicateContent);
        assert!(EnqueueOutcome::from_reply(7).is_err());
    }

    #[test]
    fn test_outcome_into_result() {
        assert!(EnqueueOutcome::Accepted.into_result("t").is_ok());
        assert!(matches!(
            EnqueueOutcome::DuplicateContent.into_result("t"),
            Err(Error::DuplicateTask {
                kind: DuplicateKind::Content,
                ..
            })
        ));
    }

    #[test]
    fn test_empty_queue_name() {
        let store: Arc<dyn Store> = Arc::new(crate::storage::MemoryStore::new());
        assert!(matches!(QueueCore::new("queue", "", store), Err(Error::Config(_))));
    }
}
