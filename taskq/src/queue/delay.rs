//! Delay queue
//!
//! Ids live in the sorted set `delay_queue:<name>` scored by their due time in
//! epoch milliseconds. A task becomes visible once its score is not in the
//! future; taking it is a single `PopDue` script.

use super::{EnqueueOutcome, QueueCore, TaskQueue};
use crate::error::StoreContext;
use crate::observability::EngineMetrics;
use crate::storage::keys::TASK_PREFIX;
use crate::storage::{Reply, Script, Store};
use crate::task::Task;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Queue type prefix of delay queues
pub const QUEUE_TYPE: &str = "delay_queue";

/// Time-ordered queue
#[derive(Clone)]
pub struct DelayQueue {
    core: QueueCore,
    default_delay: Duration,
}

impl DelayQueue {
    /// Create a delay queue named `name` with no default delay
    pub fn new(name: impl Into<String>, store: Arc<dyn Store>) -> Result<Self> {
        Self::with_type(QUEUE_TYPE, name, store)
    }

    pub(crate) fn with_type(queue_type: &str, name: impl Into<String>, store: Arc<dyn Store>) -> Result<Self> {
        Ok(Self {
            core: QueueCore::new(queue_type, name, store)?,
            default_delay: Duration::ZERO,
        })
    }

    /// Set the delay [`TaskQueue::enqueue`] applies
    #[must_use]
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Record into `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.core.metrics = Some(metrics);
        self
    }

    pub(crate) fn metrics(&self) -> Option<&EngineMetrics> {
        self.core.metrics.as_ref()
    }

    /// Delay applied by [`TaskQueue::enqueue`]
    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Enqueue a task due `delay` after its creation time
    pub async fn enqueue_after(&self, task: Task, delay: Duration) -> Result<EnqueueOutcome> {
        let data = QueueCore::encode(&task)?;
        let score = due_millis(&task, delay);

        let reply = self
            .core
            .store
            .eval(
                Script::EnqueueScheduled,
                vec![task.record_key(), self.core.key.clone()],
                vec![data, task.id.clone(), score.to_string()],
            )
            .await
            .and_then(Reply::into_int)
            .context("enqueue_scheduled", &self.core.key)?;

        let outcome = EnqueueOutcome::from_reply(reply)?;
        self.core.record_outcome(&task, outcome);
        Ok(outcome)
    }

    /// Due time of the earliest queued task
    pub async fn next_due(&self) -> Result<Option<DateTime<Utc>>> {
        let first = self
            .core
            .store
            .zrangebyscore(&self.core.key, f64::NEG_INFINITY, f64::INFINITY, Some(1))
            .await
            .context("next_due", &self.core.key)?;

        Ok(first
            .into_iter()
            .next()
            .and_then(|(_, score)| Utc.timestamp_millis_opt(score as i64).single()))
    }
}

/// Due time of a task in epoch milliseconds
pub(crate) fn due_millis(task: &Task, delay: Duration) -> i64 {
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    task.created_millis().saturating_add(delay_ms)
}

#[async_trait]
impl TaskQueue for DelayQueue {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn queue_key(&self) -> &str {
        &self.core.key
    }

    async fn enqueue(&self, task: Task) -> Result<EnqueueOutcome> {
        self.enqueue_after(task, self.default_delay).await
    }

    async fn dequeue(&self) -> Result<Option<Task>> {
        let now = Utc::now().timestamp_millis();
        let popped = self
            .core
            .store
            .eval(
                Script::PopDue,
                vec![self.core.key.clone()],
                vec![now.to_string(), TASK_PREFIX.to_string()],
            )
            .await
            .and_then(Reply::into_strings)
            .context("pop_due", &self.core.key)?;

        match popped.as_slice() {
            [] => Ok(None),
            [id] => Err(self.core.missing_record(id)),
            [_, data] => self.core.decode(data).map(Some),
            _ => Err(Error::Consistency(format!(
                "unexpected pop_due reply from {}",
                self.core.key
            ))),
        }
    }

    async fn len(&self) -> Result<u64> {
        let len = self
            .core
            .store
            .zcard(&self.core.key)
            .await
            .context("len", &self.core.key)?;
        self.core.record_depth(len);
        Ok(len)
    }
}
