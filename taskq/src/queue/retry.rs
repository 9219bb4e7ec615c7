//! Retry queue
//!
//! A [`DelayQueue`] under `retry_queue:<name>` that schedules each failure
//! with exponential backoff and jitter, and moves a task to the dead-letter
//! queue once it has used up its retries.
//!
//! There is no in-process lock around dequeue: the store serializes
//! concurrent callers and `PopDue` takes a due task in one atomic step.

use super::{DelayQueue, EnqueueOutcome, Queue, TaskQueue};
use crate::config;
use crate::observability::EngineMetrics;
use crate::storage::Store;
use crate::task::{Task, TaskStatus};
use crate::Result;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Queue type prefix of retry queues
pub const QUEUE_TYPE: &str = "retry_queue";

/// Name of the default dead-letter queue
pub const DEAD_QUEUE_NAME: &str = "dead_queue";

/// Exponential backoff with jitter
///
/// The delay for attempt `r` is `min(max, base * 2^r + jitter)` where jitter
/// is uniform in `[0, base * 2^r / 4]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Base delay
    pub base: Duration,
    /// Ceiling
    pub max: Duration,
}

impl BackoffPolicy {
    /// Create a policy
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Policy from the global configuration
    pub fn from_config() -> Self {
        let config = config::get_config();
        Self::new(config.retry_base_delay, config.retry_max_delay)
    }

    /// Delay before jitter, `min(max, base * 2^retry)`
    pub fn exponential(&self, retry: u32) -> Duration {
        2u32.checked_pow(retry)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Delay for attempt `retry`
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.delay_with(retry, &mut rand::thread_rng())
    }

    /// Delay for attempt `retry` drawing jitter from `rng`
    pub fn delay_with<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let exp = self.exponential(retry);
        if exp >= self.max {
            return self.max;
        }

        let jitter_cap = u64::try_from((exp / 4).as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_cap == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..=jitter_cap))
        };
        exp.saturating_add(jitter).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config()
    }
}

/// What [`RetryQueue::retry`] did with a failed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Task scheduled for another attempt
    Scheduled {
        /// Attempt number, equal to the task's new `retry`
        attempt: u32,
        /// Backoff delay applied
        delay: Duration,
        /// Enqueue outcome in the retry queue
        outcome: EnqueueOutcome,
    },
    /// Task moved to the dead-letter queue
    DeadLettered {
        /// Attempts made, `max_retry + 1`
        attempts: u32,
        /// Enqueue outcome in the dead-letter queue
        outcome: EnqueueOutcome,
    },
}

impl RetryDecision {
    /// Enqueue outcome in whichever queue received the task
    pub fn outcome(&self) -> EnqueueOutcome {
        match self {
            RetryDecision::Scheduled { outcome, .. } | RetryDecision::DeadLettered { outcome, .. } => *outcome,
        }
    }

    /// Check if the task went to the dead-letter queue
    pub fn is_dead_lettered(&self) -> bool {
        matches!(self, RetryDecision::DeadLettered { .. })
    }
}

/// Retry queue with dead-lettering
#[derive(Clone)]
pub struct RetryQueue {
    delay: DelayQueue,
    backoff: BackoffPolicy,
    dead_letter: Queue,
}

impl RetryQueue {
    /// Create a retry queue named `name` dead-lettering into `dead_queue`
    pub fn new(name: impl Into<String>, store: Arc<dyn Store>) -> Result<Self> {
        Ok(Self {
            delay: DelayQueue::with_type(QUEUE_TYPE, name, store.clone())?,
            backoff: BackoffPolicy::from_config(),
            dead_letter: Queue::new(DEAD_QUEUE_NAME, store)?,
        })
    }

    /// Set the backoff policy
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Dead-letter into `queue` instead of `dead_queue`
    #[must_use]
    pub fn with_dead_letter(mut self, queue: Queue) -> Self {
        self.dead_letter = queue;
        self
    }

    /// Record into `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.dead_letter = self.dead_letter.with_metrics(metrics.clone());
        self.delay = self.delay.with_metrics(metrics);
        self
    }

    /// Backoff policy in use
    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Dead-letter queue
    pub fn dead_letters(&self) -> &Queue {
        &self.dead_letter
    }

    /// Record a failed attempt and reschedule or dead-letter the task
    pub async fn retry(&self, mut task: Task) -> Result<RetryDecision> {
        task.retry = task.retry.saturating_add(1);

        if task.retry > task.max_retry {
            task.status = TaskStatus::DeadLetter;
            let attempts = task.retry;
            let id = task.id.clone();
            let outcome = self.dead_letter.enqueue(task).await?;
            if let Some(metrics) = self.delay.metrics() {
                metrics.record_dead_letter(self.delay.name());
            }
            tracing::warn!(
                "Task {} dead-lettered to {} after {} attempts",
                id,
                self.dead_letter.name(),
                attempts
            );
            return Ok(RetryDecision::DeadLettered { attempts, outcome });
        }

        task.status = TaskStatus::Retrying;
        let attempt = task.retry;
        let delay = self.backoff.delay_for(attempt);
        let id = task.id.clone();
        let outcome = self.delay.enqueue_after(task, delay).await?;
        if outcome.is_accepted() {
            if let Some(metrics) = self.delay.metrics() {
                metrics.record_retry(self.delay.name(), delay);
            }
            tracing::debug!("Task {} scheduled for retry {} in {:?}", id, attempt, delay);
        }
        Ok(RetryDecision::Scheduled {
            attempt,
            delay,
            outcome,
        })
    }
}

#[async_trait]
impl TaskQueue for RetryQueue {
    fn name(&self) -> &str {
        self.delay.name()
    }

    fn queue_key(&self) -> &str {
        self.delay.queue_key()
    }

    async fn enqueue(&self, task: Task) -> Result<EnqueueOutcome> {
        self.retry(task).await.map(|decision| decision.outcome())
    }

    async fn dequeue(&self) -> Result<Option<Task>> {
        self.delay.dequeue().await
    }

    async fn len(&self) -> Result<u64> {
        self.delay.len().await
    }
}
