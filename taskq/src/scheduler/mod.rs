//! Multi-queue scheduler
//!
//! Serves tasks from several member queues either by strict priority or by
//! smooth weighted round robin. The registry of member queues belongs to the
//! scheduler instance and is built during setup with
//! [`PriorityScheduler::add_queue`].
//!
//! Store layout:
//! - `scheduler:<name>`: sorted set of member names scored by priority
//! - `scheduler:weight:<name>`: hash of member name to current credit

use crate::error::StoreContext;
use crate::observability::EngineMetrics;
use crate::queue::TaskQueue;
use crate::storage::{Keys, Reply, Script, Store, StoreError};
use crate::task::Task;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    /// Highest priority non-empty queue first
    Priority,
    /// Weighted round robin across queues
    Weighted,
}

/// Largest accepted weight
///
/// Keeps the total weight and every credit well inside `i64`.
pub const MAX_WEIGHT: i64 = u32::MAX as i64;

/// Registration slot of a member queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Priority, higher is served first
    Priority(i64),
    /// Weight, between 1 and [`MAX_WEIGHT`]
    Weight(i64),
}

struct Member {
    queue: Arc<dyn TaskQueue>,
    member: String,
    slot: i64,
}

/// Scheduler over several queues
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use taskq::{MemoryStore, PriorityScheduler, Queue, SchedulerMode, Slot, Store};
///
/// # async fn example() -> taskq::Result<()> {
/// let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
/// let mut scheduler = PriorityScheduler::new("workers", SchedulerMode::Weighted, store.clone())?;
/// scheduler.add_queue(Arc::new(Queue::new("fast", store.clone())?), Slot::Weight(3)).await?;
/// scheduler.add_queue(Arc::new(Queue::new("slow", store)?), Slot::Weight(1)).await?;
///
/// let next = scheduler.get_task().await?;
/// assert!(next.is_none());
/// # Ok(())
/// # }
/// ```
pub struct PriorityScheduler {
    name: String,
    mode: SchedulerMode,
    store: Arc<dyn Store>,
    members: Vec<Member>,
    total_weight: i64,
    metrics: Option<EngineMetrics>,
}

impl PriorityScheduler {
    /// Create a scheduler with no member queues
    pub fn new(name: impl Into<String>, mode: SchedulerMode, store: Arc<dyn Store>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config("scheduler name cannot be empty".into()));
        }
        Ok(Self {
            name,
            mode,
            store,
            members: Vec::new(),
            total_weight: 0,
            metrics: None,
        })
    }

    /// Record into `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Scheduler name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Selection strategy
    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    /// Registered queue keys with their priority or weight, in registration order
    pub fn members(&self) -> Vec<(String, i64)> {
        self.members
            .iter()
            .map(|m| (m.queue.queue_key().to_string(), m.slot))
            .collect()
    }

    /// Register a member queue
    ///
    /// The slot must match the scheduler's mode, weights must be between 1
    /// and [`MAX_WEIGHT`] and a queue can only be registered once.
    pub async fn add_queue(&mut self, queue: Arc<dyn TaskQueue>, slot: Slot) -> Result<()> {
        let value = match (self.mode, slot) {
            (SchedulerMode::Priority, Slot::Priority(p)) => p,
            (SchedulerMode::Weighted, Slot::Weight(w)) if (1..=MAX_WEIGHT).contains(&w) => w,
            (SchedulerMode::Weighted, Slot::Weight(w)) => {
                return Err(Error::Config(format!(
                    "weight must be between 1 and {}, got {}",
                    MAX_WEIGHT, w
                )));
            }
            (mode, slot) => {
                return Err(Error::Config(format!(
                    "{:?} does not fit a {:?} scheduler",
                    slot, mode
                )));
            }
        };

        let member = Keys::scheduler_member(&self.name, queue.queue_key());
        if self.members.iter().any(|m| m.member == member) {
            return Err(Error::Config(format!(
                "queue {} is already registered with scheduler {}",
                queue.queue_key(),
                self.name
            )));
        }

        let total_weight = match self.mode {
            SchedulerMode::Weighted => self.total_weight.checked_add(value).ok_or_else(|| {
                Error::Config(format!("total weight of scheduler {} overflows", self.name))
            })?,
            SchedulerMode::Priority => self.total_weight,
        };

        if self.mode == SchedulerMode::Priority {
            let key = Keys::scheduler(&self.name);
            self.store
                .zadd(&key, &member, value as f64)
                .await
                .context("add_queue", &key)?;
        }

        tracing::debug!(
            "Queue {} registered with scheduler {} ({:?})",
            queue.queue_key(),
            self.name,
            slot
        );
        self.members.push(Member {
            queue,
            member,
            slot: value,
        });
        self.total_weight = total_weight;
        Ok(())
    }

    /// Take the next task according to the scheduler's mode
    ///
    /// Returns `None` when every member queue is empty.
    pub async fn get_task(&self) -> Result<Option<Task>> {
        match self.mode {
            SchedulerMode::Priority => self.get_task_by_priority().await,
            SchedulerMode::Weighted => self.get_task_by_weight().await,
        }
    }

    async fn get_task_by_priority(&self) -> Result<Option<Task>> {
        let key = Keys::scheduler(&self.name);
        let ordered = self.store.zrevrange(&key).await.context("get_task", &key)?;

        for name in ordered {
            let member = match self.members.iter().find(|m| m.member == name) {
                Some(member) => member,
                None => {
                    tracing::warn!("Scheduler {} skipping unregistered member {}", self.name, name);
                    continue;
                }
            };
            if let Some(task) = member.queue.dequeue().await? {
                self.record_selection(member);
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    async fn get_task_by_weight(&self) -> Result<Option<Task>> {
        if self.members.is_empty() {
            return Ok(None);
        }

        let key = Keys::scheduler_weight(&self.name);
        let args = self
            .members
            .iter()
            .flat_map(|m| [m.member.clone(), m.slot.to_string()])
            .collect();
        let credits = self
            .store
            .eval(Script::IncrementCredits, vec![key.clone()], args)
            .await
            .and_then(Reply::into_array)
            .and_then(|values| values.into_iter().map(Reply::into_int).collect::<std::result::Result<Vec<_>, _>>())
            .context("increment_credits", &key)?;

        if credits.len() != self.members.len() {
            return Err(Error::Consistency(format!(
                "scheduler {} got {} credits for {} members",
                self.name,
                credits.len(),
                self.members.len()
            )));
        }

        // Highest credit, then higher weight, then earlier registration
        let selected = (0..self.members.len())
            .max_by(|&a, &b| {
                credits[a]
                    .cmp(&credits[b])
                    .then(self.members[a].slot.cmp(&self.members[b].slot))
                    .then(b.cmp(&a))
            })
            .unwrap_or(0);

        let mut order: Vec<usize> = (0..self.members.len()).filter(|&i| i != selected).collect();
        order.sort_by(|&a, &b| self.members[b].slot.cmp(&self.members[a].slot).then(a.cmp(&b)));
        order.insert(0, selected);

        for index in order {
            let member = &self.members[index];
            if let Some(task) = member.queue.dequeue().await? {
                self.store
                    .hincrby(&key, &member.member, -self.total_weight)
                    .await
                    .context("debit_credit", &key)?;
                if index != selected {
                    tracing::debug!(
                        "Scheduler {} fell back to {} ({} empty)",
                        self.name,
                        member.queue.queue_key(),
                        self.members[selected].queue.queue_key()
                    );
                }
                self.record_selection(member);
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    fn record_selection(&self, member: &Member) {
        if let Some(metrics) = &self.metrics {
            metrics.record_selection(&self.name, member.queue.queue_key());
        }
        tracing::debug!("Scheduler {} served from {}", self.name, member.queue.queue_key());
    }

    /// Current weighted round robin credit per member name
    pub async fn credits(&self) -> Result<HashMap<String, i64>> {
        let key = Keys::scheduler_weight(&self.name);
        let raw = self.store.hgetall(&key).await.context("credits", &key)?;
        raw.into_iter()
            .map(|(member, value)| {
                value
                    .parse::<i64>()
                    .map(|credit| (member, credit))
                    .map_err(|_| {
                        Error::store(
                            "credits",
                            key.clone(),
                            StoreError::UnexpectedReply(format!("credit is not an integer: {}", value)),
                        )
                    })
            })
            .collect()
    }

    /// Clear all credits
    pub async fn reset_credits(&self) -> Result<()> {
        let key = Keys::scheduler_weight(&self.name);
        self.store
            .del(std::slice::from_ref(&key))
            .await
            .context("reset_credits", &key)?;
        tracing::info!("Scheduler {} credits reset", self.name);
        Ok(())
    }
}
