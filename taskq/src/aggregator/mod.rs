//! Task aggregation module
//!
//! Groups tasks sharing a group key and turns a full or expired group into a
//! single aggregated task. Each group keeps its member ids in
//! `aggregator:groups:<queue>:<group>` and a timer marker in
//! `aggregator:timer:<queue>:<group>` that expires after the group's wait
//! time. Members' records stay at `task:<id>` until the consumer of the batch
//! loads them.

use crate::config;
use crate::error::StoreContext;
use crate::observability::EngineMetrics;
use crate::storage::{Keys, Reply, Script, Store};
use crate::task::{Task, AGGREGATED_TASK_TYPE};
use crate::{Error, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Configuration for task aggregation
///
/// Used for tasks that leave `max_batch_size` or `max_wait_time` at 0.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Number of tasks in a group that triggers a batch
    pub max_size: usize,
    /// Time a partial group may wait before it is due
    pub grace_period: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        let config = config::get_config();
        Self {
            max_size: config.default_max_batch_size,
            grace_period: config.default_max_wait,
        }
    }
}

impl AggregatorConfig {
    /// Create a new aggregator configuration from the global defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum group size
    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the grace period for partial groups
    #[must_use]
    pub fn grace_period(mut self, duration: Duration) -> Self {
        self.grace_period = duration;
        self
    }
}

/// Result of adding a task to its group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAdd {
    /// Task joined the group
    Added,
    /// Task joined the group and the group reached its batch size
    Trigger,
    /// A record with the same id already exists
    DuplicateId,
}

/// Group collector for one queue
#[derive(Clone)]
pub struct Aggregator {
    queue_name: String,
    store: Arc<dyn Store>,
    config: AggregatorConfig,
    metrics: Option<EngineMetrics>,
}

impl Aggregator {
    /// Create an aggregator for the groups of `queue_name`
    pub fn new(queue_name: impl Into<String>, store: Arc<dyn Store>) -> Result<Self> {
        let queue_name = queue_name.into();
        if queue_name.is_empty() {
            return Err(Error::Config("queue name cannot be empty".into()));
        }
        Ok(Self {
            queue_name,
            store,
            config: AggregatorConfig::default(),
            metrics: None,
        })
    }

    /// Set the defaults for tasks without thresholds
    #[must_use]
    pub fn with_config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Record into `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the aggregator configuration
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Batch size and wait time that apply to `task`
    fn thresholds(&self, task: &Task) -> (usize, Duration) {
        let size = match task.max_batch_size {
            0 => self.config.max_size,
            n => n,
        };
        let wait = match task.max_wait_time {
            0 => self.config.grace_period,
            ms => Duration::from_millis(ms),
        };
        (size.max(1), wait)
    }

    /// Add a grouped task to its group
    ///
    /// The first member arms the group's timer. Returns
    /// [`GroupAdd::Trigger`] once the group holds at least the task's batch
    /// size; the caller then runs [`Aggregator::trigger_batch`].
    pub async fn add_task_to_group(&self, task: &Task) -> Result<GroupAdd> {
        let group = task
            .group()
            .ok_or_else(|| Error::Config(format!("task {} has no group key", task.id)))?;
        if task.is_aggregated {
            return Err(Error::Validation(format!("aggregated task {} cannot be grouped", task.id)));
        }
        task.validate()?;

        let (max_batch, max_wait) = self.thresholds(task);
        let group_key = Keys::aggregator_group(&self.queue_name, group);
        let reply = self
            .store
            .eval(
                Script::GroupAdd,
                vec![
                    group_key.clone(),
                    Keys::aggregator_timer(&self.queue_name, group),
                    task.record_key(),
                ],
                vec![
                    task.id.clone(),
                    task.encode()?,
                    max_batch.to_string(),
                    max_wait.as_millis().max(1).to_string(),
                ],
            )
            .await
            .and_then(Reply::into_int)
            .context("group_add", &group_key)?;

        match reply {
            0 => {
                tracing::warn!("Task {} already exists, not added to group {}", task.id, group);
                Ok(GroupAdd::DuplicateId)
            }
            1 => {
                tracing::debug!("Task {} added to group {}", task.id, group);
                Ok(GroupAdd::Added)
            }
            2 => {
                tracing::debug!("Task {} filled group {}", task.id, group);
                Ok(GroupAdd::Trigger)
            }
            other => Err(Error::Consistency(format!("unexpected group_add reply {}", other))),
        }
    }

    /// Drain a group and build its aggregated task
    ///
    /// The task is returned, not enqueued. Fails with [`Error::EmptyGroup`]
    /// when the group has no members, e.g. because another caller drained it.
    pub async fn trigger_batch(&self, group: &str) -> Result<Task> {
        let group_key = Keys::aggregator_group(&self.queue_name, group);
        let ids = self
            .store
            .eval(
                Script::GroupDrain,
                vec![group_key.clone(), Keys::aggregator_timer(&self.queue_name, group)],
                Vec::new(),
            )
            .await
            .and_then(Reply::into_strings)
            .context("group_drain", &group_key)?;

        if ids.is_empty() {
            return Err(Error::EmptyGroup(group.to_string()));
        }

        let mut batch = Task::builder(AGGREGATED_TASK_TYPE)
            .id(format!("batch_{}_{}", group, Uuid::new_v4().simple()))
            .payload(&json!({ "group_key": group, "task_count": ids.len() }))?
            .build()?;
        batch.is_aggregated = true;
        batch.original_tasks = ids;

        if let Some(metrics) = &self.metrics {
            metrics.record_batch(&self.queue_name, group);
        }
        tracing::info!(
            "Batch {} triggered for group {} with {} tasks",
            batch.id,
            group,
            batch.original_tasks.len()
        );
        Ok(batch)
    }

    /// Check if a group's wait time ran out while members are pending
    pub async fn is_due(&self, group: &str) -> Result<bool> {
        let timer_key = Keys::aggregator_timer(&self.queue_name, group);
        if self.store.exists(&timer_key).await.context("is_due", &timer_key)? {
            return Ok(false);
        }
        let group_key = Keys::aggregator_group(&self.queue_name, group);
        let pending = self.store.llen(&group_key).await.context("is_due", &group_key)?;
        Ok(pending > 0)
    }

    /// Trigger a group if it is due
    ///
    /// Returns `None` when the group is not due or another caller triggered it
    /// first.
    pub async fn poll_expired(&self, group: &str) -> Result<Option<Task>> {
        if !self.is_due(group).await? {
            return Ok(None);
        }
        match self.trigger_batch(group).await {
            Ok(batch) => Ok(Some(batch)),
            Err(Error::EmptyGroup(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Ids currently waiting in a group, oldest first
    pub async fn pending(&self, group: &str) -> Result<Vec<String>> {
        let group_key = Keys::aggregator_group(&self.queue_name, group);
        self.store
            .lrange(&group_key, 0, -1)
            .await
            .context("pending", &group_key)
    }

    /// Take the member records of an aggregated task
    ///
    /// Records are fetched and deleted in `original_tasks` order. A missing
    /// record is a [`Error::Consistency`] error.
    pub async fn load_members(&self, batch: &Task) -> Result<Vec<Task>> {
        if !batch.is_aggregated {
            return Err(Error::Validation(format!("task {} is not an aggregated task", batch.id)));
        }

        let mut members = Vec::with_capacity(batch.original_tasks.len());
        for id in &batch.original_tasks {
            let record_key = Keys::task(id);
            let data = self
                .store
                .eval(Script::TakeRecord, vec![record_key.clone()], Vec::new())
                .await
                .and_then(Reply::into_bulk)
                .context("take_record", &record_key)?;

            match data {
                Some(data) => members.push(Task::decode(&data)?),
                None => {
                    tracing::warn!("Member {} of batch {} has no record", id, batch.id);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_consistency_error(&self.queue_name);
                    }
                    return Err(Error::Consistency(format!(
                        "record of task {} missing for batch {}",
                        id, batch.id
                    )));
                }
            }
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn setup() -> (Arc<dyn Store>, Aggregator) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let aggregator = Aggregator::new("default", store.clone())
            .unwrap()
            .with_config(AggregatorConfig::new().max_size(3).grace_period(Duration::from_secs(60)));
        (store, aggregator)
    }

    fn grouped(id: &str, group: &str) -> Task {
        Task::builder("notify").id(id).group(group).build().unwrap()
    }

    #[test]
    fn test_aggregator_config() {
        let config = AggregatorConfig::new()
            .max_size(20)
            .grace_period(Duration::from_secs(60));

        assert_eq!(config.max_size, 20);
        assert_eq!(config.grace_period, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_task_thresholds_override_defaults() {
        let (_, aggregator) = setup();
        let mut task = grouped("a", "g");
        assert_eq!(aggregator.thresholds(&task), (3, Duration::from_secs(60)));

        task.max_batch_size = 5;
        task.max_wait_time = 250;
        assert_eq!(aggregator.thresholds(&task), (5, Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn test_group_key_required() {
        let (_, aggregator) = setup();
        let task = Task::builder("notify").build().unwrap();
        assert!(matches!(aggregator.add_task_to_group(&task).await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_trigger_builds_aggregated_task() {
        let (store, aggregator) = setup();
        assert_eq!(aggregator.add_task_to_group(&grouped("a", "g")).await.unwrap(), GroupAdd::Added);
        assert_eq!(aggregator.add_task_to_group(&grouped("b", "g")).await.unwrap(), GroupAdd::Added);
        assert_eq!(aggregator.add_task_to_group(&grouped("a", "g")).await.unwrap(), GroupAdd::DuplicateId);
        assert_eq!(aggregator.add_task_to_group(&grouped("c", "g")).await.unwrap(), GroupAdd::Trigger);
        assert!(store.exists("aggregator:timer:default:g").await.unwrap());

        let batch = aggregator.trigger_batch("g").await.unwrap();
        assert!(batch.id.starts_with("batch_g_"));
        assert_eq!(batch.task_type, "aggregated");
        assert!(batch.is_aggregated);
        assert_eq!(batch.group(), None);
        assert_eq!(batch.original_tasks, vec!["a", "b", "c"]);
        assert_eq!(batch.payload["group_key"], "g");
        assert_eq!(batch.payload["task_count"], 3);

        assert!(aggregator.pending("g").await.unwrap().is_empty());
        assert!(!store.exists("aggregator:timer:default:g").await.unwrap());
        assert!(matches!(aggregator.trigger_batch("g").await, Err(Error::EmptyGroup(_))));
    }

    #[tokio::test]
    async fn test_load_members() {
        let (store, aggregator) = setup();
        for id in ["a", "b"] {
            aggregator.add_task_to_group(&grouped(id, "g")).await.unwrap();
        }
        let batch = aggregator.trigger_batch("g").await.unwrap();

        let members = aggregator.load_members(&batch).await.unwrap();
        let ids: Vec<&str> = members.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!store.exists("task:a").await.unwrap());

        assert!(matches!(aggregator.load_members(&batch).await, Err(Error::Consistency(_))));
    }
}
