//! Task builder
//!
//! Provides fluent API for building tasks.

use super::{Task, TaskStatus};
use crate::config;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

/// Task builder
///
/// # Examples
///
/// ```rust
/// use taskq::Task;
/// use serde::Serialize;
/// use std::time::Duration;
///
/// #[derive(Serialize)]
/// struct EmailPayload {
///     to: String,
///     subject: String,
/// }
///
/// # fn example() -> taskq::Result<()> {
/// let task = Task::builder("email:send")
///     .payload(&EmailPayload {
///         to: "user@example.com".to_string(),
///         subject: "Hello".to_string(),
///     })?
///     .max_retry(5)
///     .group("daily_digest")
///     .max_batch_size(20)
///     .max_wait_time(Duration::from_secs(10))
///     .build()?;
/// assert_eq!(task.group(), Some("daily_digest"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TaskBuilder {
    id: Option<String>,
    task_type: String,
    payload: Map<String, Value>,
    max_retry: Option<u32>,
    group_key: Option<String>,
    max_batch_size: usize,
    max_wait_time: u64,
    created: Option<DateTime<Utc>>,
}

impl TaskBuilder {
    /// Create a new task builder
    #[must_use]
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            id: None,
            task_type: task_type.into(),
            payload: Map::new(),
            max_retry: None,
            group_key: None,
            max_batch_size: 0,
            max_wait_time: 0,
            created: None,
        }
    }

    /// Set an explicit task id (default: random UUID)
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set task payload from any value serializing to a JSON object
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(map) => {
                self.payload = map;
                Ok(self)
            }
            other => Err(Error::Validation(format!(
                "payload must serialize to a JSON object, got {}",
                other
            ))),
        }
    }

    /// Set a single payload entry
    #[must_use]
    pub fn payload_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Set maximum retry count (default: global config)
    #[must_use]
    pub fn max_retry(mut self, max: u32) -> Self {
        self.max_retry = Some(max);
        self
    }

    /// Set group name for task aggregation
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group_key = Some(group.into());
        self
    }

    /// Set the group size that triggers a batch
    #[must_use]
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set how long a group may wait before it is due
    #[must_use]
    pub fn max_wait_time(mut self, wait: Duration) -> Self {
        self.max_wait_time = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set creation time (default: now)
    #[must_use]
    pub fn created_at(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    /// Build the task
    pub fn build(self) -> Result<Task> {
        let task = Task {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            task_type: self.task_type,
            payload: self.payload,
            max_retry: self.max_retry.unwrap_or_else(config::get_default_max_retry),
            retry: 0,
            created: self.created.unwrap_or_else(Utc::now),
            status: TaskStatus::Pending,
            group_key: self.group_key,
            max_batch_size: self.max_batch_size,
            max_wait_time: self.max_wait_time,
            is_aggregated: false,
            original_tasks: Vec::new(),
        };

        task.validate()?;
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Payload {
        user_id: u64,
        name: String,
    }

    #[test]
    fn test_builder_basic() {
        let task = Task::builder("email:send")
            .payload(&Payload {
                user_id: 7,
                name: "Ada".into(),
            })
            .unwrap()
            .max_retry(5)
            .build()
            .unwrap();

        assert_eq!(task.task_type, "email:send");
        assert_eq!(task.payload["user_id"], 7);
        assert_eq!(task.max_retry, 5);
        assert_eq!(task.retry, 0);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(!task.is_aggregated);
        assert!(uuid::Uuid::parse_str(&task.id).is_ok());
    }

    #[test]
    fn test_builder_grouping() {
        let task = Task::builder("notify")
            .id("n-1")
            .payload_value("k", "v")
            .group("daily")
            .max_batch_size(4)
            .max_wait_time(Duration::from_millis(1500))
            .build()
            .unwrap();

        assert_eq!(task.id, "n-1");
        assert_eq!(task.group(), Some("daily"));
        assert_eq!(task.max_batch_size, 4);
        assert_eq!(task.max_wait_time, 1500);
    }

    #[test]
    fn test_builder_rejects_non_object_payload() {
        let result = Task::builder("t").payload(&vec![1, 2, 3]);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_builder_validates() {
        assert!(Task::builder("").build().is_err());
        assert!(Task::builder("t").id("").build().is_err());
    }
}
