//! Task type definitions
//!
//! Provides the Task record moved between queues, the TaskBuilder for
//! building it, and the BatchResult a consumer produces for aggregated tasks.

use crate::config;
use crate::storage::Keys;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub mod batch;
pub mod builder;

pub use batch::{BatchResult, BatchStatus};
pub use builder::TaskBuilder;

/// Task type of a synthetic aggregated task
pub const AGGREGATED_TASK_TYPE: &str = "aggregated";

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in a queue
    Pending,
    /// Handed to a consumer
    Processing,
    /// Processed successfully
    Completed,
    /// Processing failed for good
    Failed,
    /// Waiting in a retry queue
    Retrying,
    /// Moved to the dead-letter queue
    #[serde(rename = "dead")]
    DeadLetter,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Retrying => write!(f, "retrying"),
            TaskStatus::DeadLetter => write!(f, "dead"),
        }
    }
}

/// Task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task ID, the only identity used for storage keys
    pub id: String,
    /// Task type tag
    #[serde(rename = "type")]
    pub task_type: String,
    /// Opaque payload
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Maximum number of retries
    pub max_retry: u32,
    /// Retry attempts so far
    #[serde(default)]
    pub retry: u32,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Task status
    #[serde(default)]
    pub status: TaskStatus,
    /// Aggregation group, empty or absent when not aggregated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    /// Group size that triggers a batch (0 = configured default)
    #[serde(default)]
    pub max_batch_size: usize,
    /// Group wait time in milliseconds (0 = configured default)
    ///
    /// Stored as `max_wait_ms` so the unit is visible in the record.
    #[serde(default, rename = "max_wait_ms")]
    pub max_wait_time: u64,
    /// Whether this is a synthetic aggregated task
    #[serde(default)]
    pub is_aggregated: bool,
    /// Member task ids of an aggregated task, in collection order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub original_tasks: Vec<String>,
}

impl Task {
    /// Create a new task builder
    #[must_use]
    pub fn builder(task_type: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(task_type)
    }

    /// Validate if the task is valid
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Validation("id cannot be empty".into()));
        }

        if self.task_type.is_empty() {
            return Err(Error::Validation("task_type cannot be empty".into()));
        }

        let payload_size = serde_json::to_vec(&self.payload)?.len();
        let max_payload_size = config::get_max_payload_size();
        if payload_size > max_payload_size {
            return Err(Error::Validation(format!(
                "payload exceeds {}KB limit (got {}B)",
                max_payload_size / 1024,
                payload_size
            )));
        }

        if self.is_aggregated && self.group().is_some() {
            return Err(Error::Validation(format!(
                "aggregated task {} cannot carry a group key",
                self.id
            )));
        }

        Ok(())
    }

    /// Get task description
    pub fn description(&self) -> String {
        format!(
            "Task[type={}, id={}, status={}, retry={}/{}]",
            self.task_type, self.id, self.status, self.retry, self.max_retry
        )
    }

    /// Storage key of the record
    pub fn record_key(&self) -> String {
        Keys::task(&self.id)
    }

    /// Aggregation group, if any
    pub fn group(&self) -> Option<&str> {
        self.group_key.as_deref().filter(|g| !g.is_empty())
    }

    /// Creation time as epoch milliseconds
    pub fn created_millis(&self) -> i64 {
        self.created.timestamp_millis()
    }

    /// SHA-256 hex digest of the payload's canonical JSON
    ///
    /// Object keys serialize in sorted order, so equal payloads hash equally
    /// whatever order they were built in.
    pub fn content_hash(&self) -> Result<String> {
        let json = serde_json::to_vec(&self.payload)?;
        let mut hasher = Sha256::new();
        hasher.update(&json);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Check if the task can be retried
    pub fn can_retry(&self) -> bool {
        self.retry < self.max_retry
    }

    /// Check if the status is an outcome no queue will move further
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::DeadLetter
        )
    }

    /// Serialize the record
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a record
    pub fn decode(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}
