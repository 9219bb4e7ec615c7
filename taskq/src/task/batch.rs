//! Batch accounting for aggregated tasks

use super::{Task, TaskStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Overall outcome of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every member succeeded
    AllSuccess,
    /// Every member failed
    AllFailed,
    /// Some members failed
    PartialFailed,
}

/// Result of processing an aggregated task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Id of the aggregated task
    pub aggregated_task_id: String,
    /// Number of member tasks
    pub total_tasks: usize,
    /// Ids of members processed successfully, in collection order
    pub successful_tasks: Vec<String>,
    /// Ids of members that failed, in collection order
    pub failed_tasks: Vec<String>,
    /// Overall outcome
    pub status: BatchStatus,
    /// When the batch was settled
    pub processed_at: DateTime<Utc>,
}

impl BatchResult {
    /// Number of members processed successfully
    pub fn successful_count(&self) -> usize {
        self.successful_tasks.len()
    }

    /// Number of members that failed
    pub fn failed_count(&self) -> usize {
        self.failed_tasks.len()
    }
}

impl Task {
    /// Settle an aggregated task from its members' outcomes
    ///
    /// Every member in `original_tasks` must appear exactly once across
    /// `succeeded` and `failed`. The task becomes `Completed` when nothing
    /// failed and `Failed` otherwise.
    pub fn settle_batch<S: AsRef<str>>(&mut self, succeeded: &[S], failed: &[S]) -> Result<BatchResult> {
        if !self.is_aggregated {
            return Err(Error::Validation(format!("task {} is not an aggregated task", self.id)));
        }

        let members: HashSet<&str> = self.original_tasks.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        for id in succeeded.iter().chain(failed.iter()).map(AsRef::as_ref) {
            if !members.contains(id) {
                return Err(Error::Validation(format!("{} is not a member of batch {}", id, self.id)));
            }
            if !seen.insert(id) {
                return Err(Error::Validation(format!("{} reported twice for batch {}", id, self.id)));
            }
        }
        if seen.len() != members.len() {
            return Err(Error::Validation(format!(
                "batch {} has {} members but {} outcomes were reported",
                self.id,
                members.len(),
                seen.len()
            )));
        }

        let failed_ids: HashSet<&str> = failed.iter().map(AsRef::as_ref).collect();
        let (failed_tasks, successful_tasks): (Vec<String>, Vec<String>) = self
            .original_tasks
            .iter()
            .cloned()
            .partition(|id| failed_ids.contains(id.as_str()));

        let status = match (successful_tasks.len(), failed_tasks.len()) {
            (_, 0) => BatchStatus::AllSuccess,
            (0, _) => BatchStatus::AllFailed,
            _ => BatchStatus::PartialFailed,
        };
        self.status = if status == BatchStatus::AllSuccess {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };

        Ok(BatchResult {
            aggregated_task_id: self.id.clone(),
            total_tasks: members.len(),
            successful_tasks,
            failed_tasks,
            status,
            processed_at: Utc::now(),
        })
    }
}
