//! Record inspection
//!
//! Read access to task records and bounded retention of terminal outcomes.

use crate::config;
use crate::error::StoreContext;
use crate::storage::keys::DATA_FIELD;
use crate::storage::{Keys, Store};
use crate::task::Task;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Task record inspector
#[derive(Clone)]
pub struct Inspector {
    store: Arc<dyn Store>,
    task_ttl: Duration,
}

impl Inspector {
    /// Create a new inspector retaining acked records for the configured `task_ttl`
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            task_ttl: config::get_task_ttl(),
        }
    }

    /// Set how long acked records are kept
    #[must_use]
    pub fn with_task_ttl(mut self, ttl: Duration) -> Self {
        self.task_ttl = ttl;
        self
    }

    /// Get the stored record of a task
    ///
    /// Queued tasks and acked outcomes have a record; dequeued tasks that were
    /// never acked do not.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let key = Keys::task(task_id);
        let data = self
            .store
            .hget(&key, DATA_FIELD)
            .await
            .context("get_task", &key)?;

        match data {
            Some(data) => Ok(Some(Task::decode(&data)?)),
            None => Ok(None),
        }
    }

    /// Keep a terminal outcome for inspection
    ///
    /// Writes the record with a TTL. Only `Completed`, `Failed` and
    /// `DeadLetter` tasks can be acked.
    pub async fn ack(&self, task: &Task) -> Result<()> {
        if !task.is_terminal() {
            return Err(Error::Validation(format!(
                "task {} is {}, only terminal tasks can be acked",
                task.id, task.status
            )));
        }

        let key = task.record_key();
        let data = task.encode()?;
        self.store
            .hset(&key, DATA_FIELD, &data)
            .await
            .context("ack", &key)?;
        self.store
            .expire(&key, self.task_ttl)
            .await
            .context("ack", &key)?;

        tracing::debug!("Task {} acked as {}", task.id, task.status);
        Ok(())
    }
}
