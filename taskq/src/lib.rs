//! # taskq
//!
//! taskq is a task-queue engine on top of an atomic key-value store such as
//! Redis. Producers and consumers in any number of processes share queues
//! through the store; every state change that touches both a task record and
//! a queue happens in one atomic script.
//!
//! ## Features
//!
//! - FIFO queues with optional payload deduplication
//! - Delay queues and retry queues with exponential backoff and dead-lettering
//! - Task aggregation by group key, triggered by size or wait time
//! - Strict priority and weighted round robin over several queues
//! - Prometheus metrics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskq::{RedisStore, RetryQueue, Queue, Store, Task, TaskQueue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store: Arc<dyn Store> = Arc::new(RedisStore::from_url("redis://localhost:6379").await?);
//!     let queue = Queue::new("emails", store.clone())?;
//!     let retries = RetryQueue::new("emails", store)?;
//!
//!     let task = Task::builder("email:send")
//!         .payload_value("to", "user@example.com")
//!         .max_retry(5)
//!         .build()?;
//!     queue.enqueue(task).await?;
//!
//!     if let Some(task) = queue.dequeue().await? {
//!         // On failure, hand the task to the retry queue
//!         retries.retry(task).await?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Public module exports
pub mod config;
pub mod error;
pub mod task;

// Queues
pub mod queue;

// Aggregation
pub mod aggregator;

// Multi-queue scheduling
pub mod scheduler;

// Record inspection
pub mod inspector;

// Storage layer
pub mod storage;

// Observability
pub mod observability;

// Re-export common types
pub use aggregator::{Aggregator, AggregatorConfig, GroupAdd};
pub use config::EngineConfig;
pub use error::{DuplicateKind, Error, Result};
pub use inspector::Inspector;
pub use observability::EngineMetrics;
pub use queue::{
    BackoffPolicy, DelayQueue, EnqueueOutcome, GroupedOutcome, Queue, RetryDecision, RetryQueue,
    TaskQueue,
};
pub use scheduler::{PriorityScheduler, SchedulerMode, Slot};
pub use storage::{MemoryStore, RedisConfig, RedisStore, Store, StoreError};
pub use task::{BatchResult, BatchStatus, Task, TaskBuilder, TaskStatus};
