//! Common test utilities
//!
//! Shared helper functions and fixtures for integration tests.

#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;
use taskq::{MemoryStore, RedisStore, Store, Task};

/// In-memory store, both as a handle and as the trait object queues take
pub fn memory_store() -> (MemoryStore, Arc<dyn Store>) {
    let store = MemoryStore::new();
    let shared: Arc<dyn Store> = Arc::new(store.clone());
    (store, shared)
}

/// Redis store at `REDIS_URL` (default: redis://localhost:6379)
pub async fn redis_store() -> Arc<dyn Store> {
    let redis_url = std::env::var("REDIS_URL")
        .unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let store = RedisStore::from_url(&redis_url)
        .await
        .expect("Failed to connect to Redis");
    Arc::new(store)
}

/// Queue name unique to one test run
pub fn unique_name(prefix: &str) -> String {
    format!("test-{}-{}", prefix, uuid::Uuid::new_v4())
}

/// Task with a fixed id and a payload derived from it
pub fn task(task_type: &str, id: &str) -> Task {
    Task::builder(task_type)
        .id(id)
        .payload(&json!({ "id": id }))
        .expect("Failed to create payload")
        .build()
        .expect("Failed to build task")
}

/// Task with an explicit payload
pub fn task_with_payload(id: &str, payload: serde_json::Value) -> Task {
    Task::builder("test")
        .id(id)
        .payload(&payload)
        .expect("Failed to create payload")
        .build()
        .expect("Failed to build task")
}

/// Install a test subscriber once, honoring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
