//! Observability module
//!
//! Provides Prometheus metrics. Logging goes through `tracing`; the library
//! never installs a subscriber.

pub mod metrics;

pub use metrics::EngineMetrics;
