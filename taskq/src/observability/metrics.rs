//! Prometheus metrics collector for taskq
//!
//! Counts what moves through the engine: enqueue outcomes, dequeues, retries,
//! dead-letters, batches, scheduler selections and consistency errors.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;

/// taskq metrics collector
///
/// Cloning is cheap; clones record into the same registry.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Arc<Registry>,

    // Queue counters
    tasks_enqueued_total: IntCounterVec,
    tasks_dequeued_total: IntCounterVec,
    consistency_errors_total: IntCounterVec,

    // Retry path
    tasks_retried_total: IntCounterVec,
    tasks_dead_lettered_total: IntCounterVec,
    retry_delay_seconds: HistogramVec,

    // Aggregation and scheduling
    batches_triggered_total: IntCounterVec,
    scheduler_selections_total: IntCounterVec,

    // Queue gauges
    queue_depth: IntGaugeVec,
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics").finish_non_exhaustive()
    }
}

impl EngineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tasks_enqueued_total = IntCounterVec::new(
            Opts::new("taskq_tasks_enqueued_total", "Enqueue attempts by outcome"),
            &["queue", "outcome"],
        )?;

        let tasks_dequeued_total = IntCounterVec::new(
            Opts::new("taskq_tasks_dequeued_total", "Tasks handed to consumers"),
            &["queue"],
        )?;

        let consistency_errors_total = IntCounterVec::new(
            Opts::new(
                "taskq_consistency_errors_total",
                "Ids that left a queue without a record",
            ),
            &["queue"],
        )?;

        let tasks_retried_total = IntCounterVec::new(
            Opts::new("taskq_tasks_retried_total", "Tasks rescheduled for retry"),
            &["queue"],
        )?;

        let tasks_dead_lettered_total = IntCounterVec::new(
            Opts::new("taskq_tasks_dead_lettered_total", "Tasks moved to the dead-letter queue"),
            &["queue"],
        )?;

        let retry_delay_seconds = HistogramVec::new(
            HistogramOpts::new("taskq_retry_delay_seconds", "Backoff delay chosen for retries")
                .buckets(vec![0.1, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 300.0]),
            &["queue"],
        )?;

        let batches_triggered_total = IntCounterVec::new(
            Opts::new("taskq_batches_triggered_total", "Aggregated tasks created"),
            &["queue", "group"],
        )?;

        let scheduler_selections_total = IntCounterVec::new(
            Opts::new(
                "taskq_scheduler_selections_total",
                "Tasks served by a scheduler, per member queue",
            ),
            &["scheduler", "queue"],
        )?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("taskq_queue_depth", "Queue length at the last len() call"),
            &["queue"],
        )?;

        registry.register(Box::new(tasks_enqueued_total.clone()))?;
        registry.register(Box::new(tasks_dequeued_total.clone()))?;
        registry.register(Box::new(consistency_errors_total.clone()))?;
        registry.register(Box::new(tasks_retried_total.clone()))?;
        registry.register(Box::new(tasks_dead_lettered_total.clone()))?;
        registry.register(Box::new(retry_delay_seconds.clone()))?;
        registry.register(Box::new(batches_triggered_total.clone()))?;
        registry.register(Box::new(scheduler_selections_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            tasks_enqueued_total,
            tasks_dequeued_total,
            consistency_errors_total,
            tasks_retried_total,
            tasks_dead_lettered_total,
            retry_delay_seconds,
            batches_triggered_total,
            scheduler_selections_total,
            queue_depth,
        })
    }

    /// Record an enqueue attempt
    pub fn record_enqueue(&self, queue: &str, outcome: &str) {
        self.tasks_enqueued_total
            .with_label_values(&[queue, outcome])
            .inc();
    }

    /// Record a task handed to a consumer
    pub fn record_dequeue(&self, queue: &str) {
        self.tasks_dequeued_total.with_label_values(&[queue]).inc();
    }

    /// Record an id whose record was missing
    pub fn record_consistency_error(&self, queue: &str) {
        self.consistency_errors_total
            .with_label_values(&[queue])
            .inc();
    }

    /// Record a rescheduled retry
    pub fn record_retry(&self, queue: &str, delay: Duration) {
        self.tasks_retried_total.with_label_values(&[queue]).inc();
        self.retry_delay_seconds
            .with_label_values(&[queue])
            .observe(delay.as_secs_f64());
    }

    /// Record a dead-lettered task
    pub fn record_dead_letter(&self, queue: &str) {
        self.tasks_dead_lettered_total
            .with_label_values(&[queue])
            .inc();
    }

    /// Record a triggered batch
    pub fn record_batch(&self, queue: &str, group: &str) {
        self.batches_triggered_total
            .with_label_values(&[queue, group])
            .inc();
    }

    /// Record a scheduler selection
    pub fn record_selection(&self, scheduler: &str, queue: &str) {
        self.scheduler_selections_total
            .with_label_values(&[scheduler, queue])
            .inc();
    }

    /// Update the queue depth gauge
    pub fn set_queue_depth(&self, queue: &str, depth: u64) {
        self.queue_depth
            .with_label_values(&[queue])
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Get the registry for custom metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }

    /// Current value of a scheduler selection counter
    pub fn selections(&self, scheduler: &str, queue: &str) -> u64 {
        self.scheduler_selections_total
            .with_label_values(&[scheduler, queue])
            .get()
    }
}
