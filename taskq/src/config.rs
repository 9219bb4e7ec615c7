//! Engine-wide configuration
//!
//! Centralized defaults for payload limits, record retention, deduplication,
//! retry backoff and aggregation thresholds. Queues read these when they are
//! built; per-instance builders override them.

use crate::Error;
use once_cell::sync::Lazy;
use std::sync::RwLock;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum serialized payload size in bytes (default: 512KB)
    pub max_payload_size: usize,

    /// Retention of acknowledged terminal records (default: 24 hours)
    pub task_ttl: Duration,

    /// Lifetime of a content-deduplication marker (default: 5 minutes)
    pub dedup_ttl: Duration,

    /// Default maximum retry count for tasks (default: 3)
    pub default_max_retry: u32,

    /// Base delay of the retry backoff (default: 1 second)
    pub retry_base_delay: Duration,

    /// Ceiling of the retry backoff (default: 60 seconds)
    pub retry_max_delay: Duration,

    /// Group size that triggers a batch when a task sets none (default: 10)
    pub default_max_batch_size: usize,

    /// Group wait time used when a task sets none (default: 30 seconds)
    pub default_max_wait: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 512 * 1024,
            task_ttl: Duration::from_secs(86400),
            dedup_ttl: Duration::from_secs(300),
            default_max_retry: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            default_max_batch_size: 10,
            default_max_wait: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum payload size
    #[must_use]
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Set terminal record retention
    #[must_use]
    pub fn with_task_ttl(mut self, ttl: Duration) -> Self {
        self.task_ttl = ttl;
        self
    }

    /// Set deduplication marker lifetime
    #[must_use]
    pub fn with_dedup_ttl(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = ttl;
        self
    }

    /// Set default max retry count
    #[must_use]
    pub fn with_default_max_retry(mut self, max_retry: u32) -> Self {
        self.default_max_retry = max_retry;
        self
    }

    /// Set retry backoff base and ceiling
    #[must_use]
    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    /// Set aggregation defaults
    #[must_use]
    pub fn with_aggregation(mut self, max_batch_size: usize, max_wait: Duration) -> Self {
        self.default_max_batch_size = max_batch_size;
        self.default_max_wait = max_wait;
        self
    }

    /// Check the configuration for values the engine cannot work with
    pub fn validate(&self) -> Result<(), String> {
        if self.default_max_batch_size == 0 {
            return Err("default_max_batch_size must be greater than 0".to_string());
        }
        if self.default_max_wait.is_zero() {
            return Err("default_max_wait must be greater than 0".to_string());
        }
        if self.dedup_ttl.is_zero() || self.task_ttl.is_zero() {
            return Err("TTLs must be greater than 0".to_string());
        }
        if self.retry_base_delay > self.retry_max_delay {
            return Err(format!(
                "retry_base_delay ({:?}) exceeds retry_max_delay ({:?})",
                self.retry_base_delay, self.retry_max_delay
            ));
        }
        Ok(())
    }
}

/// Thread-safe global configuration storage
static GLOBAL_CONFIG: Lazy<RwLock<EngineConfig>> =
    Lazy::new(|| RwLock::new(EngineConfig::default()));

/// Get the current global configuration
pub fn get_config() -> EngineConfig {
    match GLOBAL_CONFIG.read() {
        Ok(config) => config.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Set the global configuration
///
/// An invalid configuration is rejected with [`Error::Config`] and the
/// current one stays in place.
pub fn set_config(config: EngineConfig) -> crate::Result<()> {
    config.validate().map_err(Error::Config)?;

    let mut global = match GLOBAL_CONFIG.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *global = config;
    tracing::info!("Global engine configuration updated");
    Ok(())
}

/// Update the global configuration in place
///
/// The modified configuration is validated before it replaces the current
/// one; on [`Error::Config`] nothing changes.
///
/// # Example
///
/// ```rust
/// use taskq::config::update_config;
/// use std::time::Duration;
///
/// update_config(|config| {
///     config.dedup_ttl = Duration::from_secs(60);
/// })
/// .unwrap();
/// ```
pub fn update_config<F>(modifier: F) -> crate::Result<()>
where
    F: FnOnce(&mut EngineConfig),
{
    let mut global = match GLOBAL_CONFIG.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let mut updated = global.clone();
    modifier(&mut updated);
    if let Err(reason) = updated.validate() {
        tracing::warn!("Rejected engine configuration update: {}", reason);
        return Err(Error::Config(reason));
    }
    *global = updated;

    tracing::info!("Global engine configuration updated");
    Ok(())
}

/// Get the maximum payload size
pub fn get_max_payload_size() -> usize {
    get_config().max_payload_size
}

/// Get the terminal record retention
pub fn get_task_ttl() -> Duration {
    get_config().task_ttl
}

/// Get the deduplication marker lifetime
pub fn get_dedup_ttl() -> Duration {
    get_config().dedup_ttl
}

/// Get the default max retry count
pub fn get_default_max_retry() -> u32 {
    get_config().default_max_retry
}
