//! Key manager
//!
//! Provides the key naming convention. Other tooling may rely on these names
//! to inspect queue state, so they are a stable contract.

/// Hash field holding a serialized task record
pub const DATA_FIELD: &str = "data";

/// Prefix of task record keys
pub const TASK_PREFIX: &str = "task:";

/// Key manager
#[derive(Debug, Clone)]
pub struct Keys;

impl Keys {
    /// Task record Key (Hash, field `data`)
    /// Example: task:a1b2c3d4-...
    pub fn task(task_id: &str) -> String {
        format!("{}{}", TASK_PREFIX, task_id)
    }

    /// Queue membership Key (List for basic queues, ZSet for delay/retry)
    /// Example: queue:default, delay_queue:emails, retry_queue:emails
    pub fn queue(queue_type: &str, queue_name: &str) -> String {
        format!("{}:{}", queue_type, queue_name)
    }

    /// Content deduplication marker Key (String with TTL)
    /// Example: dedup:default:9f86d08...
    pub fn dedup(queue_name: &str, content_hash: &str) -> String {
        format!("dedup:{}:{}", queue_name, content_hash)
    }

    /// Aggregation group pending members Key (List)
    /// Example: aggregator:groups:default:emails
    pub fn aggregator_group(queue_name: &str, group_key: &str) -> String {
        format!("aggregator:groups:{}:{}", queue_name, group_key)
    }

    /// Aggregation group timer marker Key (String with TTL)
    /// Example: aggregator:timer:default:emails
    pub fn aggregator_timer(queue_name: &str, group_key: &str) -> String {
        format!("aggregator:timer:{}:{}", queue_name, group_key)
    }

    /// Priority scheduler membership Key (ZSet)
    /// Example: scheduler:workers
    pub fn scheduler(scheduler_name: &str) -> String {
        format!("scheduler:{}", scheduler_name)
    }

    /// Weighted scheduler credit Key (Hash)
    /// Example: scheduler:weight:workers
    pub fn scheduler_weight(scheduler_name: &str) -> String {
        format!("scheduler:weight:{}", scheduler_name)
    }

    /// Scheduler member name of a queue
    /// Example: workers:queue:default
    pub fn scheduler_member(scheduler_name: &str, queue_key: &str) -> String {
        format!("{}:{}", scheduler_name, queue_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(Keys::task("abc123"), "task:abc123");
        assert_eq!(Keys::queue("queue", "default"), "queue:default");
        assert_eq!(Keys::queue("delay_queue", "emails"), "delay_queue:emails");
        assert_eq!(Keys::dedup("default", "ff00"), "dedup:default:ff00");
        assert_eq!(Keys::aggregator_group("default", "g1"), "aggregator:groups:default:g1");
        assert_eq!(Keys::aggregator_timer("default", "g1"), "aggregator:timer:default:g1");
        assert_eq!(Keys::scheduler("s"), "scheduler:s");
        assert_eq!(Keys::scheduler_weight("s"), "scheduler:weight:s");
        assert_eq!(Keys::scheduler_member("s", "queue:q1"), "s:queue:q1");
    }
}
