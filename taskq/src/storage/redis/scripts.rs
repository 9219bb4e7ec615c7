//! Lua sources for the atomic procedures
//!
//! Positional `KEYS` / `ARGV` layouts are documented on [`Script`].

use crate::storage::Script;

/// Store a record and push its id onto a list, unless the record exists
pub const ENQUEUE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], 'data', ARGV[1])
redis.call('LPUSH', KEYS[2], ARGV[2])
return 1
"#;

/// Same as [`ENQUEUE`] plus a content marker with a millisecond TTL
pub const ENQUEUE_DEDUP: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
if redis.call('EXISTS', KEYS[3]) == 1 then
    return -1
end
redis.call('HSET', KEYS[1], 'data', ARGV[1])
redis.call('LPUSH', KEYS[2], ARGV[2])
redis.call('SET', KEYS[3], ARGV[2], 'PX', ARGV[3])
return 1
"#;

/// Store a record and add its id to a sorted set with a due score
pub const ENQUEUE_SCHEDULED: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], 'data', ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
return 1
"#;

/// Read and delete a record
pub const TAKE_RECORD: &str = r#"
local data = redis.call('HGET', KEYS[1], 'data')
if not data then
    return false
end
redis.call('DEL', KEYS[1])
return data
"#;

/// Remove the earliest due member of a sorted set and take its record
pub const POP_DUE: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
    return false
end
local id = ids[1]
redis.call('ZREM', KEYS[1], id)
local record = ARGV[2] .. id
local data = redis.call('HGET', record, 'data')
if not data then
    return {id}
end
redis.call('DEL', record)
return {id, data}
"#;

/// Add a member to an aggregation group, arming the timer on the first one
pub const GROUP_ADD: &str = r#"
if redis.call('EXISTS', KEYS[3]) == 1 then
    return 0
end
redis.call('HSET', KEYS[3], 'data', ARGV[2])
local size = redis.call('RPUSH', KEYS[1], ARGV[1])
if size == 1 then
    redis.call('SET', KEYS[2], '1', 'PX', ARGV[4])
end
if size >= tonumber(ARGV[3]) then
    return 2
end
return 1
"#;

/// Read all group members and clear the group
pub const GROUP_DRAIN: &str = r#"
local ids = redis.call('LRANGE', KEYS[1], 0, -1)
redis.call('DEL', KEYS[1], KEYS[2])
return ids
"#;

/// Add weights to credit counters in one step
pub const INCREMENT_CREDITS: &str = r#"
local values = {}
for i = 1, #ARGV, 2 do
    values[#values + 1] = redis.call('HINCRBY', KEYS[1], ARGV[i], ARGV[i + 1])
end
return values
"#;

/// Lua source of a script
pub fn source(script: Script) -> &'static str {
    match script {
        Script::Enqueue => ENQUEUE,
        Script::EnqueueDedup => ENQUEUE_DEDUP,
        Script::EnqueueScheduled => ENQUEUE_SCHEDULED,
        Script::TakeRecord => TAKE_RECORD,
        Script::PopDue => POP_DUE,
        Script::GroupAdd => GROUP_ADD,
        Script::GroupDrain => GROUP_DRAIN,
        Script::IncrementCredits => INCREMENT_CREDITS,
    }
}
