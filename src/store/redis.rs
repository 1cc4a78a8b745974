use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::{JobCounts, JobStore, Lease, StoreError};
use crate::models::job::{JobId, JobOptions, JobRecord, JobState, ReceiptJob};

// Every script takes the key prefix as ARGV[1] and derives per-job keys
// from it. The waiting set is scored `priority * 2^32 + id`.

const ADD: &str = r#"
local p = ARGV[1]
local id = redis.call('INCR', p .. ':id')
redis.call('HSET', p .. ':job:' .. id,
  'data', ARGV[2], 'opts', ARGV[3], 'priority', ARGV[4],
  'state', 'waiting', 'progress', 0, 'attempts_made', 0, 'created_at', ARGV[5])
redis.call('ZADD', p .. ':wait', tonumber(ARGV[4]) * 4294967296 + id, id)
return tostring(id)
"#;

const LEASE: &str = r#"
local p = ARGV[1]
local popped = redis.call('ZPOPMIN', p .. ':wait')
if #popped == 0 then return false end
local id = popped[1]
local key = p .. ':job:' .. id
redis.call('ZADD', p .. ':active', ARGV[3], id)
redis.call('HSET', key, 'state', 'active', 'progress', 0, 'lock', ARGV[4], 'processed_at', ARGV[2])
redis.call('HINCRBY', key, 'attempts_made', 1)
return id
"#;

const PROGRESS: &str = r#"
local p = ARGV[1]
local key = p .. ':job:' .. ARGV[2]
if redis.call('HGET', key, 'lock') ~= ARGV[3] then return 0 end
redis.call('HSET', key, 'progress', ARGV[4])
redis.call('ZADD', p .. ':active', ARGV[5], ARGV[2])
return 1
"#;

const COMPLETE: &str = r#"
local p = ARGV[1]
local key = p .. ':job:' .. ARGV[2]
if redis.call('HGET', key, 'lock') ~= ARGV[3] then return 0 end
redis.call('ZREM', p .. ':active', ARGV[2])
if ARGV[5] == '1' then
  redis.call('DEL', key)
else
  redis.call('HSET', key, 'state', 'completed', 'finished_at', ARGV[4])
  redis.call('HDEL', key, 'lock')
  redis.call('ZADD', p .. ':completed', ARGV[4], ARGV[2])
end
return 1
"#;

const RETRY: &str = r#"
local p = ARGV[1]
local key = p .. ':job:' .. ARGV[2]
if redis.call('HGET', key, 'lock') ~= ARGV[3] then return 0 end
redis.call('ZREM', p .. ':active', ARGV[2])
redis.call('HSET', key, 'state', 'delayed', 'failed_reason', ARGV[4])
redis.call('HDEL', key, 'lock')
redis.call('ZADD', p .. ':delayed', ARGV[5], ARGV[2])
return 1
"#;

const FAIL: &str = r#"
local p = ARGV[1]
local key = p .. ':job:' .. ARGV[2]
if redis.call('HGET', key, 'lock') ~= ARGV[3] then return 0 end
redis.call('ZREM', p .. ':active', ARGV[2])
if ARGV[6] == '1' then
  redis.call('DEL', key)
else
  redis.call('HSET', key, 'state', 'failed', 'failed_reason', ARGV[4], 'finished_at', ARGV[5])
  redis.call('HDEL', key, 'lock')
  redis.call('ZADD', p .. ':failed', ARGV[5], ARGV[2])
end
return 1
"#;

const PROMOTE: &str = r#"
local p = ARGV[1]
local due = redis.call('ZRANGEBYSCORE', p .. ':delayed', '-inf', ARGV[2])
for _, id in ipairs(due) do
  local key = p .. ':job:' .. id
  redis.call('ZREM', p .. ':delayed', id)
  redis.call('HSET', key, 'state', 'waiting')
  local priority = tonumber(redis.call('HGET', key, 'priority') or '1')
  redis.call('ZADD', p .. ':wait', priority * 4294967296 + tonumber(id), id)
end
return #due
"#;

const RECOVER: &str = r#"
local p = ARGV[1]
local stalled = redis.call('ZRANGEBYSCORE', p .. ':active', '-inf', ARGV[2])
for _, id in ipairs(stalled) do
  local key = p .. ':job:' .. id
  redis.call('ZREM', p .. ':active', id)
  redis.call('HSET', key, 'state', 'waiting')
  redis.call('HDEL', key, 'lock')
  if tonumber(redis.call('HGET', key, 'attempts_made') or '0') > 0 then
    redis.call('HINCRBY', key, 'attempts_made', -1)
  end
  local priority = tonumber(redis.call('HGET', key, 'priority') or '1')
  redis.call('ZADD', p .. ':wait', priority * 4294967296 + tonumber(id), id)
end
return stalled
"#;

struct Scripts {
    add: Script,
    lease: Script,
    progress: Script,
    complete: Script,
    retry: Script,
    fail: Script,
    promote: Script,
    recover: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            add: Script::new(ADD),
            lease: Script::new(LEASE),
            progress: Script::new(PROGRESS),
            complete: Script::new(COMPLETE),
            retry: Script::new(RETRY),
            fail: Script::new(FAIL),
            promote: Script::new(PROMOTE),
            recover: Script::new(RECOVER),
        }
    }
}

/// Redis-backed job store. One hash per job plus a sorted set per state.
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    prefix: String,
    scripts: Scripts,
}

impl RedisJobStore {
    /// Open a multiplexed connection to `redis_url`; keys live under `queue_name`.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            prefix: queue_name.to_string(),
            scripts: Scripts::load(),
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn held(lease: &Lease, updated: i32) -> Result<(), StoreError> {
        if updated == 1 {
            Ok(())
        } else {
            Err(StoreError::LeaseLost(lease.record.id.clone()))
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn after_ms(delay: Duration) -> i64 {
    now_ms() + i64::try_from(delay.as_millis()).unwrap_or(i64::MAX / 2)
}

/// Rebuild a [`JobRecord`] from the fields of a job hash.
fn parse_record(id: &str, mut fields: HashMap<String, String>) -> Result<JobRecord, StoreError> {
    let corrupt = |reason: &str| StoreError::Corrupt {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let data: ReceiptJob =
        serde_json::from_str(&fields.remove("data").ok_or_else(|| corrupt("missing data"))?)?;
    let options: JobOptions =
        serde_json::from_str(&fields.remove("opts").ok_or_else(|| corrupt("missing opts"))?)?;
    let state = fields
        .get("state")
        .and_then(|s| JobState::from_str(s).ok())
        .ok_or_else(|| corrupt("bad state"))?;

    let int = |name: &str| fields.get(name).and_then(|v| v.parse::<i64>().ok());

    Ok(JobRecord {
        id: id.to_string(),
        data,
        options,
        state,
        progress: int("progress").unwrap_or(0).clamp(0, 100) as u8,
        attempts_made: int("attempts_made").unwrap_or(0).max(0) as u32,
        failed_reason: fields.get("failed_reason").cloned(),
        created_at: int("created_at").unwrap_or(0),
        processed_at: int("processed_at"),
        finished_at: int("finished_at"),
    })
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn add(&self, data: ReceiptJob, options: JobOptions) -> Result<JobId, StoreError> {
        let mut conn = self.conn.clone();
        let id: String = self
            .scripts
            .add
            .arg(&self.prefix)
            .arg(serde_json::to_string(&data)?)
            .arg(serde_json::to_string(&options)?)
            .arg(options.priority)
            .arg(now_ms())
            .invoke_async(&mut conn)
            .await?;
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.key(&format!("job:{id}"))).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        parse_record(id, fields).map(Some)
    }

    async fn lease(&self, lease_for: Duration) -> Result<Option<Lease>, StoreError> {
        let mut conn = self.conn.clone();
        let token = Uuid::new_v4().to_string();
        let id: Option<String> = self
            .scripts
            .lease
            .arg(&self.prefix)
            .arg(now_ms())
            .arg(after_ms(lease_for))
            .arg(&token)
            .invoke_async(&mut conn)
            .await?;

        let Some(id) = id else {
            return Ok(None);
        };
        match self.get(&id).await? {
            Some(record) => Ok(Some(Lease { record, token })),
            None => Err(StoreError::Corrupt {
                id,
                reason: "leased job has no record".to_string(),
            }),
        }
    }

    async fn progress(
        &self,
        lease: &Lease,
        progress: u8,
        lease_for: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let updated: i32 = self
            .scripts
            .progress
            .arg(&self.prefix)
            .arg(lease.id())
            .arg(&lease.token)
            .arg(u32::from(progress.min(100)))
            .arg(after_ms(lease_for))
            .invoke_async(&mut conn)
            .await?;
        Self::held(lease, updated)
    }

    async fn complete(&self, lease: &Lease) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let updated: i32 = self
            .scripts
            .complete
            .arg(&self.prefix)
            .arg(lease.id())
            .arg(&lease.token)
            .arg(now_ms())
            .arg(if lease.record.options.remove_on_complete { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        Self::held(lease, updated)
    }

    async fn retry_later(
        &self,
        lease: &Lease,
        reason: &str,
        delay: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let updated: i32 = self
            .scripts
            .retry
            .arg(&self.prefix)
            .arg(lease.id())
            .arg(&lease.token)
            .arg(reason)
            .arg(after_ms(delay))
            .invoke_async(&mut conn)
            .await?;
        Self::held(lease, updated)
    }

    async fn fail(&self, lease: &Lease, reason: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let updated: i32 = self
            .scripts
            .fail
            .arg(&self.prefix)
            .arg(lease.id())
            .arg(&lease.token)
            .arg(reason)
            .arg(now_ms())
            .arg(if lease.record.options.remove_on_fail { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        Self::held(lease, updated)
    }

    async fn promote_delayed(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let promoted: usize = self
            .scripts
            .promote
            .arg(&self.prefix)
            .arg(now_ms())
            .invoke_async(&mut conn)
            .await?;
        Ok(promoted)
    }

    async fn recover_stalled(&self) -> Result<Vec<JobId>, StoreError> {
        let mut conn = self.conn.clone();
        let stalled: Vec<String> = self
            .scripts
            .recover
            .arg(&self.prefix)
            .arg(now_ms())
            .invoke_async(&mut conn)
            .await?;
        Ok(stalled)
    }

    async fn counts(&self) -> Result<JobCounts, StoreError> {
        let mut conn = self.conn.clone();
        let (waiting, delayed, active, completed, failed): (u64, u64, u64, u64, u64) =
            redis::pipe()
                .zcard(self.key("wait"))
                .zcard(self.key("delayed"))
                .zcard(self.key("active"))
                .zcard(self.key("completed"))
                .zcard(self.key("failed"))
                .query_async(&mut conn)
                .await?;
        Ok(JobCounts {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const DATA: &str =
        r#"{"receiptId":"r1","userId":"u1","imageUrl":"https://x/1.jpg","imagePath":"/tmp/1.jpg"}"#;

    #[test]
    fn test_parse_record_reads_hash_fields() {
        let opts = serde_json::to_string(&JobOptions::default()).unwrap();
        let record = parse_record(
            "7",
            fields(&[
                ("data", DATA),
                ("opts", &opts),
                ("state", "delayed"),
                ("progress", "40"),
                ("attempts_made", "2"),
                ("failed_reason", "OCR timeout"),
                ("created_at", "1700000000000"),
            ]),
        )
        .unwrap();

        assert_eq!(record.id, "7");
        assert_eq!(record.data.receipt_id, "r1");
        assert_eq!(record.state, JobState::Delayed);
        assert_eq!(record.progress, 40);
        assert_eq!(record.attempts_made, 2);
        assert_eq!(record.failed_reason.as_deref(), Some("OCR timeout"));
        assert_eq!(record.processed_at, None);
    }

    #[test]
    fn test_parse_record_rejects_missing_payload() {
        let err = parse_record("7", fields(&[("state", "waiting")])).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
