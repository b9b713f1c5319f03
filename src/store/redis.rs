use crate::config::RedisConfig;
use crate::store::{CounterStore, StoreError, WindowCounts};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, Script};
use std::time::Duration;
use tokio::time::timeout;

/// Atomic prune/count/record/expire over both keys. Counting happens before
/// the inserts, so the returned counts exclude the request being recorded.
/// The member string carries microseconds from TIME so that concurrent
/// arrivals within the same second stay distinct entries.
const RECORD_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window_start = tonumber(ARGV[2])
local window_seconds = tonumber(ARGV[3])

local counts = {}
for i = 1, 2 do
    -- Remove entries outside the sliding window
    redis.call('ZREMRANGEBYSCORE', KEYS[i], '-inf', window_start)

    -- Count current entries
    counts[i] = redis.call('ZCARD', KEYS[i])
end

local time = redis.call('TIME')
local member = now .. ':' .. time[1] .. ':' .. time[2]
for i = 1, 2 do
    -- Add new entry with the request timestamp as score
    redis.call('ZADD', KEYS[i], now, member)

    -- Idle keys vanish one window after their last write
    redis.call('EXPIRE', KEYS[i], window_seconds)
end

return counts
"#;

/// Create a Redis client and connection manager
pub async fn create_client(config: &RedisConfig) -> crate::errors::Result<ConnectionManager> {
    tracing::info!("Creating Redis client");

    let client = Client::open(config.url.as_str())?;

    let manager = ConnectionManager::new(client).await?;

    tracing::info!("Redis client connected");

    Ok(manager)
}

/// Health check for Redis connection
pub async fn health_check(manager: &mut ConnectionManager) -> crate::errors::Result<()> {
    let _: String = redis::cmd("PING").query_async(manager).await?;
    Ok(())
}

/// Sliding-window counter store backed by Redis sorted sets
pub struct RedisStore {
    manager: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    pub fn new(manager: ConnectionManager, op_timeout: Duration) -> Self {
        Self {
            manager,
            op_timeout,
        }
    }

    fn timeout_millis(&self) -> u64 {
        self.op_timeout.as_millis() as u64
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn record(
        &self,
        subject_key: &str,
        endpoint_key: &str,
        now: u64,
        window_seconds: u64,
    ) -> Result<WindowCounts, StoreError> {
        let window_start = now.saturating_sub(window_seconds);
        let script = Script::new(RECORD_SCRIPT);
        let mut conn = self.manager.clone();

        let mut invocation = script.key(subject_key);
        invocation
            .key(endpoint_key)
            .arg(now)
            .arg(window_start)
            .arg(window_seconds);
        let call = invocation.invoke_async(&mut conn);

        let counts: Vec<u64> = timeout(self.op_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout_millis()))??;

        parse_counts(&counts)
    }

    async fn observe(
        &self,
        subject_key: &str,
        endpoint_key: &str,
        now: u64,
        window_seconds: u64,
    ) -> Result<WindowCounts, StoreError> {
        let window_start = now.saturating_sub(window_seconds);
        let mut conn = self.manager.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(subject_key)
            .arg("-inf")
            .arg(window_start)
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(endpoint_key)
            .arg("-inf")
            .arg(window_start)
            .ignore()
            .cmd("ZCARD")
            .arg(subject_key)
            .cmd("ZCARD")
            .arg(endpoint_key);

        let call = pipe.query_async(&mut conn);
        let (subject, endpoint): (u64, u64) = timeout(self.op_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout_millis()))??;

        Ok(WindowCounts { subject, endpoint })
    }
}

fn parse_counts(values: &[u64]) -> Result<WindowCounts, StoreError> {
    match values {
        [subject, endpoint] => Ok(WindowCounts {
            subject: *subject,
            endpoint: *endpoint,
        }),
        other => Err(StoreError::MalformedResponse(format!(
            "expected 2 counts, got {}",
            other.len()
        ))),
    }
}
