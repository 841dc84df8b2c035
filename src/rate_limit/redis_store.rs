//! Redis-backed counters.

use async_trait::async_trait;
use redis::{AsyncCommands, Script, aio::ConnectionManager as RedisConnection};

use crate::{rate_limit::RateLimitStore, repos::StoreError};

/// Increment a counter only while it is below the limit.
const INCR_BELOW_LIMIT_LUA: &str = r#"
    -- Arguments:
    --  1. The maximum count allowed in the window
    --  2. The TTL of the counter, in seconds
    local limit = tonumber(ARGV[1])
    local ttl   = tonumber(ARGV[2])

    local current = tonumber(redis.call("GET", KEYS[1]) or "0")
    if current >= limit then
        return -1
    end

    local updated = redis.call("INCR", KEYS[1])

    -- Set the TTL on first touch
    if updated == 1 then
        redis.call("EXPIRE", KEYS[1], ttl)
    end

    return updated
"#;

#[derive(Clone)]
pub struct RedisRateLimitStore {
    redis: RedisConnection,
    script: Script,
}

impl RedisRateLimitStore {
    pub fn new(conn: RedisConnection) -> Self {
        Self {
            redis: conn,
            script: Script::new(INCR_BELOW_LIMIT_LUA),
        }
    }

    fn redis(&self) -> RedisConnection {
        self.redis.clone()
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn try_acquire(
        &self,
        bucket: &str,
        limit: u64,
        ttl_secs: u64,
    ) -> Result<Option<u64>, StoreError> {
        let mut invocation = self.script.key(bucket);
        invocation.arg(limit).arg(ttl_secs);

        let count: i64 = self.redis().invoke_script(&invocation).await?;
        Ok(u64::try_from(count).ok())
    }

    async fn current(&self, bucket: &str) -> Result<u64, StoreError> {
        let count: Option<u64> = self.redis().get(bucket).await?;
        Ok(count.unwrap_or(0))
    }
}
