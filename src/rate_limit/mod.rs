//! Per-key, per-minute request counters.
//!
//! Counters are keyed by API key id and the UTC minute of the request, so a
//! new minute starts from zero without any reset job. Each counter expires
//! `WINDOW_SECS` after its first increment.
//!
//! Two stores exist: `RedisRateLimitStore`, shared by every replica, and
//! `MemoryRateLimitStore`, used when no Redis URL is configured and in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::repos::StoreError;

mod memory_store;
mod redis_store;

pub use memory_store::MemoryRateLimitStore;
pub use redis_store::RedisRateLimitStore;

/// Counter key prefix
const RATE_LIMIT_KEY_PREFIX: &str = "api_rate_limit";

/// Length of a rate-limit window, and the counter TTL
pub const WINDOW_SECS: u64 = 60;

/// Counter key of `key_id` for the minute containing `now`.
pub fn bucket_key(key_id: Uuid, now: DateTime<Utc>) -> String {
    format!(
        "{RATE_LIMIT_KEY_PREFIX}:{key_id}:{}",
        now.format("%Y-%m-%d-%H-%M")
    )
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increment `bucket` unless it already reached `limit`.
    ///
    /// Returns the new count when admitted, `None` when the limit was
    /// already reached. The check and the increment are one atomic step;
    /// the TTL is set on the first increment only.
    async fn try_acquire(
        &self,
        bucket: &str,
        limit: u64,
        ttl_secs: u64,
    ) -> Result<Option<u64>, StoreError>;

    /// Current count of `bucket`, zero when absent or expired.
    async fn current(&self, bucket: &str) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bucket_key_uses_utc_minute() {
        let id = Uuid::nil();
        let at = Utc.with_ymd_and_hms(2025, 8, 1, 9, 5, 59).unwrap();
        assert_eq!(
            bucket_key(id, at),
            "api_rate_limit:00000000-0000-0000-0000-000000000000:2025-08-01-09-05"
        );

        let next = Utc.with_ymd_and_hms(2025, 8, 1, 9, 6, 0).unwrap();
        assert_ne!(bucket_key(id, at), bucket_key(id, next));
    }
}
