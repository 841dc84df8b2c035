//! Process-local counters.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;

use crate::{rate_limit::RateLimitStore, repos::StoreError};

/// Expired entries are swept once the map grows past this many buckets.
const SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: DateTime<Utc>,
}

/// Counters held in a `DashMap`; each entry update is atomic per bucket.
#[derive(Clone, Default)]
pub struct MemoryRateLimitStore {
    counters: Arc<DashMap<String, Counter>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep(&self, now: DateTime<Utc>) {
        if self.counters.len() > SWEEP_THRESHOLD {
            self.counters.retain(|_, c| c.expires_at > now);
        }
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn try_acquire(
        &self,
        bucket: &str,
        limit: u64,
        ttl_secs: u64,
    ) -> Result<Option<u64>, StoreError> {
        let now = Utc::now();
        self.sweep(now);

        let ttl = TimeDelta::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX));
        let mut entry = self.counters.entry(bucket.to_string()).or_insert(Counter {
            count: 0,
            expires_at: now + ttl,
        });

        if entry.expires_at <= now {
            *entry = Counter {
                count: 0,
                expires_at: now + ttl,
            };
        }
        if entry.count >= limit {
            return Ok(None);
        }
        entry.count += 1;
        Ok(Some(entry.count))
    }

    async fn current(&self, bucket: &str) -> Result<u64, StoreError> {
        let now = Utc::now();
        Ok(self
            .counters
            .get(bucket)
            .filter(|c| c.expires_at > now)
            .map_or(0, |c| c.count))
    }
}
