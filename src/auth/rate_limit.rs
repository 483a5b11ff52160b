//! Identity-independent throttling of raw authentication attempts.
//!
//! Counters are memory-resident and windowed per device and per source
//! address. Slight over- or under-counting under extreme concurrency is
//! acceptable; this is a throttle, not a security boundary, so the map sits
//! behind a plain mutex with short critical sections. State resets on
//! restart by design.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

// Bound the bucket map before pruning stale windows.
const MAX_BUCKETS: usize = 10_000;

#[derive(Clone, Copy, Debug)]
pub struct RateLimitPolicy {
    /// Attempts allowed per device per window.
    pub device_attempts: u32,
    /// Attempts allowed per source address per window.
    pub addr_attempts: u32,
    pub window: Duration,
}

#[derive(Clone, Copy, Debug)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
enum BucketKey {
    Device(String),
    Addr(String),
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    buckets: Mutex<HashMap<BucketKey, Window>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Count an attempt against both scopes. Returns `None` when allowed, or
    /// a uniform retry-after when throttled; callers must not reveal whether
    /// the device or the address tripped the limit.
    pub fn check(
        &self,
        device_id: &str,
        source_addr: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if buckets.len() > MAX_BUCKETS {
            let window = self.policy.window;
            buckets.retain(|_, bucket| now - bucket.started_at < window);
        }

        let mut scopes = vec![(
            BucketKey::Device(device_id.to_string()),
            self.policy.device_attempts,
        )];
        if let Some(addr) = source_addr {
            scopes.push((BucketKey::Addr(addr.to_string()), self.policy.addr_attempts));
        }

        let mut denied: Option<Duration> = None;
        for (key, limit) in scopes {
            let bucket = buckets.entry(key).or_insert(Window {
                started_at: now,
                count: 0,
            });
            if now - bucket.started_at >= self.policy.window {
                bucket.started_at = now;
                bucket.count = 0;
            }
            bucket.count = bucket.count.saturating_add(1);
            if bucket.count > limit {
                let retry = bucket.started_at + self.policy.window - now;
                denied = Some(denied.map_or(retry, |current| current.max(retry)));
            }
        }
        denied
    }
}
