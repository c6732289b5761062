//! Per-Tenant Rate Limiting
//!
//! One token bucket per user id. Each admission check refills the bucket
//! from elapsed time and then consumes a single token; an empty bucket
//! rejects the request with 429. Buckets are created on a tenant's first
//! request and swept once they have been idle long enough.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Burst capacity of a fresh bucket.
pub const BUCKET_CAPACITY: f64 = 10.0;

/// Sustained rate: 100 requests per minute.
pub const REFILL_PER_SECOND: f64 = 100.0 / 60.0;

/// A bucket untouched for this long is eligible for the sweep.
pub(crate) const IDLE_EXPIRY: Duration = Duration::from_secs(600);

pub(crate) const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_second: f64,
    last_refill: Instant,
    last_used: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_second: f64) -> Self {
        let now = Instant::now();
        Self {
            tokens: capacity,
            capacity,
            refill_per_second,
            last_refill: now,
            last_used: now,
        }
    }

    /// Refill from elapsed time, then try to consume one token.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
        self.last_used = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return true;
        }
        false
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_used)
    }
}

/// Bucket collection keyed by user id. The shard lock of the map doubles as
/// the per-bucket lock: an admission check holds its entry for the whole
/// refill-then-consume step, so the check is atomic per user.
pub struct RateLimiterStore {
    buckets: DashMap<i64, TokenBucket>,
}

impl RateLimiterStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Admission check for one request from `user_id`.
    pub fn allow(&self, user_id: i64) -> bool {
        let mut bucket = self
            .buckets
            .entry(user_id)
            .or_insert_with(|| TokenBucket::new(BUCKET_CAPACITY, REFILL_PER_SECOND));
        bucket.allow()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drops buckets idle for longer than `max_idle`, returning how many
    /// were removed. A tenant seen again later simply gets a fresh bucket.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.idle_for(now) <= max_idle);
        before - self.buckets.len()
    }
}
