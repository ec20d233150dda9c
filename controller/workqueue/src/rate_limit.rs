use ahash::AHashMap as HashMap;
use std::{hash::Hash, time::Duration};
use tokio::time::Instant;

/// Per-key exponential backoff.
#[derive(Debug)]
pub struct Backoff<K> {
    base: Duration,
    max: Duration,
    failures: HashMap<K, u32>,
}

/// A token bucket shared by all keys.
#[derive(Debug)]
pub struct TokenBucket {
    qps: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

/// Combines [`Backoff`] and [`TokenBucket`], yielding whichever delay is
/// longer.
#[derive(Debug)]
pub struct RateLimiter<K> {
    backoff: Backoff<K>,
    bucket: TokenBucket,
}

// === impl Backoff ===

impl<K: Hash + Eq> Backoff<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::default(),
        }
    }

    /// Records a failure of `key` and returns how long it should wait before
    /// being retried.
    pub fn when(&mut self, key: K) -> Duration {
        let failures = self.failures.entry(key).or_default();
        let exp = *failures;
        *failures = failures.saturating_add(1);

        2u32.checked_pow(exp)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }

    pub fn failures(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}

// === impl TokenBucket ===

impl TokenBucket {
    pub fn new(qps: f64, burst: u32) -> Self {
        Self {
            qps,
            burst: burst as f64,
            tokens: burst as f64,
            last: Instant::now(),
        }
    }

    /// Takes a token, returning how long the caller must wait for it to
    /// become available.
    pub fn reserve(&mut self) -> Duration {
        self.reserve_at(Instant::now())
    }

    fn reserve_at(&mut self, now: Instant) -> Duration {
        if now > self.last {
            let refill = (now - self.last).as_secs_f64() * self.qps;
            self.tokens = (self.tokens + refill).min(self.burst);
            self.last = now;
        }

        self.tokens -= 1.0;
        if self.tokens >= 0.0 || self.qps <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(-self.tokens / self.qps)
    }
}

// === impl RateLimiter ===

impl<K: Hash + Eq> RateLimiter<K> {
    pub fn new(config: &crate::Config) -> Self {
        Self {
            backoff: Backoff::new(config.base_delay, config.max_delay),
            bucket: TokenBucket::new(config.qps, config.burst),
        }
    }

    pub fn when(&mut self, key: K) -> Duration {
        let backoff = self.backoff.when(key);
        let bucket = self.bucket.reserve();
        backoff.max(bucket)
    }

    pub fn forget(&mut self, key: &K) {
        self.backoff.forget(key);
    }

    pub fn failures(&self, key: &K) -> u32 {
        self.backoff.failures(key)
    }
}
