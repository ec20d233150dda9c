//! A rate-limited, deduplicating work queue and the worker pool that drains it.
//!
//! Keys move through `idle -> queued -> processing -> idle`. A key enqueued
//! while it is being processed is marked dirty and is queued again once its
//! current processing completes, so no key is ever processed by two workers at
//! once and no event is lost to coalescing.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod metrics;
mod queue;
mod rate_limit;
mod worker;

pub use self::{
    metrics::QueueMetrics,
    queue::WorkQueue,
    rate_limit::{Backoff, RateLimiter, TokenBucket},
    worker::{run, Reconcile},
};
use std::time::Duration;

/// Parameters for a work queue and its workers.
#[derive(Clone, Debug)]
pub struct Config {
    /// The number of workers that process keys concurrently.
    pub workers: usize,

    /// The delay before the first retry of a failed key.
    pub base_delay: Duration,

    /// The upper bound on a key's retry delay.
    pub max_delay: Duration,

    /// The rate at which retries are admitted across all keys.
    pub qps: f64,

    /// The number of retries that may be admitted at once.
    pub burst: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 2,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            qps: 50.0,
            burst: 300,
        }
    }
}

#[cfg(test)]
mod tests;
