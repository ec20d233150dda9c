use crate::{metrics::QueueMetrics, rate_limit::RateLimiter, Config};
use ahash::AHashSet as HashSet;
use parking_lot::Mutex;
use std::{collections::VecDeque, fmt, hash::Hash, sync::Arc, time::Duration};
use tokio::sync::Notify;
use tracing::trace;

/// A deduplicating queue of keys awaiting reconciliation.
///
/// Cloning the queue produces another handle to the same queue.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

struct Inner<K> {
    state: Mutex<State<K>>,
    limiter: Mutex<RateLimiter<K>>,
    notify: Notify,
    metrics: QueueMetrics,
}

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

// === impl WorkQueue ===

impl<K> WorkQueue<K>
where
    K: Clone + Hash + Eq + fmt::Debug + Send + Sync + 'static,
{
    pub fn new(config: &Config, metrics: QueueMetrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::default(),
                    processing: HashSet::default(),
                    shutting_down: false,
                }),
                limiter: Mutex::new(RateLimiter::new(config)),
                notify: Notify::new(),
                metrics,
            }),
        }
    }

    /// Schedules `key` for processing.
    ///
    /// A key that is already queued is not queued again. A key that is being
    /// processed is redelivered after it is marked done.
    pub fn enqueue(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(key.clone()) {
            trace!(?key, "Already pending");
            return;
        }
        self.inner.metrics.add();
        if state.processing.contains(&key) {
            trace!(?key, "Processing; marked dirty");
            return;
        }
        state.queue.push_back(key);
        self.inner.metrics.set_depth(state.queue.len());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Waits for the next key to process.
    ///
    /// Returns `None` once the queue has been shut down. Keys still waiting in
    /// the queue at that point are abandoned.
    pub async fn dequeue(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    self.inner.metrics.set_depth(state.queue.len());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Completes processing of `key` and clears its failure history.
    pub fn mark_done(&self, key: &K) {
        self.inner.limiter.lock().forget(key);
        self.done(key);
    }

    /// Completes processing of `key` and schedules it to be enqueued again
    /// after its rate-limited delay.
    pub fn mark_done_and_retry(&self, key: K) -> Duration {
        let delay = self.inner.limiter.lock().when(key.clone());
        self.done(&key);
        self.inner.metrics.retry();

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
        delay
    }

    /// Stops handing out keys and wakes all waiting workers.
    pub fn shutdown(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// The number of keys waiting to be processed.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of times `key` has failed since it last succeeded.
    pub fn failures(&self, key: &K) -> u32 {
        self.inner.limiter.lock().failures(key)
    }

    pub(crate) fn metrics(&self) -> &QueueMetrics {
        &self.inner.metrics
    }

    fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            self.inner.metrics.set_depth(state.queue.len());
            drop(state);
            self.inner.notify.notify_one();
        }
    }
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue").finish_non_exhaustive()
    }
}
