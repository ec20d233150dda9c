use super::*;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    time,
};

fn mk_queue() -> WorkQueue<&'static str> {
    WorkQueue::new(&Config::default(), QueueMetrics::default())
}

/// Records every key it is asked to reconcile. The first reconciliation blocks
/// until the gate is opened.
struct Gated {
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    calls: mpsc::UnboundedSender<&'static str>,
}

#[async_trait::async_trait]
impl Reconcile<&'static str> for Gated {
    async fn reconcile(&self, key: &&'static str) -> anyhow::Result<()> {
        let _ = self.calls.send(*key);
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(())
    }
}

/// Fails the first `failures` reconciliations.
struct Flaky {
    failures: Mutex<usize>,
    calls: mpsc::UnboundedSender<&'static str>,
}

#[async_trait::async_trait]
impl Reconcile<&'static str> for Flaky {
    async fn reconcile(&self, key: &&'static str) -> anyhow::Result<()> {
        let _ = self.calls.send(*key);
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            anyhow::bail!("transient failure");
        }
        Ok(())
    }
}

#[tokio::test]
async fn coalesces_pending_keys() {
    let queue = mk_queue();
    queue.enqueue("a");
    queue.enqueue("a");
    queue.enqueue("b");
    queue.enqueue("a");
    assert_eq!(queue.len(), 2);

    assert_eq!(queue.dequeue().await, Some("a"));
    assert_eq!(queue.dequeue().await, Some("b"));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn redelivers_keys_enqueued_while_processing() {
    let queue = mk_queue();
    queue.enqueue("a");
    let key = queue.dequeue().await.unwrap();

    // The key is in flight, so it is held back rather than queued.
    queue.enqueue("a");
    queue.enqueue("a");
    assert!(queue.is_empty());

    queue.mark_done(&key);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.dequeue().await, Some("a"));
    queue.mark_done(&"a");
    assert!(queue.is_empty());
}

#[tokio::test]
async fn dequeue_waits_for_work() {
    let queue = mk_queue();
    let mut next = tokio_test::task::spawn({
        let queue = queue.clone();
        async move { queue.dequeue().await }
    });
    tokio_test::assert_pending!(next.poll());

    queue.enqueue("a");
    assert!(next.is_woken());
    assert_eq!(tokio_test::assert_ready!(next.poll()), Some("a"));
}

#[tokio::test]
async fn shutdown_wakes_waiting_workers() {
    let queue = mk_queue();
    let waiting = tokio::spawn({
        let queue = queue.clone();
        async move { queue.dequeue().await }
    });
    tokio::task::yield_now().await;

    queue.shutdown();
    let next = time::timeout(time::Duration::from_secs(1), waiting)
        .await
        .expect("worker must be woken")
        .unwrap();
    assert_eq!(next, None);

    // Keys are no longer accepted or handed out.
    queue.enqueue("a");
    assert!(queue.is_shutting_down());
    assert_eq!(queue.dequeue().await, None);
}

#[tokio::test(start_paused = true)]
async fn failed_keys_are_retried_with_backoff() {
    let queue = mk_queue();
    queue.enqueue("a");
    let key = queue.dequeue().await.unwrap();

    let delay = queue.mark_done_and_retry(key);
    assert_eq!(delay, time::Duration::from_millis(5));
    assert!(queue.is_empty());

    time::sleep(time::Duration::from_millis(6)).await;
    assert_eq!(queue.len(), 1);

    let key = queue.dequeue().await.unwrap();
    assert_eq!(
        queue.mark_done_and_retry(key),
        time::Duration::from_millis(10)
    );
    time::sleep(time::Duration::from_millis(11)).await;

    // Success resets the backoff.
    let key = queue.dequeue().await.unwrap();
    assert_eq!(queue.failures(&key), 2);
    queue.mark_done(&key);
    assert_eq!(queue.failures(&"a"), 0);
}

#[test]
fn backoff_doubles_up_to_the_cap() {
    let mut backoff = Backoff::new(
        time::Duration::from_millis(5),
        time::Duration::from_millis(30),
    );
    let delays = (0..5).map(|_| backoff.when("a")).collect::<Vec<_>>();
    assert_eq!(
        delays,
        [5, 10, 20, 30, 30].map(time::Duration::from_millis).to_vec()
    );

    // Keys back off independently.
    assert_eq!(backoff.when("b"), time::Duration::from_millis(5));

    backoff.forget(&"a");
    assert_eq!(backoff.when("a"), time::Duration::from_millis(5));
}

#[test]
fn backoff_saturates_at_the_cap() {
    let mut backoff = Backoff::new(
        time::Duration::from_millis(5),
        time::Duration::from_secs(1000),
    );
    let last = (0..100).map(|_| backoff.when("a")).last().unwrap();
    assert_eq!(last, time::Duration::from_secs(1000));
}

#[tokio::test(start_paused = true)]
async fn token_bucket_limits_bursts() {
    let mut bucket = TokenBucket::new(1.0, 2);
    assert_eq!(bucket.reserve(), time::Duration::ZERO);
    assert_eq!(bucket.reserve(), time::Duration::ZERO);
    assert_eq!(bucket.reserve(), time::Duration::from_secs(1));
    assert_eq!(bucket.reserve(), time::Duration::from_secs(2));

    // Tokens refill over time.
    time::advance(time::Duration::from_secs(3)).await;
    assert_eq!(bucket.reserve(), time::Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn rate_limiter_takes_the_longer_delay() {
    let config = Config {
        qps: 1.0,
        burst: 1,
        ..Config::default()
    };
    let mut limiter = RateLimiter::new(&config);
    assert_eq!(limiter.when("a"), time::Duration::from_millis(5));
    // The bucket is now empty, so it dominates the per-key backoff.
    assert_eq!(limiter.when("b"), time::Duration::from_secs(1));
}

#[tokio::test]
async fn one_key_is_never_processed_concurrently() {
    let queue = mk_queue();
    let (release_tx, release_rx) = oneshot::channel();
    let (calls_tx, mut calls_rx) = mpsc::unbounded_channel();
    let reconciler = Arc::new(Gated {
        gate: Mutex::new(Some(release_rx)),
        calls: calls_tx,
    });
    let (signal, drain) = drain::channel();
    let workers = tokio::spawn(run(queue.clone(), reconciler, 2, drain));

    queue.enqueue("a");
    assert_eq!(
        time::timeout(time::Duration::from_secs(1), calls_rx.recv()).await,
        Ok(Some("a"))
    );

    for _ in 0..5 {
        queue.enqueue("a");
    }
    assert!(
        time::timeout(time::Duration::from_millis(50), calls_rx.recv())
            .await
            .is_err(),
        "no second reconciliation may start while the first is in flight"
    );

    release_tx.send(()).unwrap();
    assert_eq!(
        time::timeout(time::Duration::from_secs(1), calls_rx.recv()).await,
        Ok(Some("a"))
    );
    assert!(
        time::timeout(time::Duration::from_millis(50), calls_rx.recv())
            .await
            .is_err(),
        "repeated enqueues coalesce into a single reconciliation"
    );

    signal.drain().await;
    workers.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn workers_retry_failures() {
    let queue = mk_queue();
    let (calls_tx, mut calls_rx) = mpsc::unbounded_channel();
    let reconciler = Arc::new(Flaky {
        failures: Mutex::new(2),
        calls: calls_tx,
    });
    let (signal, drain) = drain::channel();
    let workers = tokio::spawn(run(queue.clone(), reconciler, 1, drain));

    queue.enqueue("a");
    for _ in 0..3 {
        assert_eq!(
            time::timeout(time::Duration::from_secs(1), calls_rx.recv()).await,
            Ok(Some("a"))
        );
    }
    assert!(
        time::timeout(time::Duration::from_secs(10), calls_rx.recv())
            .await
            .is_err()
    );

    signal.drain().await;
    workers.await.unwrap();
}
