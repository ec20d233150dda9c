use crate::WorkQueue;
use futures::future;
use std::{fmt, hash::Hash, sync::Arc};
use tracing::{debug, info, warn, Instrument};

/// Converges the state identified by a key.
#[async_trait::async_trait]
pub trait Reconcile<K>: Send + Sync + 'static {
    /// Processes `key`. An error schedules the key to be retried.
    async fn reconcile(&self, key: &K) -> anyhow::Result<()>;
}

/// Runs `workers` tasks that process keys from `queue` until `drain` is
/// signaled.
///
/// On shutdown the queue stops handing out keys; in-flight reconciliations
/// complete before the drain handle is released.
pub async fn run<K, R>(queue: WorkQueue<K>, reconciler: Arc<R>, workers: usize, drain: drain::Watch)
where
    K: Clone + Hash + Eq + fmt::Debug + Send + Sync + 'static,
    R: Reconcile<K>,
{
    let workers = (0..workers.max(1))
        .map(|id| {
            let queue = queue.clone();
            let reconciler = reconciler.clone();
            tokio::spawn(
                process(queue, reconciler).instrument(tracing::info_span!("worker", id)),
            )
        })
        .collect::<Vec<_>>();
    info!(workers = workers.len(), "Started workers");

    let handle = drain.signaled().await;
    debug!("Shutting down work queue");
    queue.shutdown();
    handle
        .release_after(future::join_all(workers))
        .await
        .into_iter()
        .filter_map(Result::err)
        .for_each(|error| warn!(%error, "Worker failed"));
}

async fn process<K, R>(queue: WorkQueue<K>, reconciler: Arc<R>)
where
    K: Clone + Hash + Eq + fmt::Debug + Send + Sync + 'static,
    R: Reconcile<K>,
{
    while let Some(key) = queue.dequeue().await {
        debug!(?key, "Processing");
        match reconciler.reconcile(&key).await {
            Ok(()) => {
                queue.metrics().processed(true);
                queue.mark_done(&key);
            }
            Err(error) => {
                queue.metrics().processed(false);
                let failures = queue.failures(&key);
                let delay = queue.mark_done_and_retry(key.clone());
                tracing::error!(?key, failures, ?delay, error = %format_args!("{error:#}"), "Failed to process; retrying");
            }
        }
    }
    debug!("Queue shut down");
}
