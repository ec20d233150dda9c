use ahash::AHashMap as HashMap;
use futures::prelude::*;
use maestro_controller_core::{Resources, Snapshot, SnapshotStream, Version, Versions};
use parking_lot::{Mutex, RwLock};
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

pub type SharedSnapshotCache = Arc<SnapshotCache>;

type SnapshotTx = watch::Sender<Option<Arc<Snapshot>>>;

type Nodes = Arc<RwLock<HashMap<String, Mutex<SnapshotTx>>>>;

/// Holds the latest snapshot for each node and fans updates out to watchers.
///
/// Publishing never waits on watchers: each watcher observes the newest
/// snapshot when it next polls.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    versions: Versions,
    nodes: Nodes,
    metrics: SnapshotMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct SnapshotMetrics {
    published: Counter,
}

/// A watch on a single node's snapshots.
///
/// When dropped, the node's slot is released if nothing has been published
/// for it and no other watch remains.
#[derive(Debug)]
struct NodeWatch {
    rx: Option<WatchStream<Option<Arc<Snapshot>>>>,
    nodes: Nodes,
    node: String,
}

// === impl SnapshotCache ===

impl SnapshotCache {
    pub fn shared(metrics: SnapshotMetrics) -> SharedSnapshotCache {
        Arc::new(Self {
            metrics,
            ..Default::default()
        })
    }

    /// Installs a new snapshot of `resources` for `node`.
    ///
    /// Versions are minted while the node's slot is held, so the versions
    /// installed for a node strictly increase even when publishers race.
    pub fn publish(&self, node: &str, resources: Resources) -> Version {
        let version = self.with_slot(node, |tx| {
            let version = self.versions.next();
            tx.send_replace(Some(Arc::new(Snapshot {
                version: version.clone(),
                node: node.to_string(),
                resources,
            })));
            version
        });
        self.metrics.published.inc();
        version
    }

    /// Returns the current snapshot for `node`, if one has been published.
    pub fn get(&self, node: &str) -> Option<Arc<Snapshot>> {
        let nodes = self.nodes.read();
        let tx = nodes.get(node)?.lock();
        let snapshot = tx.borrow().clone();
        snapshot
    }

    /// Watches the snapshots published for `node`.
    ///
    /// The stream yields nothing until a snapshot exists for the node.
    pub fn watch(&self, node: &str) -> SnapshotStream {
        let rx = self.with_slot(node, |tx| tx.subscribe());
        Box::pin(NodeWatch {
            rx: Some(WatchStream::new(rx)),
            nodes: self.nodes.clone(),
            node: node.to_string(),
        })
    }

    /// The number of open watches for `node`.
    pub fn watchers(&self, node: &str) -> usize {
        self.nodes
            .read()
            .get(node)
            .map_or(0, |tx| tx.lock().receiver_count())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn watcher_count(&self) -> usize {
        self.nodes
            .read()
            .values()
            .map(|tx| tx.lock().receiver_count())
            .sum()
    }

    fn with_slot<T>(&self, node: &str, f: impl FnOnce(&SnapshotTx) -> T) -> T {
        {
            let nodes = self.nodes.read();
            if let Some(slot) = nodes.get(node) {
                return f(&slot.lock());
            }
        }

        let mut nodes = self.nodes.write();
        let slot = nodes
            .entry(node.to_string())
            .or_insert_with(|| Mutex::new(watch::channel(None).0));
        f(slot.get_mut())
    }
}

// === impl NodeWatch ===

impl Stream for NodeWatch {
    type Item = Arc<Snapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(None);
        };
        loop {
            match futures::ready!(rx.poll_next_unpin(cx)) {
                Some(Some(snapshot)) => return Poll::Ready(Some(snapshot)),
                Some(None) => continue,
                None => return Poll::Ready(None),
            }
        }
    }
}

impl Drop for NodeWatch {
    fn drop(&mut self) {
        // Release the receiver before inspecting the slot.
        drop(self.rx.take());

        // Publishers and new watches hold the read lock while they use a slot.
        let mut nodes = self.nodes.write();
        let unused = nodes.get_mut(&self.node).is_some_and(|tx| {
            let tx = tx.get_mut();
            tx.receiver_count() == 0 && tx.borrow().is_none()
        });
        if unused {
            nodes.remove(&self.node);
        }
    }
}

// === impl SnapshotMetrics ===

impl SnapshotMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let published = Counter::default();
        reg.register(
            "snapshots_published",
            "Count of snapshots published to the cache",
            published.clone(),
        );
        Self { published }
    }
}
