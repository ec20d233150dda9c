use crate::{Endpoint, ServiceId};
use anyhow::Result;
use chrono::{offset::Utc, DateTime, SecondsFormat};
use futures::prelude::*;
use std::{
    cmp::Ordering,
    fmt,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Arc,
    },
};

/// Discovers the snapshots published for a proxy node.
#[async_trait::async_trait]
pub trait DiscoverSnapshots {
    /// Watches the snapshots for `node`.
    ///
    /// The returned stream does not yield until a snapshot has been published
    /// for the node and thereafter yields the newest snapshot whenever it
    /// changes. Intermediate versions may be skipped.
    async fn watch_snapshots(&self, node: &str) -> Result<SnapshotStream>;
}

pub type SnapshotStream = Pin<Box<dyn Stream<Item = Arc<Snapshot>> + Send + Sync + 'static>>;

/// An immutable, versioned bundle of discovery resources for a single node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub version: Version,
    pub node: String,
    pub resources: Resources,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resources {
    pub load_assignments: Vec<LoadAssignment>,
}

/// The set of endpoints that back a cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadAssignment {
    pub cluster: String,
    pub endpoints: Vec<Endpoint>,
}

/// A snapshot version.
///
/// Versions render as `<RFC3339 timestamp>/<sequence>` and are ordered only by
/// their sequence number, so ordering holds even when the clock moves
/// backwards.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Version {
    seq: u64,
    timestamp: DateTime<Utc>,
}

/// Mints strictly increasing [`Version`]s.
#[derive(Debug, Default)]
pub struct Versions(AtomicU64);

// === impl Resources ===

impl Resources {
    /// Builds resources with a single load assignment for `service`.
    ///
    /// Endpoints are ordered by key so that equal sets produce equal
    /// resources.
    pub fn for_service(service: &ServiceId, mut endpoints: Vec<Endpoint>) -> Self {
        endpoints.sort_by_key(|ep| ep.key());
        Self {
            load_assignments: vec![LoadAssignment {
                cluster: service.to_string(),
                endpoints,
            }],
        }
    }
}

// === impl Version ===

impl Version {
    pub fn new(seq: u64, timestamp: DateTime<Utc>) -> Self {
        Self { seq, timestamp }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.seq
        )
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq.cmp(&other.seq)
    }
}

// === impl Versions ===

impl Versions {
    pub fn next(&self) -> Version {
        let seq = self.0.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        Version::new(seq, Utc::now())
    }
}
