#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use maestro_controller_core as core;
pub use maestro_controller_grpc as grpc;
pub use maestro_controller_k8s_api as k8s;
pub use maestro_controller_k8s_index as index;
pub use maestro_controller_k8s_sync as sync;
pub use maestro_controller_workqueue as workqueue;

mod args;
mod health;

#[cfg(test)]
mod tests;

pub use self::args::Args;

/// Serves the snapshots published to the snapshot cache.
#[derive(Clone, Debug)]
struct SnapshotDiscover(index::SharedSnapshotCache);

impl SnapshotDiscover {
    pub fn new(cache: index::SharedSnapshotCache) -> Self {
        Self(cache)
    }
}

#[async_trait::async_trait]
impl core::DiscoverSnapshots for SnapshotDiscover {
    async fn watch_snapshots(&self, node: &str) -> anyhow::Result<core::SnapshotStream> {
        Ok(self.0.watch(node))
    }
}
