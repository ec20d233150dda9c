use crate::{EndpointRegistry, SharedSnapshotCache};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::sync::Arc;

#[derive(Debug)]
struct Instrumented {
    registry: Arc<EndpointRegistry>,
    snapshots: SharedSnapshotCache,
}

pub fn register(
    reg: &mut Registry,
    registry: Arc<EndpointRegistry>,
    snapshots: SharedSnapshotCache,
) {
    reg.register_collector(Box::new(Instrumented {
        registry,
        snapshots,
    }));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let gauges = [
            (
                "registry_services",
                "The number of services with endpoints in the registry",
                self.registry.service_count(),
            ),
            (
                "registry_partitions",
                "The number of endpoint partitions in the registry",
                self.registry.partition_count(),
            ),
            (
                "registry_endpoints",
                "The number of endpoints across all registry partitions",
                self.registry.endpoint_count(),
            ),
            (
                "snapshot_nodes",
                "The number of nodes known to the snapshot cache",
                self.snapshots.node_count(),
            ),
            (
                "snapshot_watches",
                "The number of open snapshot watches",
                self.snapshots.watcher_count(),
            ),
        ];

        for (name, help, value) in gauges {
            let metric_encoder =
                encoder.encode_descriptor(name, help, None, MetricType::Gauge)?;
            ConstGauge::new(value as i64).encode(metric_encoder)?;
        }
        Ok(())
    }
}
