use super::*;
use crate::core::{DiscoverSnapshots, Endpoint, Resources, ServiceId};
use futures::prelude::*;
use std::time::Duration;
use tokio::time;

#[tokio::test]
async fn discovers_published_snapshots() {
    let cache = index::SnapshotCache::shared(Default::default());
    let discover = SnapshotDiscover::new(cache.clone());

    let mut snapshots = discover.watch_snapshots("web.ns").await.unwrap();
    let service = ServiceId::new("web", "ns");
    let resources = Resources::for_service(&service, vec![Endpoint::new("10.0.0.1", 80, None)]);
    let version = cache.publish(service.as_str(), resources.clone());

    let snapshot = time::timeout(Duration::from_secs(1), snapshots.next())
        .await
        .expect("snapshot must be observed")
        .expect("stream must not end");
    assert_eq!(snapshot.version, version);
    assert_eq!(snapshot.node, "web.ns");
    assert_eq!(snapshot.resources, resources);
}

#[test]
fn health_checks_require_an_address() {
    use clap::Parser;

    assert!(Args::try_parse_from(["maestro", "grpc-health", "--addr", "127.0.0.1:50051"]).is_ok());
    assert!(Args::try_parse_from(["maestro", "grpc-health"]).is_err());
}

#[tokio::test]
async fn unreachable_servers_exit_with_connection_failures() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let check = health::HealthArgs {
        addr: addr.to_string(),
        service: String::new(),
        rpc_timeout_secs: 1,
    };
    assert_eq!(check.run().await, 1);
}
