use super::*;
use crate::{endpoint_slice, EndpointRegistry};
use maestro_controller_core::{Endpoint, ServiceId};
use pretty_assertions::assert_eq;

fn keys(endpoints: Vec<Endpoint>) -> Vec<String> {
    let mut keys = endpoints.iter().map(Endpoint::key).collect::<Vec<_>>();
    keys.sort();
    keys
}

fn web() -> ServiceId {
    ServiceId::new("web", "ns-0")
}

fn http_slice(name: &str, addresses: &[&str]) -> EndpointSlice {
    mk_slice("ns-0", name, Some("web"), addresses, &[(Some(8080), Some("http"))])
}

#[test]
fn union_deduplicates_across_partitions() {
    let registry = EndpointRegistry::default();
    let slice1 = http_slice("slice1", &["10.0.0.1", "10.0.0.2"]);
    let slice2 = http_slice("slice2", &["10.0.0.1", "10.0.0.2"]);
    registry.update(&mk_id("ns-0", "slice1"), &web(), endpoint_slice::endpoints(&slice1));
    registry.update(&mk_id("ns-0", "slice2"), &web(), endpoint_slice::endpoints(&slice2));

    assert_eq!(
        keys(registry.unique_endpoints(&web())),
        ["http:10.0.0.1:8080", "http:10.0.0.2:8080"]
    );
}

#[test]
fn empty_partition_is_a_tombstone() {
    let registry = EndpointRegistry::default();
    let slice1 = http_slice("slice1", &["10.0.0.1", "10.0.0.2"]);
    let slice2 = http_slice("slice2", &["10.0.0.2"]);
    registry.update(&mk_id("ns-0", "slice1"), &web(), endpoint_slice::endpoints(&slice1));
    registry.update(&mk_id("ns-0", "slice2"), &web(), endpoint_slice::endpoints(&slice2));

    let empty = http_slice("slice1", &[]);
    registry.update(&mk_id("ns-0", "slice1"), &web(), endpoint_slice::endpoints(&empty));
    assert_eq!(keys(registry.unique_endpoints(&web())), ["http:10.0.0.2:8080"]);
    assert_eq!(registry.partition_count(), 1);

    registry.update(&mk_id("ns-0", "slice2"), &web(), Default::default());
    assert!(registry.unique_endpoints(&web()).is_empty());
    assert_eq!(registry.service_count(), 0);
}

#[test]
fn partitions_are_replaced_wholesale() {
    let registry = EndpointRegistry::default();
    let id = mk_id("ns-0", "slice1");
    let larger = http_slice("slice1", &["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    let smaller = http_slice("slice1", &["10.0.0.3"]);
    registry.update(&id, &web(), endpoint_slice::endpoints(&larger));
    registry.update(&id, &web(), endpoint_slice::endpoints(&smaller));

    assert_eq!(keys(registry.unique_endpoints(&web())), ["http:10.0.0.3:8080"]);
    assert_eq!(registry.endpoint_count(), 1);
}

#[test]
fn final_union_is_independent_of_update_order() {
    let updates = [
        ("slice1", vec!["10.0.0.1", "10.0.0.2"]),
        ("slice2", vec!["10.0.0.2", "10.0.0.3"]),
        ("slice1", vec!["10.0.0.4"]),
        ("slice3", vec![]),
        ("slice3", vec!["10.0.0.3"]),
    ];

    // Only the relative order of updates to the same partition matters.
    let orders: [&[usize]; 3] = [&[0, 1, 2, 3, 4], &[1, 0, 3, 2, 4], &[3, 4, 1, 0, 2]];
    for order in orders {
        let registry = EndpointRegistry::default();
        for &i in order {
            let (name, addrs) = &updates[i];
            let slice = http_slice(name, addrs);
            registry.update(&mk_id("ns-0", name), &web(), endpoint_slice::endpoints(&slice));
        }
        assert_eq!(
            keys(registry.unique_endpoints(&web())),
            ["http:10.0.0.2:8080", "http:10.0.0.3:8080", "http:10.0.0.4:8080"],
            "order {order:?}"
        );
    }
}

#[test]
fn services_are_isolated() {
    let registry = EndpointRegistry::default();
    let api = ServiceId::new("api", "ns-0");
    let slice = http_slice("slice1", &["10.0.0.1"]);
    registry.update(&mk_id("ns-0", "slice1"), &web(), endpoint_slice::endpoints(&slice));
    let slice = mk_slice("ns-0", "api-1", Some("api"), &["10.0.1.1"], &[(Some(80), None)]);
    registry.update(&mk_id("ns-0", "api-1"), &api, endpoint_slice::endpoints(&slice));

    assert_eq!(keys(registry.unique_endpoints(&web())), ["http:10.0.0.1:8080"]);
    assert_eq!(keys(registry.unique_endpoints(&api)), ["tcp:10.0.1.1:80"]);
}

#[test]
fn relabeled_partition_moves_between_services() {
    let registry = EndpointRegistry::default();
    let api = ServiceId::new("api", "ns-0");
    let id = mk_id("ns-0", "slice1");
    let slice = http_slice("slice1", &["10.0.0.1"]);
    assert_eq!(registry.update(&id, &web(), endpoint_slice::endpoints(&slice)), None);
    assert_eq!(
        registry.update(&id, &api, endpoint_slice::endpoints(&slice)),
        Some(web())
    );
    assert!(registry.unique_endpoints(&web()).is_empty());
    assert_eq!(registry.unique_endpoints(&api).len(), 1);
}

#[test]
fn removing_a_partition_reports_its_service() {
    let registry = EndpointRegistry::default();
    let id = mk_id("ns-0", "slice1");
    let slice = http_slice("slice1", &["10.0.0.1"]);
    registry.update(&id, &web(), endpoint_slice::endpoints(&slice));

    assert_eq!(registry.remove(&id), Some(web()));
    assert_eq!(registry.remove(&id), None);
    assert!(registry.unique_endpoints(&web()).is_empty());
}

#[test]
fn endpoints_skip_missing_and_out_of_range_ports() {
    let slice = mk_slice(
        "ns-0",
        "slice1",
        Some("web"),
        &["10.0.0.1", "10.0.0.2"],
        &[
            (Some(8080), Some("http")),
            (None, Some("grpc")),
            (Some(0), None),
            (Some(70000), None),
            (Some(9090), None),
        ],
    );
    let mut keys = endpoint_slice::endpoints(&slice)
        .keys()
        .cloned()
        .collect::<Vec<_>>();
    keys.sort();
    assert_eq!(
        keys,
        [
            "http:10.0.0.1:8080",
            "http:10.0.0.2:8080",
            "tcp:10.0.0.1:0",
            "tcp:10.0.0.1:9090",
            "tcp:10.0.0.2:0",
            "tcp:10.0.0.2:9090",
        ]
    );
}

#[test]
fn slices_without_ports_have_no_endpoints() {
    let mut slice = http_slice("slice1", &["10.0.0.1"]);
    slice.ports = None;
    assert!(endpoint_slice::endpoints(&slice).is_empty());
}
