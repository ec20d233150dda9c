use super::*;
use chrono::{TimeZone, Utc};

#[test]
fn endpoint_key_includes_protocol_address_and_port() {
    let ep = Endpoint::new("10.0.0.1", 8080, Some("http"));
    assert_eq!(ep.key(), "http:10.0.0.1:8080");
}

#[test]
fn endpoint_defaults_missing_protocol() {
    assert_eq!(Endpoint::new("10.0.0.1", 80, None).app_protocol(), "tcp");
    assert_eq!(Endpoint::new("10.0.0.1", 80, Some("")).app_protocol(), "tcp");
    assert_eq!(
        Endpoint::new("10.0.0.1", 80, None).key(),
        Endpoint::new("10.0.0.1", 80, Some(DEFAULT_APP_PROTOCOL)).key(),
    );
}

#[test]
fn service_id_joins_name_and_namespace() {
    assert_eq!(ServiceId::new("web", "ns-0").as_str(), "web.ns-0");
}

#[test]
fn versions_order_by_sequence() {
    let later_clock = Version::new(1, Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
    let earlier_clock = Version::new(2, Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    assert!(earlier_clock > later_clock);
    assert_eq!(earlier_clock.to_string(), "2020-01-01T00:00:00Z/2");
}

#[test]
fn versions_strictly_increase() {
    let versions = Versions::default();
    let a = versions.next();
    let b = versions.next();
    assert!(b > a);
    assert_eq!(b.seq(), a.seq() + 1);
}

#[test]
fn resources_sort_endpoints() {
    let svc = ServiceId::new("web", "ns-0");
    let resources = Resources::for_service(
        &svc,
        vec![
            Endpoint::new("10.0.0.2", 80, None),
            Endpoint::new("10.0.0.1", 80, None),
        ],
    );
    let la = &resources.load_assignments[0];
    assert_eq!(la.cluster, "web.ns-0");
    assert_eq!(la.endpoints[0].address(), "10.0.0.1");
}
