mod proxy_config;
mod registry;

use maestro_controller_k8s_api::{
    self as k8s, ConfigMap, EndpointSlice, ObjectMeta, ProxyConfig, ResourceId,
};
use maestro_controller_workqueue::{Config, QueueMetrics, WorkQueue};
use maplit::btreemap;

fn mk_queue() -> WorkQueue<ResourceId> {
    WorkQueue::new(&Config::default(), QueueMetrics::default())
}

fn mk_id(ns: &str, name: &str) -> ResourceId {
    ResourceId::new(ns.to_string(), name.to_string())
}

fn mk_slice(
    ns: &str,
    name: &str,
    service: Option<&str>,
    addresses: &[&str],
    ports: &[(Option<i32>, Option<&str>)],
) -> EndpointSlice {
    EndpointSlice {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            labels: service.map(|svc| btreemap! { k8s::SERVICE_NAME_LABEL.to_string() => svc.to_string() }),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        address_type: "IPv4".to_string(),
        endpoints: vec![k8s::Endpoint {
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }],
        ports: Some(
            ports
                .iter()
                .map(|(port, app_protocol)| k8s::EndpointPort {
                    port: *port,
                    app_protocol: app_protocol.map(Into::into),
                    ..Default::default()
                })
                .collect(),
        ),
    }
}

fn mk_proxy_config(ns: &str, name: &str, uid: &str, resource_version: &str) -> ProxyConfig {
    let mut config = ProxyConfig::new(
        name,
        k8s::ProxyConfigSpec {
            service: k8s::proxy_config::Service {
                name: name.to_string(),
                service_ports: vec![],
                authn: None,
                authz: None,
            },
        },
    );
    config.metadata.namespace = Some(ns.to_string());
    config.metadata.uid = Some(uid.to_string());
    config.metadata.resource_version = Some(resource_version.to_string());
    config
}

fn mk_config_map(
    ns: &str,
    name: &str,
    owner: Option<&ProxyConfig>,
    resource_version: &str,
) -> ConfigMap {
    use k8s::Resource;

    ConfigMap {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            resource_version: Some(resource_version.to_string()),
            owner_references: owner
                .and_then(|config| config.controller_owner_ref(&()))
                .map(|r| vec![r]),
            ..Default::default()
        },
        ..Default::default()
    }
}
