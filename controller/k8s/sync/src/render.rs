use anyhow::Result;
use maestro_controller_k8s_api::proxy_config::{ProxyConfigSpec, Service, ServicePort};
use serde_json::{json, Value};

/// Renders the proxy configuration stored in a ProxyConfig's ConfigMap.
///
/// Rendering must be deterministic: equal inputs produce byte-identical
/// output, since the output is compared against the stored ConfigMap.
pub trait Render: Send + Sync + 'static {
    fn render(&self, spec: &ProxyConfigSpec, trust_domain: &str) -> Result<String>;
}

/// Renders an Envoy bootstrap document as YAML.
#[derive(Clone, Debug, Default)]
pub struct BootstrapRenderer(());

const ADMIN_PORT: u16 = 9901;
const INBOUND_HTTP_PORT: u16 = 18080;
const XDS_CLUSTER: &str = "local_xds";
const OPA_CLUSTER: &str = "local_opa";
const SDS_CLUSTER: &str = "local_sds";
const SDS_SOCKET: &str = "/tmp/sds/spire.socket";
const CATCH_ALL_HEADER: &str = "x-maestro-catch-all";

impl Render for BootstrapRenderer {
    fn render(&self, spec: &ProxyConfigSpec, trust_domain: &str) -> Result<String> {
        let svc = &spec.service;
        let bootstrap = json!({
            "admin": { "address": socket_address("0.0.0.0", ADMIN_PORT) },
            "static_resources": {
                "listeners": [inbound_listener(svc, trust_domain)],
                "clusters": clusters(svc),
            },
            "dynamic_resources": {
                "ads_config": {
                    "api_type": "DELTA_GRPC",
                    "transport_api_version": "V3",
                    "grpc_services": [{ "envoy_grpc": { "cluster_name": XDS_CLUSTER } }],
                },
                "cds_config": { "ads": {}, "resource_api_version": "V3" },
            },
        });
        Ok(serde_yaml::to_string(&bootstrap)?)
    }
}

fn socket_address(address: &str, port: u16) -> Value {
    json!({ "socket_address": { "address": address, "port_value": port } })
}

/// Reverses the dot-separated labels of a service name to form its SNI
/// hostname.
fn hostname(service: &str) -> String {
    service.split('.').rev().collect::<Vec<_>>().join(".")
}

fn local_cluster_name(port: u16) -> String {
    format!("local_service_{port}")
}

fn inbound_listener(svc: &Service, trust_domain: &str) -> Value {
    let hostname = hostname(&svc.name);
    let mut vhosts = svc
        .service_ports
        .iter()
        .map(|ServicePort { port, .. }| {
            json!({
                "name": local_cluster_name(*port),
                "domains": [format!("{hostname}_{port}")],
                "routes": [{
                    "match": { "prefix": "/" },
                    "route": { "cluster": local_cluster_name(*port) },
                }],
            })
        })
        .collect::<Vec<_>>();
    vhosts.push(json!({
        "name": "catch_all",
        "domains": ["*"],
        "routes": [{
            "match": { "prefix": "/" },
            "request_headers_to_add": [{
                "append_action": "OVERWRITE_IF_EXISTS_OR_ADD",
                "header": { "key": CATCH_ALL_HEADER, "value": "true" },
            }],
            "direct_response": { "status": 404 },
        }],
    }));

    let mut http_filters = vec![];
    if let Some(authn) = svc.authn.as_ref() {
        let principals = if authn.allowed_identities.is_empty() {
            vec![json!({ "authenticated": {} })]
        } else {
            authn
                .allowed_identities
                .iter()
                .map(|id| {
                    json!({ "authenticated": { "principal_name": {
                        "exact": format!("spiffe://{trust_domain}/{id}"),
                    } } })
                })
                .collect()
        };
        http_filters.push(json!({
            "name": "envoy.filters.http.rbac",
            "typed_config": {
                "@type": "type.googleapis.com/envoy.extensions.filters.http.rbac.v3.RBAC",
                "rules": { "policies": { "authenticated": {
                    "permissions": [{ "any": true }],
                    "principals": principals,
                } } },
            },
        }));
    }
    if svc.authz.is_some() {
        http_filters.push(json!({
            "name": "envoy.filters.http.ext_authz",
            "typed_config": {
                "@type": "type.googleapis.com/envoy.extensions.filters.http.ext_authz.v3.ExtAuthz",
                "transport_api_version": "V3",
                "grpc_service": { "envoy_grpc": { "cluster_name": OPA_CLUSTER } },
            },
        }));
    }
    http_filters.push(json!({
        "name": "envoy.filters.http.router",
        "typed_config": {
            "@type": "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router",
        },
    }));

    let mut filter_chain = json!({
        "filters": [{
            "name": "envoy.filters.network.http_connection_manager",
            "typed_config": {
                "@type": "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager",
                "stat_prefix": "inbound_http",
                "route_config": { "name": "local_route", "virtual_hosts": vhosts },
                "http_filters": http_filters,
            },
        }],
    });
    if svc.authn.is_some() {
        filter_chain["transport_socket"] = json!({
            "name": "envoy.transport_sockets.tls",
            "typed_config": {
                "@type": "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext",
                "require_client_certificate": true,
                "common_tls_context": {
                    "tls_certificate_sds_secret_configs": [sds_secret(&format!("spiffe://{trust_domain}/ns/default/sa/default"))],
                    "validation_context_sds_secret_config": sds_secret(&format!("spiffe://{trust_domain}")),
                },
            },
        });
    }

    json!({
        "name": "inbound_http",
        "address": socket_address("0.0.0.0", INBOUND_HTTP_PORT),
        "filter_chains": [filter_chain],
    })
}

fn sds_secret(name: &str) -> Value {
    json!({
        "name": name,
        "sds_config": {
            "resource_api_version": "V3",
            "api_config_source": {
                "api_type": "GRPC",
                "transport_api_version": "V3",
                "grpc_services": [{ "envoy_grpc": { "cluster_name": SDS_CLUSTER } }],
            },
        },
    })
}

fn clusters(svc: &Service) -> Vec<Value> {
    let mut clusters = vec![static_cluster(
        XDS_CLUSTER,
        socket_address("127.0.0.1", 50051),
        true,
    )];
    if svc.authz.is_some() {
        clusters.push(static_cluster(
            OPA_CLUSTER,
            socket_address("127.0.0.1", 9191),
            true,
        ));
    }
    if svc.authn.is_some() {
        clusters.push(static_cluster(
            SDS_CLUSTER,
            json!({ "pipe": { "path": SDS_SOCKET } }),
            true,
        ));
    }

    for port in &svc.service_ports {
        let mut cluster = static_cluster(
            &local_cluster_name(port.port),
            socket_address("127.0.0.1", port.port),
            false,
        );
        if let Some(hc) = port.health_check.as_ref() {
            cluster["health_checks"] = json!([{
                "timeout": "1s",
                "interval": format!("{}s", hc.interval_seconds.unwrap_or(10)),
                "unhealthy_threshold": 3,
                "healthy_threshold": 1,
                "http_health_check": { "path": hc.path },
            }]);
        }
        clusters.push(cluster);
    }
    clusters
}

fn static_cluster(name: &str, address: Value, http2: bool) -> Value {
    let mut cluster = json!({
        "name": name,
        "type": "STATIC",
        "connect_timeout": "1s",
        "load_assignment": {
            "cluster_name": name,
            "endpoints": [{ "lb_endpoints": [{ "endpoint": { "address": address } }] }],
        },
    });
    if http2 {
        cluster["typed_extension_protocol_options"] = json!({
            "envoy.extensions.upstreams.http.v3.HttpProtocolOptions": {
                "@type": "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions",
                "explicit_http_config": { "http2_protocol_options": {} },
            },
        });
    }
    cluster
}
