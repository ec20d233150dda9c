use envoy_types::pb::{
    envoy::config::{
        cluster::v3::{
            cluster::{ClusterDiscoveryType, DiscoveryType, EdsClusterConfig},
            Cluster,
        },
        core::v3::{
            address, config_source::ConfigSourceSpecifier, socket_address, Address,
            AggregatedConfigSource, ApiVersion, ConfigSource, SocketAddress,
        },
        endpoint::v3::{
            lb_endpoint::HostIdentifier, ClusterLoadAssignment, Endpoint as LbEndpointAddress,
            LbEndpoint, LocalityLbEndpoints,
        },
    },
    google::protobuf::{Any, Duration},
};
use maestro_controller_core::{Endpoint, LoadAssignment, Snapshot};
use prost::Message;
use std::{
    collections::BTreeMap,
    fmt,
    hash::{DefaultHasher, Hasher},
    str::FromStr,
};

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";

/// The resource types served to proxies.
///
/// Clusters order before endpoints so that a proxy learns of a cluster before
/// its load assignment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeUrl {
    Cluster,
    Endpoint,
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported resource type: {0}")]
pub struct UnsupportedType(pub String);

/// An encoded resource with a version derived from its content.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedResource {
    pub name: String,
    pub version: String,
    pub resource: Any,
}

// === impl TypeUrl ===

impl TypeUrl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => CLUSTER_TYPE_URL,
            Self::Endpoint => ENDPOINT_TYPE_URL,
        }
    }

    /// Resolves a request's type URL, falling back to `default` when the
    /// request leaves it empty.
    pub fn resolve(type_url: &str, default: Option<Self>) -> Result<Self, UnsupportedType> {
        match (type_url, default) {
            ("", Some(default)) => Ok(default),
            (type_url, _) => type_url.parse(),
        }
    }

    /// Encodes the snapshot's resources of this type, keyed by name.
    pub fn resources(&self, snapshot: &Snapshot) -> BTreeMap<String, NamedResource> {
        snapshot
            .resources
            .load_assignments
            .iter()
            .map(|la| {
                let resource = match self {
                    Self::Cluster => to_any(CLUSTER_TYPE_URL, &to_cluster(la)),
                    Self::Endpoint => to_any(ENDPOINT_TYPE_URL, &to_load_assignment(la)),
                };
                let named = NamedResource {
                    name: la.cluster.clone(),
                    version: content_version(&resource.value),
                    resource,
                };
                (named.name.clone(), named)
            })
            .collect()
    }
}

impl FromStr for TypeUrl {
    type Err = UnsupportedType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CLUSTER_TYPE_URL => Ok(Self::Cluster),
            ENDPOINT_TYPE_URL => Ok(Self::Endpoint),
            s => Err(UnsupportedType(s.to_string())),
        }
    }
}

impl fmt::Display for TypeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn to_any<M: Message>(type_url: &str, msg: &M) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: msg.encode_to_vec(),
    }
}

fn content_version(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    hasher.write(bytes);
    format!("{:016x}", hasher.finish())
}

fn to_cluster(la: &LoadAssignment) -> Cluster {
    Cluster {
        name: la.cluster.clone(),
        connect_timeout: Some(Duration {
            seconds: 5,
            nanos: 0,
        }),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::Eds as i32)),
        eds_cluster_config: Some(EdsClusterConfig {
            eds_config: Some(ConfigSource {
                resource_api_version: ApiVersion::V3 as i32,
                config_source_specifier: Some(ConfigSourceSpecifier::Ads(
                    AggregatedConfigSource {},
                )),
                ..Default::default()
            }),
            service_name: String::new(),
        }),
        ..Default::default()
    }
}

fn to_load_assignment(la: &LoadAssignment) -> ClusterLoadAssignment {
    ClusterLoadAssignment {
        cluster_name: la.cluster.clone(),
        endpoints: vec![LocalityLbEndpoints {
            lb_endpoints: la.endpoints.iter().map(to_lb_endpoint).collect(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn to_lb_endpoint(ep: &Endpoint) -> LbEndpoint {
    let protocol = if ep.app_protocol().eq_ignore_ascii_case("udp") {
        socket_address::Protocol::Udp
    } else {
        socket_address::Protocol::Tcp
    };
    LbEndpoint {
        host_identifier: Some(HostIdentifier::Endpoint(LbEndpointAddress {
            address: Some(Address {
                address: Some(address::Address::SocketAddress(SocketAddress {
                    protocol: protocol as i32,
                    address: ep.address().to_string(),
                    port_specifier: Some(socket_address::PortSpecifier::PortValue(
                        ep.port().into(),
                    )),
                    ..Default::default()
                })),
            }),
            ..Default::default()
        })),
        ..Default::default()
    }
}
