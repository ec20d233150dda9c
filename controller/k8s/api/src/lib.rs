#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod owner;
pub mod proxy_config;
mod resource_id;

pub use self::{
    owner::ArtifactOwner,
    proxy_config::{ProxyConfig, ProxyConfigSpec, ProxyConfigStatus},
    resource_id::ResourceId,
};
pub use k8s_openapi::{
    api::{
        core::v1::{ConfigMap, ObjectReference},
        discovery::v1::{Endpoint, EndpointPort, EndpointSlice},
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    error::ErrorResponse,
    runtime::watcher,
    Client, Error, Resource,
};

/// The label that names the Service an EndpointSlice belongs to.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// The label set on every artifact the controller writes.
pub const CONTROLLER_LABEL: (&str, &str) = ("controller", "maestro");

/// Returns true if `error` is the API server reporting a missing object.
pub fn is_not_found(error: &Error) -> bool {
    matches!(error, Error::Api(ErrorResponse { code: 404, .. }))
}
