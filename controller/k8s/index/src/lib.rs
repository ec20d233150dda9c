//! Maestro controller indexes
//!
//! The controller watches three kinds of cluster resources:
//!
//! - Each `EndpointSlice` is one partition of a Service's endpoints. Slices are
//!   cached and their keys queued for the [`Registrar`], which folds each
//!   slice into the [`EndpointRegistry`] and publishes the Service's
//!   deduplicated endpoint set as a snapshot.
//! - Each `ProxyConfig` is cached and its key queued for reconciliation.
//! - Each generated `ConfigMap` routes changes back to the `ProxyConfig` that
//!   controls it, so that drift is repaired.
//!
//! ```text
//! [ EndpointSlice ] -> [ Registrar ] -> [ EndpointRegistry ] -> [ SnapshotCache ]
//! [ ProxyConfig ] <- [ ConfigMap ]
//! ```
//!
//! Watch handlers only cache objects and enqueue keys; all convergence happens
//! in work-queue workers.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod endpoint_slice;
pub mod metrics;
pub mod proxy_config;
mod registry;
mod snapshot;

#[cfg(test)]
mod tests;

pub use self::{
    endpoint_slice::Registrar,
    registry::EndpointRegistry,
    snapshot::{SharedSnapshotCache, SnapshotCache, SnapshotMetrics},
};
