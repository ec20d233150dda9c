#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod endpoint;
pub mod snapshot;

pub use self::{
    endpoint::{Endpoint, ServiceId, DEFAULT_APP_PROTOCOL},
    snapshot::{
        DiscoverSnapshots, LoadAssignment, Resources, Snapshot, SnapshotStream, Version, Versions,
    },
};

/// The name under which the controller writes artifacts and records events.
pub const CONTROLLER_NAME: &str = "maestro";

#[cfg(test)]
mod tests;
