use crate::{registry::PartitionEndpoints, EndpointRegistry, SharedSnapshotCache};
use ahash::AHashMap as HashMap;
use anyhow::Result;
use maestro_controller_core::{Endpoint, Resources, ServiceId};
use maestro_controller_k8s_api::{EndpointSlice, ResourceExt, ResourceId, SERVICE_NAME_LABEL};
use maestro_controller_workqueue::{Reconcile, WorkQueue};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Caches EndpointSlices and queues each changed slice for the [`Registrar`].
#[derive(Debug)]
pub struct Index {
    slices: HashMap<ResourceId, Arc<EndpointSlice>>,
    queue: WorkQueue<ResourceId>,
}

/// Folds EndpointSlices into the [`EndpointRegistry`] and publishes each
/// affected service's endpoints.
#[derive(Debug)]
pub struct Registrar {
    slices: SharedIndex,
    registry: Arc<EndpointRegistry>,
    snapshots: SharedSnapshotCache,
}

/// Returns the service that owns `slice`, if it is labeled with one.
pub fn service_id(slice: &EndpointSlice) -> Option<ServiceId> {
    let name = slice.labels().get(SERVICE_NAME_LABEL)?;
    let namespace = slice.namespace()?;
    Some(ServiceId::new(name, &namespace))
}

/// Builds the endpoints of a slice from the cross product of its addresses and
/// ports.
///
/// Ports without a number (or with one outside of 0-65535) are skipped.
pub fn endpoints(slice: &EndpointSlice) -> PartitionEndpoints {
    let mut endpoints = PartitionEndpoints::default();
    for port in slice.ports.iter().flatten() {
        let Some(number) = port.port.and_then(|p| u16::try_from(p).ok()) else {
            continue;
        };
        for ep in &slice.endpoints {
            for addr in &ep.addresses {
                let ep = Endpoint::new(addr.clone(), number, port.app_protocol.as_deref());
                endpoints.insert(ep.key(), ep);
            }
        }
    }
    endpoints
}

// === impl Index ===

impl Index {
    pub fn new(queue: WorkQueue<ResourceId>) -> Self {
        Self {
            slices: HashMap::default(),
            queue,
        }
    }

    pub fn shared(queue: WorkQueue<ResourceId>) -> SharedIndex {
        Arc::new(RwLock::new(Self::new(queue)))
    }

    pub fn get(&self, id: &ResourceId) -> Option<Arc<EndpointSlice>> {
        self.slices.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

impl kubert::index::IndexNamespacedResource<EndpointSlice> for Index {
    fn apply(&mut self, slice: EndpointSlice) {
        let Some(id) = ResourceId::of(&slice) else {
            warn!(name = %slice.name_any(), "EndpointSlice has no namespace");
            return;
        };

        let version = slice.resource_version();
        let unchanged = version.is_some()
            && self
                .slices
                .get(&id)
                .is_some_and(|cached| cached.resource_version() == version);
        self.slices.insert(id.clone(), Arc::new(slice));
        if unchanged {
            debug!(%id, "Unchanged EndpointSlice");
            return;
        }
        self.queue.enqueue(id);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        self.slices.remove(&id);
        self.queue.enqueue(id);
    }
}

// === impl Registrar ===

impl Registrar {
    pub fn new(
        slices: SharedIndex,
        registry: Arc<EndpointRegistry>,
        snapshots: SharedSnapshotCache,
    ) -> Self {
        Self {
            slices,
            registry,
            snapshots,
        }
    }

    /// Publishes the service's current endpoints.
    ///
    /// The snapshot is published while the registry holds the service's
    /// partitions, so a concurrent update to another of its slices is always
    /// published after this one.
    fn publish(&self, service: &ServiceId) {
        let (count, version) = self.registry.with_unique_endpoints(service, |endpoints| {
            let count = endpoints.len();
            let resources = Resources::for_service(service, endpoints);
            (count, self.snapshots.publish(service.as_str(), resources))
        });
        debug!(%service, endpoints = count, %version, "Published snapshot");
    }
}

#[async_trait::async_trait]
impl Reconcile<ResourceId> for Registrar {
    async fn reconcile(&self, id: &ResourceId) -> Result<()> {
        let slice = self.slices.read().get(id);
        let affected = match slice.as_deref().map(|s| (s, service_id(s))) {
            // The slice no longer exists, which is an explicit report that it
            // contributes no endpoints.
            None => self.registry.remove(id).into_iter().collect::<Vec<_>>(),

            Some((_, None)) => {
                warn!(%id, "EndpointSlice is missing the {SERVICE_NAME_LABEL} label; ignoring it");
                self.registry.remove(id).into_iter().collect()
            }

            Some((slice, Some(service))) => {
                let endpoints = endpoints(slice);
                debug!(%id, %service, endpoints = endpoints.len(), "Updating partition");
                let moved_from = self.registry.update(id, &service, endpoints);
                std::iter::once(service).chain(moved_from).collect()
            }
        };

        for service in &affected {
            self.publish(service);
        }
        Ok(())
    }
}
