use ahash::AHashMap as HashMap;
use maestro_controller_core::{Endpoint, ServiceId};
use maestro_controller_k8s_api::ResourceId;
use parking_lot::{Mutex, RwLock};

/// Endpoints keyed by [`Endpoint::key`].
pub type PartitionEndpoints = HashMap<String, Endpoint>;

type Partitions = HashMap<String, PartitionEndpoints>;

/// Aggregates endpoint partitions into per-service endpoint sets.
///
/// Each service's partitions are guarded by their own lock, so updates to
/// unrelated services never contend. A partition is only ever replaced as a
/// whole.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    services: RwLock<HashMap<ServiceId, Mutex<Partitions>>>,

    /// Records the service each partition was last observed under, so that a
    /// partition that disappears can be removed from the right service.
    owners: Mutex<HashMap<ResourceId, ServiceId>>,
}

// === impl EndpointRegistry ===

impl EndpointRegistry {
    /// Replaces the endpoints of `partition` under `service`.
    ///
    /// An empty set of endpoints removes the partition. If the partition was
    /// previously recorded under a different service, it is removed from that
    /// service and the former service is returned.
    pub fn update(
        &self,
        partition: &ResourceId,
        service: &ServiceId,
        endpoints: PartitionEndpoints,
    ) -> Option<ServiceId> {
        let moved_from = {
            let mut owners = self.owners.lock();
            let previous = if endpoints.is_empty() {
                owners.remove(partition)
            } else {
                owners.insert(partition.clone(), service.clone())
            };
            previous.filter(|prev| prev != service)
        };
        if let Some(prev) = moved_from.as_ref() {
            self.remove_partition(prev, &partition.name);
        }

        if endpoints.is_empty() {
            self.remove_partition(service, &partition.name);
        } else {
            self.with_partitions(service, |partitions| {
                partitions.insert(partition.name.clone(), endpoints);
            });
        }
        moved_from
    }

    /// Forgets `partition`, returning the service it belonged to.
    pub fn remove(&self, partition: &ResourceId) -> Option<ServiceId> {
        let service = self.owners.lock().remove(partition)?;
        self.remove_partition(&service, &partition.name);
        Some(service)
    }

    /// Returns the union of all of the service's partitions, deduplicated by
    /// endpoint key.
    pub fn unique_endpoints(&self, service: &ServiceId) -> Vec<Endpoint> {
        self.with_unique_endpoints(service, |endpoints| endpoints)
    }

    /// Calls `f` with the union of the service's partitions while the
    /// service's partitions are locked.
    ///
    /// No partition of the service may change until `f` returns, so whatever
    /// `f` derives from the union is ordered with respect to every update.
    pub fn with_unique_endpoints<T>(
        &self,
        service: &ServiceId,
        f: impl FnOnce(Vec<Endpoint>) -> T,
    ) -> T {
        let services = self.services.read();
        let Some(partitions) = services.get(service) else {
            // Creating the service's entry requires the write lock.
            return f(vec![]);
        };
        let partitions = partitions.lock();
        let mut unique = HashMap::<&str, &Endpoint>::default();
        for endpoints in partitions.values() {
            for (key, ep) in endpoints {
                unique.entry(key.as_str()).or_insert(ep);
            }
        }
        f(unique.values().map(|ep| (*ep).clone()).collect())
    }

    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }

    pub fn partition_count(&self) -> usize {
        self.owners.lock().len()
    }

    pub fn endpoint_count(&self) -> usize {
        self.services
            .read()
            .values()
            .map(|partitions| partitions.lock().values().map(|eps| eps.len()).sum::<usize>())
            .sum()
    }

    fn with_partitions<T>(&self, service: &ServiceId, f: impl FnOnce(&mut Partitions) -> T) -> T {
        {
            let services = self.services.read();
            if let Some(partitions) = services.get(service) {
                return f(&mut partitions.lock());
            }
        }

        let mut services = self.services.write();
        let partitions = services.entry(service.clone()).or_default();
        f(partitions.get_mut())
    }

    fn remove_partition(&self, service: &ServiceId, partition: &str) {
        let now_empty = {
            let services = self.services.read();
            let Some(partitions) = services.get(service) else {
                return;
            };
            let mut partitions = partitions.lock();
            partitions.remove(partition);
            partitions.is_empty()
        };

        if now_empty {
            // Updaters hold the read lock, so the service cannot gain a
            // partition between this check and its removal.
            let mut services = self.services.write();
            if services
                .get_mut(service)
                .is_some_and(|partitions| partitions.get_mut().is_empty())
            {
                services.remove(service);
            }
        }
    }
}
