use ahash::AHashMap as HashMap;
use maestro_controller_k8s_api::{ArtifactOwner, ConfigMap, ProxyConfig, ResourceExt, ResourceId};
use maestro_controller_workqueue::WorkQueue;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Caches ProxyConfigs and the ConfigMaps they control, queueing a
/// ProxyConfig whenever it or one of its artifacts changes.
#[derive(Debug)]
pub struct Index {
    configs: HashMap<ResourceId, Arc<ProxyConfig>>,
    artifacts: HashMap<ResourceId, Artifact>,
    queue: WorkQueue<ResourceId>,
}

#[derive(Debug)]
struct Artifact {
    resource_version: Option<String>,
    owner: ArtifactOwner,
}

// === impl Index ===

impl Index {
    pub fn new(queue: WorkQueue<ResourceId>) -> Self {
        Self {
            configs: HashMap::default(),
            artifacts: HashMap::default(),
            queue,
        }
    }

    pub fn shared(queue: WorkQueue<ResourceId>) -> SharedIndex {
        Arc::new(RwLock::new(Self::new(queue)))
    }

    pub fn get(&self, id: &ResourceId) -> Option<Arc<ProxyConfig>> {
        self.configs.get(id).cloned()
    }

    pub fn config_count(&self) -> usize {
        self.configs.len()
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    /// Queues the ProxyConfig that controls an artifact in `namespace`.
    ///
    /// Artifacts controlled by anything else, or by a ProxyConfig that is not
    /// known, are ignored.
    fn enqueue_owner(&self, namespace: &str, owner: &ArtifactOwner) {
        let Some(name) = owner.proxy_config() else {
            trace!(?owner, "Not controlled by a ProxyConfig");
            return;
        };
        let id = ResourceId::new(namespace.to_string(), name.to_string());
        if !self.configs.contains_key(&id) {
            debug!(%id, "Ignoring orphaned artifact");
            return;
        }
        self.queue.enqueue(id);
    }
}

impl kubert::index::IndexNamespacedResource<ProxyConfig> for Index {
    fn apply(&mut self, config: ProxyConfig) {
        let Some(id) = ResourceId::of(&config) else {
            return;
        };
        let version = config.resource_version();
        let unchanged = version.is_some()
            && self
                .configs
                .get(&id)
                .is_some_and(|cached| cached.resource_version() == version);
        self.configs.insert(id.clone(), Arc::new(config));
        if !unchanged {
            self.queue.enqueue(id);
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        // Generated artifacts are garbage collected through their owner
        // references.
        self.configs.remove(&ResourceId::new(namespace, name));
    }
}

impl kubert::index::IndexNamespacedResource<ConfigMap> for Index {
    fn apply(&mut self, cm: ConfigMap) {
        let Some(id) = ResourceId::of(&cm) else {
            return;
        };
        let resource_version = cm.resource_version();
        if resource_version.is_some()
            && self
                .artifacts
                .get(&id)
                .is_some_and(|a| a.resource_version == resource_version)
        {
            return;
        }

        let owner = ArtifactOwner::of(&cm.metadata);
        self.enqueue_owner(&id.namespace, &owner);
        self.artifacts.insert(
            id,
            Artifact {
                resource_version,
                owner,
            },
        );
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        if let Some(Artifact { owner, .. }) = self.artifacts.remove(&id) {
            self.enqueue_owner(&id.namespace, &owner);
        }
    }
}
