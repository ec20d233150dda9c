use anyhow::Result;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use maestro_controller_core::CONTROLLER_NAME;
use maestro_controller_k8s_api::{
    self as k8s, is_not_found, Api, Client, ConfigMap, Patch, PatchParams, PostParams,
    ProxyConfig, ProxyConfigStatus, Resource, ResourceExt, ResourceId,
};
use maestro_controller_k8s_index::proxy_config;
use serde_json::json;
use std::sync::Arc;

/// The cluster operations needed to converge a ProxyConfig.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    /// Looks up a ProxyConfig, returning `None` if it does not exist.
    async fn proxy_config(&self, id: &ResourceId) -> Result<Option<Arc<ProxyConfig>>>;

    /// Fetches a ConfigMap, returning `None` if it does not exist.
    async fn config_map(&self, id: &ResourceId) -> Result<Option<ConfigMap>>;

    async fn create_config_map(&self, cm: ConfigMap) -> Result<ConfigMap>;

    /// Replaces a ConfigMap. Fails if the ConfigMap has changed since it was
    /// read.
    async fn replace_config_map(&self, cm: ConfigMap) -> Result<ConfigMap>;

    async fn patch_status(&self, id: &ResourceId, status: ProxyConfigStatus) -> Result<()>;

    async fn record(&self, config: &ProxyConfig, event: SyncEvent) -> Result<()>;
}

/// Events recorded against a ProxyConfig.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    /// The ProxyConfig converged.
    Synced,

    /// The ProxyConfig's ConfigMap name is taken by another owner.
    ResourceExists { artifact: String },
}

/// Reads ProxyConfigs from the watch index and everything else from the API
/// server.
pub struct KubeApi {
    client: Client,
    configs: proxy_config::SharedIndex,
    recorder: Recorder,
}

// === impl SyncEvent ===

impl SyncEvent {
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::ResourceExists { .. })
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Synced => "Synced",
            Self::ResourceExists { .. } => "ErrResourceExists",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Synced => "ProxyConfig synced successfully".to_string(),
            Self::ResourceExists { artifact } => {
                format!("Resource {artifact:?} already exists and is not managed by ProxyConfig")
            }
        }
    }
}

// === impl KubeApi ===

impl KubeApi {
    pub fn new(client: Client, configs: proxy_config::SharedIndex, instance: String) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: Some(instance),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            configs,
        }
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for KubeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeApi").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeApi {
    async fn proxy_config(&self, id: &ResourceId) -> Result<Option<Arc<ProxyConfig>>> {
        Ok(self.configs.read().get(id))
    }

    async fn config_map(&self, id: &ResourceId) -> Result<Option<ConfigMap>> {
        let cm = self.config_maps(&id.namespace).get_opt(&id.name).await?;
        Ok(cm)
    }

    async fn create_config_map(&self, cm: ConfigMap) -> Result<ConfigMap> {
        let namespace = cm.namespace().unwrap_or_default();
        let cm = self
            .config_maps(&namespace)
            .create(&Self::post_params(), &cm)
            .await?;
        Ok(cm)
    }

    async fn replace_config_map(&self, cm: ConfigMap) -> Result<ConfigMap> {
        let namespace = cm.namespace().unwrap_or_default();
        let cm = self
            .config_maps(&namespace)
            .replace(&cm.name_any(), &Self::post_params(), &cm)
            .await?;
        Ok(cm)
    }

    async fn patch_status(&self, id: &ResourceId, status: ProxyConfigStatus) -> Result<()> {
        let api = Api::<ProxyConfig>::namespaced(self.client.clone(), &id.namespace);
        let params = PatchParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        let patch = Patch::Merge(json!({ "status": status }));
        match api.patch_status(&id.name, &params, &patch).await {
            Ok(_) => Ok(()),
            // The ProxyConfig was deleted; there is nothing left to report.
            Err(error) if is_not_found(&error) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn record(&self, config: &ProxyConfig, event: SyncEvent) -> Result<()> {
        let type_ = if event.is_warning() {
            EventType::Warning
        } else {
            EventType::Normal
        };
        let event = Event {
            type_,
            reason: event.reason().to_string(),
            note: Some(event.message()),
            action: "Sync".to_string(),
            secondary: None,
        };
        let reference: k8s::ObjectReference = config.object_ref(&());
        self.recorder.publish(&event, &reference).await?;
        Ok(())
    }
}
