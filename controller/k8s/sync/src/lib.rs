//! Converges each ProxyConfig with the ConfigMap generated from it.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod api;
mod render;


pub use self::{
    api::{ClusterApi, KubeApi, SyncEvent},
    render::{BootstrapRenderer, Render},
};
use anyhow::anyhow;
use maestro_controller_k8s_api::{
    ArtifactOwner, ConfigMap, ObjectMeta, ProxyConfig, ProxyConfigStatus, Resource, ResourceExt,
    ResourceId, CONTROLLER_LABEL,
};
use maestro_controller_workqueue::Reconcile;
use maplit::btreemap;
use tracing::{debug, info, warn};

/// The ConfigMap key that holds the rendered proxy configuration.
pub const DATA_KEY: &str = "envoy.yaml";

#[derive(Clone, Debug)]
pub struct Config {
    /// Prepended to a ProxyConfig's name to name its ConfigMap.
    pub config_map_prefix: String,

    /// The SPIFFE trust domain passed to the renderer.
    pub trust_domain: String,
}

/// Reconciles ProxyConfigs.
#[derive(Debug)]
pub struct Syncer<A, R = BootstrapRenderer> {
    api: A,
    renderer: R,
    config: Config,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("ConfigMap {artifact} already exists and is not managed by ProxyConfig {config}")]
    NotOwned {
        artifact: ResourceId,
        config: ResourceId,
    },

    #[error("failed to render ProxyConfig {config}: {error:#}")]
    Render {
        config: ResourceId,
        error: anyhow::Error,
    },

    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            config_map_prefix: "proxy-config-".to_string(),
            trust_domain: "cluster.local".to_string(),
        }
    }
}

// === impl Syncer ===

impl<A: ClusterApi, R: Render> Syncer<A, R> {
    pub fn new(api: A, renderer: R, config: Config) -> Self {
        Self {
            api,
            renderer,
            config,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// The name of the ConfigMap generated for the ProxyConfig `name`.
    pub fn artifact_name(&self, name: &str) -> String {
        format!("{}{}", self.config.config_map_prefix, name)
    }

    /// Converges the ProxyConfig `id` with its ConfigMap.
    ///
    /// The ProxyConfig's status is only updated after the ConfigMap holds the
    /// rendered configuration, so a status that names the ConfigMap's current
    /// version means the two have converged.
    pub async fn sync(&self, id: &ResourceId) -> Result<(), SyncError> {
        let Some(config) = self.api.proxy_config(id).await? else {
            debug!(%id, "ProxyConfig no longer exists");
            return Ok(());
        };

        let artifact = ResourceId::new(id.namespace.clone(), self.artifact_name(&id.name));
        let data = self
            .renderer
            .render(&config.spec, &self.config.trust_domain)
            .map_err(|error| SyncError::Render {
                config: id.clone(),
                error,
            })?;

        let cm = match self.api.config_map(&artifact).await? {
            Some(cm) => cm,
            None => {
                info!(%artifact, "Creating ConfigMap");
                let cm = mk_artifact(&config, &artifact, data.clone())?;
                self.api.create_config_map(cm).await?
            }
        };

        if !ArtifactOwner::of(&cm.metadata).is(&config) {
            warn!(%artifact, owner = ?ArtifactOwner::of(&cm.metadata), "ConfigMap is controlled by another owner");
            self.record(
                &config,
                SyncEvent::ResourceExists {
                    artifact: artifact.name.clone(),
                },
            )
            .await;
            return Err(SyncError::NotOwned {
                artifact,
                config: id.clone(),
            });
        }

        let current = cm.data.as_ref().and_then(|d| d.get(DATA_KEY));
        let cm = if current != Some(&data) {
            info!(%artifact, "Updating ConfigMap");
            let mut cm = cm;
            cm.data = Some(btreemap! { DATA_KEY.to_string() => data });
            self.api.replace_config_map(cm).await?
        } else {
            cm
        };

        let resource_version = cm.resource_version().unwrap_or_default();
        let recorded = config.status.as_ref().map(|s| s.resource_version.as_str());
        if recorded != Some(resource_version.as_str()) {
            debug!(%id, %resource_version, "Updating status");
            self.api
                .patch_status(id, ProxyConfigStatus { resource_version })
                .await?;
        }

        self.record(&config, SyncEvent::Synced).await;
        Ok(())
    }

    async fn record(&self, config: &ProxyConfig, event: SyncEvent) {
        if let Err(error) = self.api.record(config, event).await {
            tracing::error!(%error, "Failed to publish event");
        }
    }
}

#[async_trait::async_trait]
impl<A: ClusterApi, R: Render> Reconcile<ResourceId> for Syncer<A, R> {
    async fn reconcile(&self, id: &ResourceId) -> anyhow::Result<()> {
        self.sync(id).await.map_err(Into::into)
    }
}

fn mk_artifact(config: &ProxyConfig, id: &ResourceId, data: String) -> anyhow::Result<ConfigMap> {
    let owner = config
        .controller_owner_ref(&())
        .ok_or_else(|| anyhow!("ProxyConfig {} has no uid", config.name_any()))?;
    let (label, value) = CONTROLLER_LABEL;
    Ok(ConfigMap {
        metadata: ObjectMeta {
            namespace: Some(id.namespace.clone()),
            name: Some(id.name.clone()),
            labels: Some(btreemap! { label.to_string() => value.to_string() }),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        data: Some(btreemap! { DATA_KEY.to_string() => data }),
        ..Default::default()
    })
}
