use crate::ProxyConfig;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{api::ObjectMeta, Resource};

/// The controller of an artifact, as recorded in its owner references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactOwner {
    ProxyConfig { name: String, uid: String },
    Other { api_version: String, kind: String, name: String },
    Unowned,
}

// === impl ArtifactOwner ===

impl ArtifactOwner {
    /// Reads the controlling owner reference of an object.
    pub fn of(meta: &ObjectMeta) -> Self {
        meta.owner_references
            .iter()
            .flatten()
            .find(|r| r.controller == Some(true))
            .map_or(Self::Unowned, Self::from_reference)
    }

    fn from_reference(reference: &OwnerReference) -> Self {
        if reference.api_version == ProxyConfig::api_version(&())
            && reference.kind == ProxyConfig::kind(&())
        {
            return Self::ProxyConfig {
                name: reference.name.clone(),
                uid: reference.uid.clone(),
            };
        }
        Self::Other {
            api_version: reference.api_version.clone(),
            kind: reference.kind.clone(),
            name: reference.name.clone(),
        }
    }

    /// Returns the name of the controlling ProxyConfig, if any.
    pub fn proxy_config(&self) -> Option<&str> {
        match self {
            Self::ProxyConfig { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Returns true if this owner is exactly `config`.
    ///
    /// A ProxyConfig that was deleted and recreated under the same name does
    /// not own the artifacts of its predecessor.
    pub fn is(&self, config: &ProxyConfig) -> bool {
        match self {
            Self::ProxyConfig { name, uid } => {
                Some(name) == config.metadata.name.as_ref()
                    && Some(uid) == config.metadata.uid.as_ref()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{proxy_config::Service, ProxyConfigSpec};
    use pretty_assertions::assert_eq;

    fn mk_config(name: &str, uid: &str) -> ProxyConfig {
        let mut config = ProxyConfig::new(
            name,
            ProxyConfigSpec {
                service: Service {
                    name: name.to_string(),
                    service_ports: vec![],
                    authn: None,
                    authz: None,
                },
            },
        );
        config.metadata.namespace = Some("ns-0".to_string());
        config.metadata.uid = Some(uid.to_string());
        config
    }

    fn mk_meta(refs: Vec<OwnerReference>) -> ObjectMeta {
        ObjectMeta {
            name: Some("proxy-config-svc-a".to_string()),
            owner_references: Some(refs),
            ..Default::default()
        }
    }

    #[test]
    fn parses_proxy_config_controller() {
        let config = mk_config("svc-a", "uid-a");
        let owner_ref = config.controller_owner_ref(&()).unwrap();
        let owner = ArtifactOwner::of(&mk_meta(vec![owner_ref]));
        assert_eq!(
            owner,
            ArtifactOwner::ProxyConfig {
                name: "svc-a".to_string(),
                uid: "uid-a".to_string(),
            }
        );
        assert!(owner.is(&config));
        assert_eq!(owner.proxy_config(), Some("svc-a"));
    }

    #[test]
    fn recreated_config_does_not_own_old_artifact() {
        let old = mk_config("svc-a", "uid-a");
        let owner = ArtifactOwner::of(&mk_meta(vec![old.controller_owner_ref(&()).unwrap()]));
        assert!(!owner.is(&mk_config("svc-a", "uid-b")));
    }

    #[test]
    fn ignores_non_controller_references() {
        let config = mk_config("svc-a", "uid-a");
        let mut owner_ref = config.controller_owner_ref(&()).unwrap();
        owner_ref.controller = None;
        assert_eq!(
            ArtifactOwner::of(&mk_meta(vec![owner_ref])),
            ArtifactOwner::Unowned
        );
        assert_eq!(
            ArtifactOwner::of(&ObjectMeta::default()),
            ArtifactOwner::Unowned
        );
    }

    #[test]
    fn same_kind_in_another_group_is_foreign() {
        let owner_ref = OwnerReference {
            api_version: "example.com/v1".to_string(),
            kind: "ProxyConfig".to_string(),
            name: "svc-a".to_string(),
            uid: "uid-a".to_string(),
            controller: Some(true),
            ..Default::default()
        };
        let owner = ArtifactOwner::of(&mk_meta(vec![owner_ref]));
        assert!(matches!(owner, ArtifactOwner::Other { .. }));
        assert!(!owner.is(&mk_config("svc-a", "uid-a")));
        assert_eq!(owner.proxy_config(), None);
    }
}
