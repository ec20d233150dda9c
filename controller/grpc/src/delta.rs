use crate::{metrics::StreamMetrics, resources::TypeUrl};
use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, Resource,
};
use maestro_controller_core::Snapshot;
use std::collections::{btree_map::Entry, BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

const WILDCARD: &str = "*";

/// Tracks the per-resource versions an incremental stream's client holds.
#[derive(Debug)]
pub(crate) struct DeltaState {
    default_type: Option<TypeUrl>,
    subscriptions: BTreeMap<TypeUrl, Subscription>,
    nonce: u64,
    metrics: StreamMetrics,
}

#[derive(Debug, Default)]
struct Subscription {
    wildcard: bool,
    names: BTreeSet<String>,

    /// Resource name to the version the client is known to hold.
    sent: HashMap<String, String>,
    last_nonce: Option<String>,
}

// === impl DeltaState ===

impl DeltaState {
    pub(crate) fn new(default_type: Option<TypeUrl>, metrics: StreamMetrics) -> Self {
        Self {
            default_type,
            subscriptions: BTreeMap::new(),
            nonce: 0,
            metrics,
        }
    }

    pub(crate) fn on_request(
        &mut self,
        req: DeltaDiscoveryRequest,
        snapshot: Option<&Snapshot>,
    ) -> Option<DeltaDiscoveryResponse> {
        let type_url = match TypeUrl::resolve(&req.type_url, self.default_type) {
            Ok(t) => t,
            Err(error) => {
                warn!(%error, "Ignoring request");
                return None;
            }
        };

        let sub = match self.subscriptions.entry(type_url) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let wildcard = req.resource_names_subscribe.is_empty()
                    || req.resource_names_subscribe.iter().any(|n| n == WILDCARD);
                debug!(%type_url, wildcard, names = ?req.resource_names_subscribe, "Subscribed");
                e.insert(Subscription {
                    wildcard,
                    sent: req.initial_resource_versions.clone(),
                    ..Default::default()
                })
            }
        };

        // Nonces only pair ACKs and NACKs with responses. Subscription changes
        // apply whatever nonce they carry.
        match sub.last_nonce.as_deref() {
            Some(last) if req.response_nonce != last => {
                debug!(%type_url, nonce = %req.response_nonce, "Stale nonce");
            }
            Some(_) => match req.error_detail.as_ref() {
                Some(error) => {
                    self.metrics.nack(type_url);
                    warn!(%type_url, nonce = %req.response_nonce, code = error.code, message = %error.message, "Configuration rejected");
                }
                None => debug!(%type_url, nonce = %req.response_nonce, "Acknowledged"),
            },
            None => {}
        }

        for name in req.resource_names_subscribe {
            if name == WILDCARD {
                sub.wildcard = true;
            } else {
                sub.names.insert(name);
            }
        }
        for name in req.resource_names_unsubscribe {
            if name == WILDCARD {
                sub.wildcard = false;
            } else {
                sub.names.remove(&name);
            }
            sub.sent.remove(&name);
        }

        let snapshot = snapshot?;
        diff(type_url, sub, snapshot, &mut self.nonce, &self.metrics)
    }

    /// Computes a response for each subscription whose resources differ from
    /// what the client holds.
    pub(crate) fn on_snapshot(&mut self, snapshot: &Snapshot) -> Vec<DeltaDiscoveryResponse> {
        let mut responses = vec![];
        for (type_url, sub) in self.subscriptions.iter_mut() {
            if let Some(rsp) = diff(*type_url, sub, snapshot, &mut self.nonce, &self.metrics) {
                responses.push(rsp);
            }
        }
        responses
    }
}

// === impl Subscription ===

impl Subscription {
    fn includes(&self, name: &str) -> bool {
        self.wildcard || self.names.contains(name)
    }
}

fn diff(
    type_url: TypeUrl,
    sub: &mut Subscription,
    snapshot: &Snapshot,
    nonce: &mut u64,
    metrics: &StreamMetrics,
) -> Option<DeltaDiscoveryResponse> {
    let current = type_url.resources(snapshot);

    let mut resources = vec![];
    for res in current.values() {
        if !sub.includes(&res.name) {
            continue;
        }
        if sub.sent.get(&res.name) == Some(&res.version) {
            continue;
        }
        sub.sent.insert(res.name.clone(), res.version.clone());
        resources.push(Resource {
            name: res.name.clone(),
            version: res.version.clone(),
            resource: Some(res.resource.clone()),
            ..Default::default()
        });
    }

    let mut removed_resources = sub
        .sent
        .keys()
        .filter(|name| !current.contains_key(*name) || !sub.includes(name))
        .cloned()
        .collect::<Vec<_>>();
    removed_resources.sort();
    for name in &removed_resources {
        sub.sent.remove(name);
    }

    if resources.is_empty() && removed_resources.is_empty() {
        return None;
    }

    *nonce += 1;
    let nonce = nonce.to_string();
    debug!(
        %type_url,
        version = %snapshot.version,
        %nonce,
        changed = resources.len(),
        removed = removed_resources.len(),
        "Sending response"
    );
    metrics.response(type_url);
    sub.last_nonce = Some(nonce.clone());
    Some(DeltaDiscoveryResponse {
        system_version_info: snapshot.version.to_string(),
        resources,
        type_url: type_url.as_str().to_string(),
        removed_resources,
        nonce,
        ..Default::default()
    })
}
