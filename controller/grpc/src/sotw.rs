use crate::{
    metrics::StreamMetrics,
    resources::{NamedResource, TypeUrl},
};
use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use maestro_controller_core::{Snapshot, Version};
use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Tracks what a state-of-the-world stream has subscribed to and been sent.
#[derive(Debug)]
pub(crate) struct SotwState {
    default_type: Option<TypeUrl>,
    subscriptions: BTreeMap<TypeUrl, Subscription>,
    nonce: u64,
    metrics: StreamMetrics,
}

#[derive(Debug, Default)]
struct Subscription {
    /// An empty set subscribes to all resources of the type.
    names: BTreeSet<String>,

    /// The version the client reported when it subscribed, if any.
    client_version: Option<String>,
    sent: Option<Sent>,
    acked: Option<String>,
}

#[derive(Debug)]
struct Sent {
    version: Version,
    nonce: String,
}

// === impl SotwState ===

impl SotwState {
    pub(crate) fn new(default_type: Option<TypeUrl>, metrics: StreamMetrics) -> Self {
        Self {
            default_type,
            subscriptions: BTreeMap::new(),
            nonce: 0,
            metrics,
        }
    }

    /// Processes a request, returning a response if the client must be sent
    /// one.
    pub(crate) fn on_request(
        &mut self,
        req: DiscoveryRequest,
        snapshot: Option<&Snapshot>,
    ) -> Option<DiscoveryResponse> {
        let type_url = match TypeUrl::resolve(&req.type_url, self.default_type) {
            Ok(t) => t,
            Err(error) => {
                warn!(%error, "Ignoring request");
                return None;
            }
        };
        let names = req.resource_names.into_iter().collect::<BTreeSet<_>>();

        let sub = match self.subscriptions.entry(type_url) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                debug!(%type_url, ?names, "Subscribed");
                let sub = e.insert(Subscription {
                    names,
                    client_version: Some(req.version_info).filter(|v| !v.is_empty()),
                    ..Default::default()
                });
                let snapshot = snapshot?;
                if sub.client_version.as_deref() == Some(snapshot.version.to_string().as_str()) {
                    debug!(%type_url, version = %snapshot.version, "Client is current");
                    return None;
                }
                let nonce = next_nonce(&mut self.nonce);
                return Some(respond(type_url, sub, snapshot, nonce, &self.metrics));
            }
        };

        if let Some(sent) = sub.sent.as_ref() {
            if req.response_nonce != sent.nonce {
                debug!(%type_url, nonce = %req.response_nonce, "Ignoring stale request");
                return None;
            }
        }

        match req.error_detail {
            Some(error) => {
                self.metrics.nack(type_url);
                warn!(%type_url, version = %req.version_info, code = error.code, message = %error.message, "Configuration rejected");
            }
            None if !req.version_info.is_empty() => {
                debug!(%type_url, version = %req.version_info, "Acknowledged");
                sub.acked = Some(req.version_info);
            }
            None => {}
        }

        if names == sub.names {
            return None;
        }
        debug!(%type_url, ?names, "Subscription changed");
        sub.names = names;
        let snapshot = snapshot?;
        let nonce = next_nonce(&mut self.nonce);
        Some(respond(type_url, sub, snapshot, nonce, &self.metrics))
    }

    /// Processes a new snapshot, returning a response for each subscription
    /// that has not yet been sent this or a newer version.
    pub(crate) fn on_snapshot(&mut self, snapshot: &Snapshot) -> Vec<DiscoveryResponse> {
        let mut responses = vec![];
        for (type_url, sub) in self.subscriptions.iter_mut() {
            match sub.sent.as_ref() {
                Some(sent) if sent.version >= snapshot.version => continue,
                None if sub.client_version.as_deref() == Some(snapshot.version.to_string().as_str()) => {
                    continue
                }
                _ => {}
            }
            let nonce = next_nonce(&mut self.nonce);
            responses.push(respond(*type_url, sub, snapshot, nonce, &self.metrics));
        }
        responses
    }

    #[cfg(test)]
    pub(crate) fn acked(&self, type_url: TypeUrl) -> Option<&str> {
        self.subscriptions.get(&type_url)?.acked.as_deref()
    }
}

fn next_nonce(nonce: &mut u64) -> String {
    *nonce += 1;
    nonce.to_string()
}

fn respond(
    type_url: TypeUrl,
    sub: &mut Subscription,
    snapshot: &Snapshot,
    nonce: String,
    metrics: &StreamMetrics,
) -> DiscoveryResponse {
    let resources = type_url
        .resources(snapshot)
        .into_values()
        .filter(|r| sub.names.is_empty() || sub.names.contains(&r.name))
        .map(|NamedResource { resource, .. }| resource)
        .collect::<Vec<_>>();
    debug!(%type_url, version = %snapshot.version, %nonce, resources = resources.len(), "Sending response");
    metrics.response(type_url);

    sub.sent = Some(Sent {
        version: snapshot.version.clone(),
        nonce: nonce.clone(),
    });
    DiscoveryResponse {
        version_info: snapshot.version.to_string(),
        resources,
        type_url: type_url.as_str().to_string(),
        nonce,
        ..Default::default()
    }
}
