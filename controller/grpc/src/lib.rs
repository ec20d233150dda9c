//! Envoy discovery services backed by versioned snapshots.
//!
//! Each stream watches the snapshots published for the node named in its
//! first request. The aggregated service multiplexes clusters and load
//! assignments over a single stream; the standalone cluster and endpoint
//! services serve one type each.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod delta;
pub mod health;
pub mod metrics;
pub mod resources;
mod serve;
mod sotw;


pub use self::{
    metrics::ServerMetrics,
    resources::TypeUrl,
    serve::{serve, wait_for_shutdown, Error, ServerConfig},
};
use self::{delta::DeltaState, metrics::StreamKind, sotw::SotwState};
use envoy_types::pb::envoy::{
    config::core::v3::Node,
    service::{
        cluster::v3::cluster_discovery_service_server::{
            ClusterDiscoveryService, ClusterDiscoveryServiceServer,
        },
        discovery::v3::{
            aggregated_discovery_service_server::{
                AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
            },
            DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
        },
        endpoint::v3::endpoint_discovery_service_server::{
            EndpointDiscoveryService, EndpointDiscoveryServiceServer,
        },
    },
};
use futures::prelude::*;
use maestro_controller_core::{DiscoverSnapshots, Snapshot, SnapshotStream};
use std::{pin::Pin, sync::Arc};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

/// Serves snapshots to proxies over the discovery protocols.
#[derive(Clone, Debug)]
pub struct DiscoveryServer<T> {
    discover: T,
    drain: drain::Watch,
    metrics: ServerMetrics,
}

pub type SotwResponseStream =
    Pin<Box<dyn Stream<Item = Result<DiscoveryResponse, Status>> + Send + 'static>>;

pub type DeltaResponseStream =
    Pin<Box<dyn Stream<Item = Result<DeltaDiscoveryResponse, Status>> + Send + 'static>>;

/// Whatever a discovery stream's loop woke up for.
enum Event<R> {
    Request(Option<Result<R, Status>>),
    Snapshot(Option<Arc<Snapshot>>),
    Shutdown,
}

// === impl DiscoveryServer ===

impl<T> DiscoveryServer<T>
where
    T: DiscoverSnapshots + Clone + Send + Sync + 'static,
{
    pub fn new(discover: T, drain: drain::Watch, metrics: ServerMetrics) -> Self {
        Self {
            discover,
            drain,
            metrics,
        }
    }

    pub fn aggregated_svc(&self) -> AggregatedDiscoveryServiceServer<Self> {
        AggregatedDiscoveryServiceServer::new(self.clone())
    }

    pub fn endpoint_svc(&self) -> EndpointDiscoveryServiceServer<Self> {
        EndpointDiscoveryServiceServer::new(self.clone())
    }

    pub fn cluster_svc(&self) -> ClusterDiscoveryServiceServer<Self> {
        ClusterDiscoveryServiceServer::new(self.clone())
    }

    /// Serves a state-of-the-world stream. Requests that omit a type URL are
    /// treated as `default_type`.
    pub fn sotw_stream<S>(&self, requests: S, default_type: Option<TypeUrl>) -> SotwResponseStream
    where
        S: Stream<Item = Result<DiscoveryRequest, Status>> + Send + 'static,
    {
        let discover = self.discover.clone();
        let drain = self.drain.clone();
        let metrics = self.metrics.clone();
        Box::pin(async_stream::try_stream! {
            let mut requests = Box::pin(requests);
            let first = match requests.next().await {
                Some(req) => req?,
                None => return,
            };
            let node = node_id(first.node.as_ref())?;
            let mut snapshots = watch(&discover, &node).await?;
            info!(%node, "Discovery stream opened");

            let mut state = SotwState::new(default_type, metrics.open(StreamKind::Sotw));
            let mut snapshot: Option<Arc<Snapshot>> = None;
            if let Some(rsp) = state.on_request(first, None) {
                yield rsp;
            }

            tokio::pin! {
                let shutdown = drain.signaled();
            }
            loop {
                let event = tokio::select! {
                    req = requests.next() => Event::Request(req),
                    next = snapshots.next() => Event::Snapshot(next),
                    _ = (&mut shutdown) => Event::Shutdown,
                };
                match event {
                    Event::Request(Some(req)) => {
                        if let Some(rsp) = state.on_request(req?, snapshot.as_deref()) {
                            yield rsp;
                        }
                    }
                    Event::Request(None) => {
                        debug!(%node, "Client closed discovery stream");
                        return;
                    }
                    Event::Snapshot(Some(next)) => {
                        for rsp in state.on_snapshot(&next) {
                            yield rsp;
                        }
                        snapshot = Some(next);
                    }
                    Event::Snapshot(None) => return,
                    // Close the stream so that it doesn't hold the server open.
                    Event::Shutdown => return,
                }
            }
        })
    }

    /// Serves an incremental stream. Requests that omit a type URL are treated
    /// as `default_type`.
    pub fn delta_stream<S>(
        &self,
        requests: S,
        default_type: Option<TypeUrl>,
    ) -> DeltaResponseStream
    where
        S: Stream<Item = Result<DeltaDiscoveryRequest, Status>> + Send + 'static,
    {
        let discover = self.discover.clone();
        let drain = self.drain.clone();
        let metrics = self.metrics.clone();
        Box::pin(async_stream::try_stream! {
            let mut requests = Box::pin(requests);
            let first = match requests.next().await {
                Some(req) => req?,
                None => return,
            };
            let node = node_id(first.node.as_ref())?;
            let mut snapshots = watch(&discover, &node).await?;
            info!(%node, "Incremental discovery stream opened");

            let mut state = DeltaState::new(default_type, metrics.open(StreamKind::Delta));
            let mut snapshot: Option<Arc<Snapshot>> = None;
            if let Some(rsp) = state.on_request(first, None) {
                yield rsp;
            }

            tokio::pin! {
                let shutdown = drain.signaled();
            }
            loop {
                let event = tokio::select! {
                    req = requests.next() => Event::Request(req),
                    next = snapshots.next() => Event::Snapshot(next),
                    _ = (&mut shutdown) => Event::Shutdown,
                };
                match event {
                    Event::Request(Some(req)) => {
                        if let Some(rsp) = state.on_request(req?, snapshot.as_deref()) {
                            yield rsp;
                        }
                    }
                    Event::Request(None) => {
                        debug!(%node, "Client closed incremental discovery stream");
                        return;
                    }
                    Event::Snapshot(Some(next)) => {
                        for rsp in state.on_snapshot(&next) {
                            yield rsp;
                        }
                        snapshot = Some(next);
                    }
                    Event::Snapshot(None) => return,
                    Event::Shutdown => return,
                }
            }
        })
    }
}

fn node_id(node: Option<&Node>) -> Result<String, Status> {
    node.map(|n| n.id.clone())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Status::invalid_argument("first request must identify its node"))
}

async fn watch<T: DiscoverSnapshots>(discover: &T, node: &str) -> Result<SnapshotStream, Status> {
    discover
        .watch_snapshots(node)
        .await
        .map_err(|e| Status::internal(format!("lookup failed: {e}")))
}

#[async_trait::async_trait]
impl<T> AggregatedDiscoveryService for DiscoveryServer<T>
where
    T: DiscoverSnapshots + Clone + Send + Sync + 'static,
{
    type StreamAggregatedResourcesStream = SotwResponseStream;

    async fn stream_aggregated_resources(
        &self,
        req: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<SotwResponseStream>, Status> {
        Ok(Response::new(self.sotw_stream(req.into_inner(), None)))
    }

    type DeltaAggregatedResourcesStream = DeltaResponseStream;

    async fn delta_aggregated_resources(
        &self,
        req: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<DeltaResponseStream>, Status> {
        Ok(Response::new(self.delta_stream(req.into_inner(), None)))
    }
}

#[async_trait::async_trait]
impl<T> EndpointDiscoveryService for DiscoveryServer<T>
where
    T: DiscoverSnapshots + Clone + Send + Sync + 'static,
{
    type StreamEndpointsStream = SotwResponseStream;

    async fn stream_endpoints(
        &self,
        req: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<SotwResponseStream>, Status> {
        let stream = self.sotw_stream(req.into_inner(), Some(TypeUrl::Endpoint));
        Ok(Response::new(stream))
    }

    type DeltaEndpointsStream = DeltaResponseStream;

    async fn delta_endpoints(
        &self,
        req: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<DeltaResponseStream>, Status> {
        let stream = self.delta_stream(req.into_inner(), Some(TypeUrl::Endpoint));
        Ok(Response::new(stream))
    }

    async fn fetch_endpoints(
        &self,
        _req: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        Err(Status::unimplemented("fetch is not supported"))
    }
}

#[async_trait::async_trait]
impl<T> ClusterDiscoveryService for DiscoveryServer<T>
where
    T: DiscoverSnapshots + Clone + Send + Sync + 'static,
{
    type StreamClustersStream = SotwResponseStream;

    async fn stream_clusters(
        &self,
        req: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<SotwResponseStream>, Status> {
        let stream = self.sotw_stream(req.into_inner(), Some(TypeUrl::Cluster));
        Ok(Response::new(stream))
    }

    type DeltaClustersStream = DeltaResponseStream;

    async fn delta_clusters(
        &self,
        req: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<DeltaResponseStream>, Status> {
        let stream = self.delta_stream(req.into_inner(), Some(TypeUrl::Cluster));
        Ok(Response::new(stream))
    }

    async fn fetch_clusters(
        &self,
        _req: Request<DiscoveryRequest>,
    ) -> Result<Response<DiscoveryResponse>, Status> {
        Err(Status::unimplemented("fetch is not supported"))
    }
}
