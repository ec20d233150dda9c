use crate::DiscoveryServer;
use envoy_types::pb::envoy::service::{
    cluster::v3::cluster_discovery_service_server::ClusterDiscoveryServiceServer,
    discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer,
    endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryServiceServer,
};
use futures::prelude::*;
use maestro_controller_core::DiscoverSnapshots;
use std::{net::SocketAddr, time::Duration};
use tokio::{sync::oneshot, task::JoinHandle, time};
use tonic::transport::Server;
use tonic_health::server::HealthReporter;
use tracing::{info, instrument, warn};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bounds how long open streams may delay shutdown.
    pub shutdown_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("gRPC transport failed: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("gRPC server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("gRPC server did not shut down within {0:?}")]
    ShutdownTimeout(Duration),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Serves the discovery services and gRPC health checks on `addr` until
/// `drain` is signaled.
#[instrument(skip_all, fields(port = %addr.port()))]
pub async fn serve<T>(
    addr: SocketAddr,
    server: DiscoveryServer<T>,
    config: ServerConfig,
    drain: drain::Watch,
) -> Result<(), Error>
where
    T: DiscoverSnapshots + Clone + Send + Sync + 'static,
{
    let (mut health, health_svc) = tonic_health::server::health_reporter();
    set_serving::<T>(&mut health, true).await;

    let (close_tx, close_rx) = oneshot::channel();
    let srv = Server::builder()
        .add_service(health_svc)
        .add_service(server.aggregated_svc())
        .add_service(server.endpoint_svc())
        .add_service(server.cluster_svc())
        .serve_with_shutdown(addr, close_rx.map(|_| {}));
    let mut task = tokio::spawn(srv);

    info!(%addr, "xDS gRPC server listening");
    tokio::select! {
        res = &mut task => res??,
        handle = drain.signaled() => {
            set_serving::<T>(&mut health, false).await;
            let _ = close_tx.send(());
            handle.release_after(wait_for_shutdown(task, config.shutdown_timeout)).await?
        }
    }
    Ok(())
}

/// Waits for the server task to complete, aborting it if it does not complete
/// within `timeout`.
pub async fn wait_for_shutdown<E>(
    mut task: JoinHandle<Result<(), E>>,
    timeout: Duration,
) -> Result<(), Error>
where
    Error: From<E>,
{
    match time::timeout(timeout, &mut task).await {
        Ok(res) => Ok(res??),
        Err(_) => {
            warn!(?timeout, "gRPC server did not shut down gracefully");
            task.abort();
            Err(Error::ShutdownTimeout(timeout))
        }
    }
}

pub(crate) async fn set_serving<T>(health: &mut HealthReporter, serving: bool)
where
    T: DiscoverSnapshots + Clone + Send + Sync + 'static,
{
    if serving {
        health
            .set_serving::<AggregatedDiscoveryServiceServer<DiscoveryServer<T>>>()
            .await;
        health
            .set_serving::<EndpointDiscoveryServiceServer<DiscoveryServer<T>>>()
            .await;
        health
            .set_serving::<ClusterDiscoveryServiceServer<DiscoveryServer<T>>>()
            .await;
    } else {
        health
            .set_not_serving::<AggregatedDiscoveryServiceServer<DiscoveryServer<T>>>()
            .await;
        health
            .set_not_serving::<EndpointDiscoveryServiceServer<DiscoveryServer<T>>>()
            .await;
        health
            .set_not_serving::<ClusterDiscoveryServiceServer<DiscoveryServer<T>>>()
            .await;
    }
}
