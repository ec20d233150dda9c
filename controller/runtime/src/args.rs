use crate::{
    grpc,
    index::{self, EndpointRegistry, Registrar, SnapshotCache, SnapshotMetrics},
    k8s::{self, watcher, ResourceId, CONTROLLER_LABEL},
    sync::{self, BootstrapRenderer, KubeApi, Syncer},
    health::HealthArgs,
    workqueue::{self, QueueMetrics, WorkQueue},
    SnapshotDiscover,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, process::exit, sync::Arc, time::Duration};
use tracing::{error, info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "maestro", about = "An Envoy control plane for Kubernetes")]
pub struct Args {
    #[clap(
        long,
        default_value = "maestro=info,warn",
        env = "MAESTRO_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "0.0.0.0:50051")]
    grpc_addr: SocketAddr,

    /// Identifies this controller instance on the events it records.
    #[clap(long, default_value = "unknown")]
    cluster_name: String,

    #[clap(long, default_value = "proxy-config-")]
    config_map_prefix: String,

    #[clap(long, default_value = "cluster.local")]
    spire_trust_domain: String,

    /// The number of workers processing each work queue.
    #[clap(long, default_value = "2")]
    workers: usize,

    #[clap(long, default_value = "5")]
    retry_base_delay_ms: u64,

    #[clap(long, default_value = "1000")]
    retry_max_delay_secs: u64,

    /// The sustained rate at which failed keys are retried.
    #[clap(long, default_value = "50")]
    retry_qps: f64,

    #[clap(long, default_value = "300")]
    retry_burst: u32,

    /// Bounds how long the discovery server waits for open streams on
    /// shutdown.
    #[clap(long, default_value = "30")]
    shutdown_timeout_secs: u64,

    /// Disables the ProxyConfig controller.
    #[clap(long)]
    controller_disabled: bool,

    /// Disables the EndpointSlice registrar.
    #[clap(long)]
    registrar_disabled: bool,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    GrpcHealth(HealthArgs),
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            grpc_addr,
            cluster_name,
            config_map_prefix,
            spire_trust_domain,
            workers,
            retry_base_delay_ms,
            retry_max_delay_secs,
            retry_qps,
            retry_burst,
            shutdown_timeout_secs,
            controller_disabled,
            registrar_disabled,
            command,
        } = self;

        if let Some(Command::GrpcHealth(check)) = command {
            log_format.try_init(log_level)?;
            exit(check.run().await);
        }

        if retry_qps <= 0.0 {
            bail!("--retry-qps must be positive");
        }
        let queue_config = workqueue::Config {
            workers,
            base_delay: Duration::from_millis(retry_base_delay_ms),
            max_delay: Duration::from_secs(retry_max_delay_secs),
            qps: retry_qps,
            burst: retry_burst,
        };

        let mut prom = <Registry>::default();
        let queues = prom.sub_registry_with_prefix("workqueue");
        let slice_queue = WorkQueue::<ResourceId>::new(
            &queue_config,
            QueueMetrics::register(
                queues.sub_registry_with_label(("name".into(), "endpointslices".into())),
            ),
        );
        let config_queue = WorkQueue::<ResourceId>::new(
            &queue_config,
            QueueMetrics::register(
                queues.sub_registry_with_label(("name".into(), "proxyconfigs".into())),
            ),
        );

        // Build the indexes that cache watched resources and feed the queues.
        let slices = index::endpoint_slice::Index::shared(slice_queue.clone());
        let configs = index::proxy_config::Index::shared(config_queue.clone());
        let registry = Arc::new(EndpointRegistry::default());
        let snapshots = SnapshotCache::shared(SnapshotMetrics::register(
            prom.sub_registry_with_prefix("snapshot"),
        ));
        index::metrics::register(
            prom.sub_registry_with_prefix("index"),
            registry.clone(),
            snapshots.clone(),
        );
        let xds_metrics = grpc::ServerMetrics::register(prom.sub_registry_with_prefix("xds"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Spawn resource watches and the workers that converge them.

        if registrar_disabled {
            info!("EndpointSlice registrar disabled");
        } else {
            let endpoint_slices =
                runtime.watch_all::<k8s::EndpointSlice>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(slices.clone(), endpoint_slices)
                    .instrument(info_span!("endpointslices")),
            );

            let registrar = Registrar::new(slices, registry, snapshots.clone());
            tokio::spawn(
                workqueue::run(
                    slice_queue,
                    Arc::new(registrar),
                    workers,
                    runtime.shutdown_handle(),
                )
                .instrument(info_span!("registrar")),
            );
        }

        if controller_disabled {
            info!("ProxyConfig controller disabled");
        } else {
            let proxy_configs =
                runtime.watch_all::<k8s::ProxyConfig>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(configs.clone(), proxy_configs)
                    .instrument(info_span!("proxyconfigs")),
            );

            let (key, value) = CONTROLLER_LABEL;
            let config_maps = runtime.watch_all::<k8s::ConfigMap>(
                watcher::Config::default().labels(&format!("{key}={value}")),
            );
            tokio::spawn(
                kubert::index::namespaced(configs.clone(), config_maps)
                    .instrument(info_span!("configmaps")),
            );

            let api = KubeApi::new(runtime.client(), configs, cluster_name);
            let syncer = Syncer::new(
                api,
                BootstrapRenderer::default(),
                sync::Config {
                    config_map_prefix,
                    trust_domain: spire_trust_domain,
                },
            );
            tokio::spawn(
                workqueue::run(
                    config_queue,
                    Arc::new(syncer),
                    workers,
                    runtime.shutdown_handle(),
                )
                .instrument(info_span!("syncer")),
            );
        }

        // Run the discovery server, serving snapshots from the cache.
        let server = grpc::DiscoveryServer::new(
            SnapshotDiscover::new(snapshots),
            runtime.shutdown_handle(),
            xds_metrics,
        );
        let config = grpc::ServerConfig {
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
        };
        let drain = runtime.shutdown_handle();
        tokio::spawn(
            async move {
                if let Err(error) = grpc::serve(grpc_addr, server, config, drain).await {
                    error!(%error, "Discovery server failed");
                }
            }
            .in_current_span(),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
