use crate::grpc;
use std::time::Duration;
use tracing::{error, info};

/// Checks whether a discovery server reports itself as serving.
///
/// Exits with 1 if the server cannot be reached, 2 if the check itself fails,
/// and 3 if the service is not serving.
#[derive(Debug, clap::Args)]
pub(crate) struct HealthArgs {
    /// The `host:port` of the gRPC server to check.
    #[clap(long)]
    pub(crate) addr: String,

    /// The service to check. By default the server as a whole is checked.
    #[clap(long, default_value = "")]
    pub(crate) service: String,

    #[clap(long, default_value = "1")]
    pub(crate) rpc_timeout_secs: u64,
}

impl HealthArgs {
    /// Runs the check, returning the process's exit code.
    pub(crate) async fn run(self) -> i32 {
        let Self {
            addr,
            service,
            rpc_timeout_secs,
        } = self;

        let timeout = Duration::from_secs(rpc_timeout_secs);
        match grpc::health::check(&addr, &service, timeout).await {
            Ok(()) => {
                info!(%addr, %service, "Serving");
                0
            }
            Err(error) => {
                error!(%addr, %service, %error, "Health check failed");
                error.exit_code()
            }
        }
    }
}
