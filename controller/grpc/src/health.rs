//! A client for the gRPC health checking protocol, used to check a running
//! server from the command line.

use std::time::Duration;
use tonic::{transport::Endpoint, Status};
use tonic_health::pb::{
    health_check_response::ServingStatus, health_client::HealthClient, HealthCheckRequest,
};

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("health check failed: {0}")]
    Rpc(#[from] Status),

    #[error("service is {}", .0.as_str_name())]
    NotServing(ServingStatus),
}

/// Asks the server at `addr` whether `service` is serving. The empty service
/// name checks the server as a whole.
pub async fn check(addr: &str, service: &str, timeout: Duration) -> Result<(), CheckError> {
    let connect_failed = |source: tonic::transport::Error| CheckError::Connect {
        addr: addr.to_string(),
        source,
    };
    let channel = Endpoint::from_shared(format!("http://{addr}"))
        .map_err(connect_failed)?
        .connect_timeout(timeout)
        .timeout(timeout)
        .connect()
        .await
        .map_err(connect_failed)?;

    let rsp = HealthClient::new(channel)
        .check(HealthCheckRequest {
            service: service.to_string(),
        })
        .await?
        .into_inner();
    match rsp.status() {
        ServingStatus::Serving => Ok(()),
        status => Err(CheckError::NotServing(status)),
    }
}

// === impl CheckError ===

impl CheckError {
    /// The process exit code that reports this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Connect { .. } => 1,
            Self::Rpc(_) => 2,
            Self::NotServing(_) => 3,
        }
    }
}
