use std::fmt;

/// The application protocol assumed when an endpoint source omits one.
pub const DEFAULT_APP_PROTOCOL: &str = "tcp";

/// Identifies a logical service as `<name>.<namespace>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(String);

/// A single network endpoint of a service.
///
/// Two endpoints are the same endpoint iff their protocol, address, and port
/// all match; [`Endpoint::key`] renders that identity as a string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    address: String,
    port: u16,
    app_protocol: String,
}

// === impl ServiceId ===

impl ServiceId {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self(format!("{name}.{namespace}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl Endpoint ===

impl Endpoint {
    /// Builds an endpoint, falling back to [`DEFAULT_APP_PROTOCOL`] when no
    /// application protocol is known.
    pub fn new(address: impl Into<String>, port: u16, app_protocol: Option<&str>) -> Self {
        let app_protocol = app_protocol
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_APP_PROTOCOL);
        Self {
            address: address.into(),
            port,
            app_protocol: app_protocol.to_string(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn app_protocol(&self) -> &str {
        &self.app_protocol
    }

    /// The canonical `protocol:address:port` identity of this endpoint.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.app_protocol, self.address, self.port)
    }
}
