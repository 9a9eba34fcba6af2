//! Gateway server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the gateway server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Stage name used when an API resource declares none.
    pub stage: String,
    /// Whether to expose the health check endpoint.
    pub enable_health: bool,
    /// Whether to expose the route listing endpoint.
    pub enable_routes: bool,
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
    /// Handler deadline in seconds; 0 disables the deadline.
    pub request_timeout: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            stage: "v1".to_string(),
            enable_health: true,
            enable_routes: true,
            max_body_size: 10 * 1024 * 1024, // 10MB
            request_timeout: 30,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    pub fn request_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout = seconds;
        self
    }

    /// The socket address string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The handler deadline, when one is configured.
    pub fn deadline(&self) -> Option<std::time::Duration> {
        (self.request_timeout > 0).then(|| std::time::Duration::from_secs(self.request_timeout))
    }
}
