use std::time::Duration;

use crate::sync::SyncConfig;

/// Where and how a client session talks to the server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, e.g. `http://localhost:3000`.
    pub http_base: String,
    /// WebSocket gateway URL, e.g. `ws://localhost:3000/gateway`.
    pub gateway_url: String,
    /// Bearer token from the identity provider.
    pub token: String,
    /// Re-fetch cadence while the gateway is down.
    pub poll_interval: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl ClientConfig {
    pub fn new(
        http_base: impl Into<String>,
        gateway_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http_base: http_base.into().trim_end_matches('/').to_string(),
            gateway_url: gateway_url.into(),
            token: token.into(),
            poll_interval: Duration::from_secs(1),
            reconnect_min: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(10),
        }
    }

    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: self.poll_interval,
        }
    }
}
