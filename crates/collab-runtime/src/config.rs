//! Runtime configuration.

use std::time::Duration;

use collab_core::{ConnectionConfig, ReconnectPolicy};

/// Everything the runtime needs besides a credential.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Endpoint and reconnection policy for the connection manager.
    pub connection: ConnectionConfig,
    /// Bound on the WebSocket handshake. A handshake that takes longer is
    /// reported as a failed open and retried like any other.
    pub connect_timeout: Duration,
    /// How long `quit` waits for the server to confirm the close.
    pub close_timeout: Duration,
}

impl RuntimeConfig {
    /// Defaults for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(endpoint),
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
        }
    }

    /// Replace the reconnection policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.connection.policy = policy;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new("ws://localhost:8000")
    }
}
