//! Negotiate handshake result.

use serde::Deserialize;
use std::time::Duration;

/// Opaque handshake result returned by the `negotiate` endpoint.
///
/// Created by negotiate, consumed by connect/start/abort, discarded on
/// teardown.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionDescriptor {
    pub connection_id: String,
    pub connection_token: String,
    pub protocol_version: String,
    /// Advertised in seconds.
    pub transport_connect_timeout: f64,
    /// Advertised in seconds.
    pub disconnect_timeout: f64,
    /// Advertised in seconds; absent when the server disables keep-alive.
    #[serde(default)]
    pub keep_alive_timeout: Option<f64>,
}

impl ConnectionDescriptor {
    /// WebSocket handshake timeout.
    ///
    /// The server advertises seconds; the observed server tolerance matches
    /// the doubled value converted to milliseconds, so the `* 2000` factor
    /// is preserved exactly.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis((self.transport_connect_timeout * 2000.0).round() as u64)
    }
}
