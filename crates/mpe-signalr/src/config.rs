//! Connection configuration.

use crate::credentials::Credentials;
use crate::handshake::HandshakeStep;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default hub name on the remote endpoint.
pub const DEFAULT_HUB: &str = "corehub";

/// Per-phase retry budget. `-1` retries forever.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudget {
    pub negotiate: i32,
    pub connect: i32,
    pub start: i32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            negotiate: 11,
            connect: 1,
            start: 1,
        }
    }
}

impl RetryBudget {
    /// Retry count for a handshake step; `None` means unlimited.
    pub fn for_step(&self, step: HandshakeStep) -> Option<u32> {
        let raw = match step {
            HandshakeStep::Negotiate => self.negotiate,
            HandshakeStep::Connect => self.connect,
            HandshakeStep::Start => self.start,
        };
        u32::try_from(raw).ok()
    }
}

/// Configuration for one hub connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// HTTPS base for the control endpoints, e.g. `https://host/signalr`.
    pub base_https: String,
    /// WSS base for the socket endpoint, e.g. `wss://host/signalr`.
    pub base_wss: String,
    /// Hub name used in `connectionData` and outbound invocations.
    pub hub: String,
    /// Heartbeat interval in milliseconds; 0 disables the heartbeat.
    pub ping_timeout_ms: u64,
    /// Overrides the challenge-solver user-agent when non-empty.
    pub user_agent: String,
    /// Fixed delay between handshake retry attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Skip the `start` control call and treat the socket open as the end
    /// of the handshake.
    pub ignore_start_step: bool,
    /// Per-phase handshake retry budget.
    pub retry_count: RetryBudget,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_https: String::new(),
            base_wss: String::new(),
            hub: DEFAULT_HUB.to_string(),
            ping_timeout_ms: 30_000,
            user_agent: String::from("MPE"),
            retry_delay_ms: 10_000,
            ignore_start_step: false,
            retry_count: RetryBudget::default(),
        }
    }
}

impl ConnectionConfig {
    /// Retry policy for one handshake phase.
    pub fn retry_policy(&self, step: HandshakeStep) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_count.for_step(step),
            Duration::from_millis(self.retry_delay_ms),
        )
    }

    /// The user-agent actually sent: the configured override, or the
    /// challenge-solver value when the override is empty.
    pub fn effective_user_agent(&self, credentials: &Credentials) -> String {
        if self.user_agent.is_empty() {
            credentials.user_agent.clone()
        } else {
            self.user_agent.clone()
        }
    }
}
