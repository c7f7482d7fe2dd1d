//! SignalR client core for an exchange market-data hub.
//!
//! Implements the subset of the SignalR protocol the remote hub requires:
//! - Multi-phase handshake (negotiate → connect → start) behind an anti-bot
//!   front door, with per-phase bounded retries
//! - One-shot transport sessions with an explicit lifecycle state machine
//! - Ping/pong heartbeat with hard termination on a missed pong
//! - Invocation reply matching via a single-shot pending table
//! - Typed wire frames and push-envelope classification
//!
//! Reconnection policy lives above this crate; a `Connection` is single-use.

pub mod config;
pub mod connection;
pub mod credentials;
pub mod descriptor;
pub mod error;
pub mod handshake;
pub mod pending;
pub mod retry;
pub mod wire;

pub use config::{ConnectionConfig, RetryBudget, DEFAULT_HUB};
pub use connection::{Connection, ConnectionEvent, ConnectionState, ConnectionStats};
pub use credentials::{ChallengeSolver, Credentials, StaticChallengeSolver};
pub use descriptor::ConnectionDescriptor;
pub use error::{ErrorDetail, ErrorOrigin, SignalrError, SignalrResult};
pub use handshake::HandshakeStep;
pub use retry::{run_with_retry, RetryExhausted, RetryOutcome, RetryPolicy};
pub use wire::{HubMessage, Invocation, ReplyResult};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
