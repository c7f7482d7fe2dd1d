//! Challenge-solver credentials.
//!
//! The exchange fronts its SignalR endpoints with an anti-bot interstitial.
//! A solver performs that exchange once and yields a cookie plus the
//! user-agent the cookie was minted for. Both must accompany every
//! subsequent HTTP and WebSocket request.

use crate::error::SignalrResult;
use async_trait::async_trait;

/// Cookie and user-agent pair obtained from the challenge solver.
///
/// Immutable once obtained; each connection receives its own copy rather
/// than reading shared mutable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub cookie: String,
    pub user_agent: String,
}

impl Credentials {
    pub fn new(cookie: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// One-shot challenge exchange.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Perform the interstitial exchange and return usable credentials.
    async fn solve(&self) -> SignalrResult<Credentials>;
}

/// Solver backed by a pre-obtained cookie and user-agent.
///
/// Used when the interstitial was solved out of process (browser session,
/// external solver binary) and the result is supplied via configuration.
pub struct StaticChallengeSolver {
    credentials: Credentials,
}

impl StaticChallengeSolver {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl ChallengeSolver for StaticChallengeSolver {
    async fn solve(&self) -> SignalrResult<Credentials> {
        Ok(self.credentials.clone())
    }
}
