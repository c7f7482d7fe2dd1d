//! Client facade configuration.

use crate::registry::FeedCategory;
use crate::watchdog::WatchdogConfig;
use mpe_signalr::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hub method names, supplied by configuration so server-side renames do
/// not require a client release.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubMethods {
    /// Per-pair order-book delta subscription.
    pub subscribe_markets: String,
    /// Per-pair full-state query used for the initial snapshot.
    pub query_market_state: String,
    /// Lite summary subscription backing the ticker feed.
    pub subscribe_tickers: String,
    /// Full summary subscription.
    pub subscribe_summary: String,
}

impl Default for HubMethods {
    fn default() -> Self {
        Self {
            subscribe_markets: String::from("SubscribeToExchangeDeltas"),
            query_market_state: String::from("QueryExchangeState"),
            subscribe_tickers: String::from("SubscribeToSummaryLiteDeltas"),
            subscribe_summary: String::from("SubscribeToSummaryDeltas"),
        }
    }
}

/// Per-feed watchdog settings; a feed without an entry has no watchdog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogSettings {
    pub markets: Option<WatchdogConfig>,
    pub tickers: Option<WatchdogConfig>,
    pub summary: Option<WatchdogConfig>,
}

impl WatchdogSettings {
    pub fn entries(&self) -> Vec<(FeedCategory, WatchdogConfig)> {
        [
            (FeedCategory::Markets, self.markets),
            (FeedCategory::Tickers, self.tickers),
            (FeedCategory::Summary, self.summary),
        ]
        .into_iter()
        .filter_map(|(category, config)| config.map(|c| (category, c)))
        .collect()
    }
}

/// Facade configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Delay before constructing a replacement connection. Defaults to the
    /// handshake retry delay when unset.
    pub reconnect_delay_ms: Option<u64>,
    /// Outer reconnect budget; -1 retries forever.
    pub reconnect_retries: i32,
    /// Transport and handshake knobs for each connection.
    pub connection: ConnectionConfig,
    /// Hub method names.
    pub methods: HubMethods,
    /// Per-feed staleness watchdogs.
    pub watchdog: WatchdogSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: None,
            reconnect_retries: -1,
            connection: ConnectionConfig::default(),
            methods: HubMethods::default(),
            watchdog: WatchdogSettings::default(),
        }
    }
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(
            self.reconnect_delay_ms
                .unwrap_or(self.connection.retry_delay_ms),
        )
    }

    /// Outer reconnect budget; `None` means unlimited.
    pub fn reconnect_budget(&self) -> Option<u32> {
        u32::try_from(self.reconnect_retries).ok()
    }
}
