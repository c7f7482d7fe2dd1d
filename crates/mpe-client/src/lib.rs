//! Market-data client for the exchange's SignalR hub.
//!
//! Sits on top of `mpe-signalr` and owns everything a consumer needs for a
//! long-lived feed:
//! - A desired-subscription registry replayed after every reconnect
//! - Typed decoding of order-book, trade, ticker, and summary payloads
//! - Per-feed staleness watchdogs (log-only or reconnect)
//! - An outer reconnect loop with a fixed delay and optional budget
//!
//! Consumers receive [`MarketEvent`]s on an unbounded channel and mutate
//! subscriptions through the [`MarketClient`] handle.

pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod registry;
pub mod watchdog;

pub use client::MarketClient;
pub use config::{ClientConfig, HubMethods, WatchdogSettings};
pub use decode::{
    BookDelta, BookEntry, DecodedPush, DeltaKind, Fill, MarketSummary, OrderBookDelta,
    OrderBookState, SummaryLiteState, SummaryState, TickerLite,
};
pub use error::{ClientError, ClientResult};
pub use events::MarketEvent;
pub use registry::{
    FeedCategory, PairFeed, RegistryDiff, RegistrySnapshot, SubscriptionRegistry,
};
pub use watchdog::{WatchdogConfig, WatchdogFired, WatchdogSet};
