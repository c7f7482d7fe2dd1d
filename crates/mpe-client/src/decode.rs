//! Hub payload decoding.
//!
//! The hub's push envelope carries heterogeneous records keyed by the inner
//! method name. Known shapes decode into typed records; unknown methods are
//! surfaced raw so consumers can evolve without a client release.
//!
//! The hub sends both long method names and their compressed aliases
//! depending on server version, so tags match either.

use mpe_signalr::HubMessage;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// One price level on an order-book side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BookEntry {
    pub rate: Decimal,
    pub quantity: Decimal,
}

/// How a delta applies to a price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DeltaKind {
    Add,
    Remove,
    Update,
}

impl TryFrom<u8> for DeltaKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Add),
            1 => Ok(Self::Remove),
            2 => Ok(Self::Update),
            other => Err(format!("unknown delta type {other}")),
        }
    }
}

impl From<DeltaKind> for u8 {
    fn from(kind: DeltaKind) -> Self {
        match kind {
            DeltaKind::Add => 0,
            DeltaKind::Remove => 1,
            DeltaKind::Update => 2,
        }
    }
}

/// One order-book level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BookDelta {
    #[serde(rename = "Type")]
    pub kind: DeltaKind,
    pub rate: Decimal,
    pub quantity: Decimal,
}

/// An executed trade carried on the deltas feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Fill {
    pub order_type: String,
    pub rate: Decimal,
    pub quantity: Decimal,
    #[serde(default)]
    pub time_stamp: Option<String>,
}

/// Full order-book state, returned by the query-state invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderBookState {
    /// Absent on some server versions; the pair is known from the query.
    #[serde(default)]
    pub market_name: Option<String>,
    /// Channel sequence number; monotonic per pair within a session.
    pub nounce: u64,
    #[serde(default)]
    pub buys: Vec<BookEntry>,
    #[serde(default)]
    pub sells: Vec<BookEntry>,
    #[serde(default)]
    pub fills: Vec<Fill>,
}

/// Incremental order-book change pushed on the deltas subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderBookDelta {
    pub market_name: String,
    pub nounce: u64,
    #[serde(default)]
    pub buys: Vec<BookDelta>,
    #[serde(default)]
    pub sells: Vec<BookDelta>,
    #[serde(default)]
    pub fills: Vec<Fill>,
}

/// One market's summary row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MarketSummary {
    pub market_name: String,
    #[serde(default)]
    pub high: Option<Decimal>,
    #[serde(default)]
    pub low: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
    pub last: Decimal,
    #[serde(default)]
    pub base_volume: Option<Decimal>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub open_buy_orders: Option<u64>,
    #[serde(default)]
    pub open_sell_orders: Option<u64>,
    #[serde(default)]
    pub prev_day: Option<Decimal>,
}

/// Summary deltas envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SummaryState {
    pub nounce: u64,
    #[serde(default)]
    pub deltas: Vec<MarketSummary>,
}

/// Lite summary row, dispatched as the per-pair ticker feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TickerLite {
    pub market_name: String,
    pub last: Decimal,
    #[serde(default)]
    pub base_volume: Option<Decimal>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
}

/// Lite summary deltas envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SummaryLiteState {
    #[serde(default)]
    pub deltas: Vec<TickerLite>,
}

/// A hub push decoded by its inner method tag.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPush {
    /// Order-book deltas (and trade fills), one per pair.
    MarketDeltas(Vec<OrderBookDelta>),
    /// Full summary deltas.
    Summaries(Vec<SummaryState>),
    /// Lite summary deltas.
    SummaryLites(Vec<SummaryLiteState>),
    /// Method this client does not model; surfaced raw by the facade.
    Unknown,
}

/// Decode one hub push message. Arguments of a known method that fail to
/// parse are dropped, matching the live-frame parse-error policy.
pub fn decode_push(message: &HubMessage) -> DecodedPush {
    let method = message.method.to_lowercase();
    match method.as_str() {
        "updateexchangestate" | "ue" => {
            DecodedPush::MarketDeltas(decode_args(&message.args, &method))
        }
        "updatesummarystate" | "us" => DecodedPush::Summaries(decode_args(&message.args, &method)),
        "updatesummarylitestate" | "ul" => {
            DecodedPush::SummaryLites(decode_args(&message.args, &method))
        }
        _ => DecodedPush::Unknown,
    }
}

/// Decode the `R` value of a query-state reply.
pub fn decode_book_state(value: &Value) -> Option<OrderBookState> {
    match serde_json::from_value(value.clone()) {
        Ok(state) => Some(state),
        Err(error) => {
            debug!(%error, "query-state reply failed to decode");
            None
        }
    }
}

fn decode_args<T: serde::de::DeserializeOwned>(args: &[Value], method: &str) -> Vec<T> {
    args.iter()
        .filter_map(|arg| match serde_json::from_value(arg.clone()) {
            Ok(decoded) => Some(decoded),
            Err(error) => {
                debug!(%error, method, "push payload failed to decode");
                None
            }
        })
        .collect()
}
