//! Domain events delivered to client listeners.

use crate::decode::{BookDelta, BookEntry, Fill, MarketSummary, TickerLite};
use mpe_signalr::{ErrorDetail, HandshakeStep};
use serde_json::Value;

/// Everything a client consumer can observe, by value.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    /// Fresh order-book snapshot for a pair, from the query-state reply.
    OrderBook {
        pair: String,
        cseq: u64,
        bids: Vec<BookEntry>,
        asks: Vec<BookEntry>,
    },
    /// Incremental order-book change for a pair.
    OrderBookUpdate {
        pair: String,
        cseq: u64,
        bids: Vec<BookDelta>,
        asks: Vec<BookDelta>,
    },
    /// Trades observed on a pair.
    Trades { pair: String, data: Vec<Fill> },
    /// Ticker refresh for a pair.
    Ticker { pair: String, data: TickerLite },
    /// Market summary deltas.
    Summary { data: Vec<MarketSummary> },
    /// A connection completed its handshake.
    Connected { connection_id: String },
    /// A connection was closed by the peer or the transport failed.
    Disconnected {
        connection_id: String,
        code: u16,
        reason: String,
    },
    /// A handshake attempt failed; `retry: false` marks exhaustion.
    ConnectionError {
        step: HandshakeStep,
        attempts: u32,
        retry: bool,
        error: ErrorDetail,
    },
    /// Hub method this client does not model.
    Raw { method: String, args: Vec<Value> },
}
