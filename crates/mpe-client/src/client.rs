//! Client facade: the state machine above the connection.
//!
//! The facade owns the subscription registry, the watchdogs, and the
//! current connection. It replays the registry after every (re)connect,
//! translates hub pushes into typed domain events, and drives the outer
//! reconnect loop. Subscription mutators never fail to the caller;
//! failures surface exclusively as events.

use crate::config::ClientConfig;
use crate::decode::{self, DecodedPush, OrderBookState};
use crate::error::ClientResult;
use crate::events::MarketEvent;
use crate::registry::{FeedCategory, PairFeed, RegistrySnapshot, SubscriptionRegistry};
use crate::watchdog::WatchdogSet;
use chrono::Utc;
use mpe_signalr::{
    ChallengeSolver, Connection, ConnectionEvent, ConnectionState, Credentials, ErrorDetail,
    HandshakeStep, HubMessage,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Cadence of the watchdog staleness sweep.
const WATCHDOG_TICK: std::time::Duration = std::time::Duration::from_secs(1);

/// Handle to a running market client.
///
/// Mutators are fire-and-forget: they update the desired-subscription
/// registry and, when connected, apply the change on the live connection.
/// While a reconnect is in flight the registry still accepts changes and
/// the full set is replayed once the replacement connection is up.
pub struct MarketClient {
    command_tx: mpsc::UnboundedSender<Command>,
}

impl MarketClient {
    /// Solve the challenge once, spawn the driver task, and return the
    /// handle plus the event stream.
    pub async fn start(
        config: ClientConfig,
        solver: Arc<dyn ChallengeSolver>,
    ) -> ClientResult<(Self, mpsc::UnboundedReceiver<MarketEvent>)> {
        let credentials = solver.solve().await?;
        info!("challenge credentials obtained");

        let watchdogs = WatchdogSet::from_entries(config.watchdog.entries());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (query_tx, query_rx) = mpsc::unbounded_channel();

        let driver = ClientDriver {
            config,
            credentials,
            registry: SubscriptionRegistry::new(),
            watchdogs,
            cseq: HashMap::new(),
            event_tx,
            query_tx,
            reconnect_attempts: 0,
        };
        tokio::spawn(driver.run(command_rx, query_rx));

        Ok((Self { command_tx }, event_rx))
    }

    pub fn subscribe_to_markets(&self, pairs: Vec<String>, replace: bool) {
        self.send(Command::AddPairs {
            feed: PairFeed::Markets,
            pairs,
            replace,
        });
    }

    pub fn unsubscribe_from_markets(&self, pairs: Vec<String>) {
        self.send(Command::RemovePairs {
            feed: PairFeed::Markets,
            pairs,
        });
    }

    pub fn subscribe_to_tickers(&self, pairs: Vec<String>, replace: bool) {
        self.send(Command::AddPairs {
            feed: PairFeed::Tickers,
            pairs,
            replace,
        });
    }

    pub fn unsubscribe_from_tickers(&self, pairs: Vec<String>) {
        self.send(Command::RemovePairs {
            feed: PairFeed::Tickers,
            pairs,
        });
    }

    pub fn subscribe_to_summary(&self) {
        self.send(Command::SetSummary { enabled: true });
    }

    pub fn unsubscribe_from_summary(&self) {
        self.send(Command::SetSummary { enabled: false });
    }

    /// Terminal: tears down the connection and stops the driver.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    fn send(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            debug!("client driver already stopped");
        }
    }
}

#[derive(Debug)]
enum Command {
    AddPairs {
        feed: PairFeed,
        pairs: Vec<String>,
        replace: bool,
    },
    RemovePairs {
        feed: PairFeed,
        pairs: Vec<String>,
    },
    SetSummary {
        enabled: bool,
    },
    Disconnect,
}

/// Completion of an initial order-book query, routed back into the driver
/// so sequence tracking stays on one task.
#[derive(Debug)]
struct QueryCompletion {
    pair: String,
    state: Option<OrderBookState>,
}

/// How one connection session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// `disconnect()` was requested; the driver stops.
    Stop,
    /// The session died; schedule a replacement connection.
    Retry,
}

struct ClientDriver {
    config: ClientConfig,
    credentials: Credentials,
    registry: SubscriptionRegistry,
    watchdogs: WatchdogSet,
    /// Last seen channel sequence per pair; cleared on reconnect so the
    /// first book payload per pair counts as a fresh snapshot.
    cseq: HashMap<String, u64>,
    event_tx: mpsc::UnboundedSender<MarketEvent>,
    query_tx: mpsc::UnboundedSender<QueryCompletion>,
    reconnect_attempts: u32,
}

impl ClientDriver {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
        mut query_rx: mpsc::UnboundedReceiver<QueryCompletion>,
    ) {
        info!("client driver started");

        'sessions: loop {
            let (conn_tx, mut conn_events) = mpsc::unbounded_channel();
            let connection =
                match Connection::new(self.config.connection.clone(), &self.credentials, conn_tx) {
                    Ok(connection) => Arc::new(connection),
                    Err(err) => {
                        // Construction fails only on unusable configuration;
                        // a replacement connection cannot do better.
                        error!(error = %err, "connection construction failed");
                        self.emit(MarketEvent::ConnectionError {
                            step: HandshakeStep::Negotiate,
                            attempts: 0,
                            retry: false,
                            error: ErrorDetail::from(&err),
                        });
                        break 'sessions;
                    }
                };
            let runner = {
                let connection = connection.clone();
                tokio::spawn(async move { connection.run().await })
            };

            let mut watchdog_timer = tokio::time::interval(WATCHDOG_TICK);
            let end = loop {
                tokio::select! {
                    Some(command) = command_rx.recv() => {
                        if self.handle_command(command, &connection) {
                            break SessionEnd::Stop;
                        }
                    }

                    event = conn_events.recv() => match event {
                        Some(event) => {
                            if let Some(end) = self.handle_connection_event(event, &connection) {
                                break end;
                            }
                        }
                        None => break SessionEnd::Retry,
                    },

                    Some(completion) = query_rx.recv() => {
                        self.handle_query_completion(completion);
                    }

                    _ = watchdog_timer.tick() => {
                        if self.check_watchdogs(&connection) {
                            break SessionEnd::Retry;
                        }
                    }
                }
            };

            // Idempotent; ensures the session task exits promptly.
            connection.disconnect();
            let _ = runner.await;
            // Events already parsed on the finished session are delivered
            // before anything from its replacement.
            self.drain_session(&mut conn_events, &connection);
            self.watchdogs.disarm_all();

            if end == SessionEnd::Stop {
                info!("client stopped");
                break 'sessions;
            }

            self.reconnect_attempts += 1;
            if let Some(budget) = self.config.reconnect_budget() {
                if self.reconnect_attempts > budget {
                    error!(
                        attempts = self.reconnect_attempts,
                        "reconnect budget exhausted, giving up"
                    );
                    break 'sessions;
                }
            }

            let delay = self.config.reconnect_delay();
            debug!(?delay, attempt = self.reconnect_attempts, "scheduling replacement connection");
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    () = &mut sleep => break,
                    Some(command) = command_rx.recv() => {
                        if self.handle_offline_command(command) {
                            info!("client stopped");
                            break 'sessions;
                        }
                    }
                }
            }
        }
    }

    /// Returns true when the command asks the driver to stop.
    fn handle_command(&mut self, command: Command, connection: &Connection) -> bool {
        match command {
            Command::AddPairs {
                feed,
                pairs,
                replace,
            } => {
                let before = self.registry.snapshot();
                if replace {
                    self.registry.replace(feed, pairs);
                } else {
                    self.registry.add(feed, pairs);
                }
                self.apply_mutation(&before, connection);
            }
            Command::RemovePairs { feed, pairs } => {
                let before = self.registry.snapshot();
                self.registry.remove(feed, &pairs);
                self.apply_mutation(&before, connection);
            }
            Command::SetSummary { enabled } => {
                let before = self.registry.snapshot();
                self.registry.set_summary(enabled);
                self.apply_mutation(&before, connection);
            }
            Command::Disconnect => return true,
        }
        false
    }

    /// Registry mutation while no connection exists; changes take effect on
    /// the next CONNECTED entry.
    fn handle_offline_command(&mut self, command: Command) -> bool {
        match command {
            Command::AddPairs {
                feed,
                pairs,
                replace,
            } => {
                if replace {
                    self.registry.replace(feed, pairs);
                } else {
                    self.registry.add(feed, pairs);
                }
            }
            Command::RemovePairs { feed, pairs } => self.registry.remove(feed, &pairs),
            Command::SetSummary { enabled } => self.registry.set_summary(enabled),
            Command::Disconnect => return true,
        }
        false
    }

    fn apply_mutation(&mut self, before: &RegistrySnapshot, connection: &Connection) {
        if connection.state() != ConnectionState::Connected {
            debug!("not connected; registry change takes effect on next connect");
            return;
        }
        let diff = self.registry.snapshot().diff(before);
        if !diff.unsubscribe.is_empty() {
            // The hub exposes no unsubscribe methods. Dropped feeds are
            // filtered on dispatch and fall away on the next reconnect.
            debug!(
                markets = diff.unsubscribe.markets.len(),
                tickers = diff.unsubscribe.tickers.len(),
                summary = diff.unsubscribe.summary,
                "unsubscribed feeds will be filtered until reconnect"
            );
        }
        self.apply_subscriptions(&diff.subscribe, connection);
    }

    fn apply_subscriptions(&mut self, wanted: &RegistrySnapshot, connection: &Connection) {
        for pair in &wanted.markets {
            self.subscribe_market(pair, connection);
        }
        for pair in &wanted.tickers {
            self.subscribe_ticker(pair, connection);
        }
        if wanted.summary {
            self.subscribe_summary(connection);
        }
    }

    fn subscribe_market(&mut self, pair: &str, connection: &Connection) {
        if !connection.invoke(&self.config.methods.subscribe_markets, vec![json!(pair)]) {
            warn!(pair, "market subscription dropped, not connected");
            return;
        }
        self.watchdogs.arm(FeedCategory::Markets);
        self.query_market_state(pair, connection);
    }

    /// Ask for the full book so consumers start from a snapshot; the reply
    /// is decoded off-task and routed back through `query_tx`.
    fn query_market_state(&self, pair: &str, connection: &Connection) {
        let Some(reply) =
            connection.invoke_with_reply(&self.config.methods.query_market_state, vec![json!(pair)])
        else {
            return;
        };
        let query_tx = self.query_tx.clone();
        let pair = pair.to_string();
        tokio::spawn(async move {
            let state = match reply.await {
                Ok(Ok(value)) => decode::decode_book_state(&value),
                Ok(Err(err)) => {
                    warn!(pair = %pair, error = %err, "query-state rejected by hub");
                    None
                }
                // Connection died first; the invocation is indeterminate.
                Err(_) => None,
            };
            let _ = query_tx.send(QueryCompletion { pair, state });
        });
    }

    fn subscribe_ticker(&mut self, pair: &str, connection: &Connection) {
        if !connection.invoke(&self.config.methods.subscribe_tickers, vec![json!(pair)]) {
            warn!(pair, "ticker subscription dropped, not connected");
            return;
        }
        self.watchdogs.arm(FeedCategory::Tickers);
    }

    fn subscribe_summary(&mut self, connection: &Connection) {
        if !connection.invoke(&self.config.methods.subscribe_summary, vec![]) {
            warn!("summary subscription dropped, not connected");
            return;
        }
        self.watchdogs.arm(FeedCategory::Summary);
    }

    fn handle_connection_event(
        &mut self,
        event: ConnectionEvent,
        connection: &Connection,
    ) -> Option<SessionEnd> {
        match event {
            ConnectionEvent::Connected { connection_id } => {
                self.reconnect_attempts = 0;
                self.cseq.clear();
                let snapshot = self.registry.snapshot();
                if !snapshot.is_empty() {
                    info!(
                        markets = snapshot.markets.len(),
                        tickers = snapshot.tickers.len(),
                        summary = snapshot.summary,
                        "replaying subscriptions"
                    );
                }
                self.apply_subscriptions(&snapshot, connection);
                self.emit(MarketEvent::Connected { connection_id });
                None
            }
            ConnectionEvent::Data(message) => {
                self.dispatch(message);
                None
            }
            ConnectionEvent::ConnectionError {
                step,
                attempts,
                retry,
                error,
            } => {
                let terminal = !retry;
                self.emit(MarketEvent::ConnectionError {
                    step,
                    attempts,
                    retry,
                    error,
                });
                terminal.then_some(SessionEnd::Retry)
            }
            ConnectionEvent::Disconnected {
                connection_id,
                code,
                reason,
            } => {
                self.emit(MarketEvent::Disconnected {
                    connection_id,
                    code,
                    reason,
                });
                Some(SessionEnd::Retry)
            }
        }
    }

    fn dispatch(&mut self, message: HubMessage) {
        dispatch_push(
            &self.registry,
            &mut self.cseq,
            &mut self.watchdogs,
            message,
            |event| {
                let _ = self.event_tx.send(event);
            },
        );
    }

    fn handle_query_completion(&mut self, completion: QueryCompletion) {
        let QueryCompletion { pair, state } = completion;
        let Some(state) = state else {
            debug!(pair = %pair, "query-state produced no snapshot");
            return;
        };
        if !self.registry.contains(PairFeed::Markets, &pair) {
            return;
        }
        self.watchdogs.record(FeedCategory::Markets);
        self.cseq.insert(pair.clone(), state.nounce);
        self.emit(MarketEvent::OrderBook {
            pair,
            cseq: state.nounce,
            bids: state.buys,
            asks: state.sells,
        });
    }

    /// Returns true when a reconnect-armed watchdog fired; the connection
    /// teardown is programmatic so no `Disconnected` event reaches the
    /// consumer.
    fn check_watchdogs(&mut self, connection: &Connection) -> bool {
        let mut reconnect = false;
        for fired in self.watchdogs.check(Utc::now()) {
            if fired.reconnect {
                warn!(category = %fired.category, "watchdog timeout, reconnecting");
                reconnect = true;
            } else {
                warn!(category = %fired.category, "watchdog timeout");
            }
        }
        if reconnect {
            connection.disconnect();
        }
        reconnect
    }

    fn drain_session(
        &mut self,
        conn_events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
        connection: &Connection,
    ) {
        while let Ok(event) = conn_events.try_recv() {
            let _ = self.handle_connection_event(event, connection);
        }
    }

    fn emit(&self, event: MarketEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

/// Translate one hub push into domain events.
///
/// Free function over the driver's state pieces so the dispatch rules are
/// testable without a live connection.
fn dispatch_push(
    registry: &SubscriptionRegistry,
    cseq: &mut HashMap<String, u64>,
    watchdogs: &mut WatchdogSet,
    message: HubMessage,
    mut emit: impl FnMut(MarketEvent),
) {
    match decode::decode_push(&message) {
        DecodedPush::MarketDeltas(deltas) => {
            for delta in deltas {
                if !registry.contains(PairFeed::Markets, &delta.market_name) {
                    debug!(pair = %delta.market_name, "delta for unsubscribed pair dropped");
                    continue;
                }
                watchdogs.record(FeedCategory::Markets);
                if let Some(&last) = cseq.get(&delta.market_name) {
                    if delta.nounce <= last {
                        debug!(pair = %delta.market_name, cseq = delta.nounce, "stale delta dropped");
                        continue;
                    }
                }
                cseq.insert(delta.market_name.clone(), delta.nounce);
                emit(MarketEvent::OrderBookUpdate {
                    pair: delta.market_name.clone(),
                    cseq: delta.nounce,
                    bids: delta.buys,
                    asks: delta.sells,
                });
                if !delta.fills.is_empty() {
                    emit(MarketEvent::Trades {
                        pair: delta.market_name,
                        data: delta.fills,
                    });
                }
            }
        }
        DecodedPush::Summaries(states) => {
            if !registry.summary() {
                return;
            }
            watchdogs.record(FeedCategory::Summary);
            for state in states {
                emit(MarketEvent::Summary { data: state.deltas });
            }
        }
        DecodedPush::SummaryLites(states) => {
            for state in states {
                for ticker in state.deltas {
                    if !registry.contains(PairFeed::Tickers, &ticker.market_name) {
                        continue;
                    }
                    watchdogs.record(FeedCategory::Tickers);
                    emit(MarketEvent::Ticker {
                        pair: ticker.market_name.clone(),
                        data: ticker,
                    });
                }
            }
        }
        DecodedPush::Unknown => emit(MarketEvent::Raw {
            method: message.method,
            args: message.args,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::WatchdogConfig;
    use serde_json::Value;

    fn market_delta(pair: &str, nounce: u64, with_fill: bool) -> HubMessage {
        let fills = if with_fill {
            json!([{"OrderType": "SELL", "Rate": "1.0", "Quantity": "2.0"}])
        } else {
            json!([])
        };
        HubMessage {
            hub: Some(String::from("corehub")),
            method: String::from("updateExchangeState"),
            args: vec![json!({
                "MarketName": pair,
                "Nounce": nounce,
                "Buys": [{"Type": 0, "Rate": "1.0", "Quantity": "1.0"}],
                "Sells": [],
                "Fills": fills,
            })],
        }
    }

    fn collect(
        registry: &SubscriptionRegistry,
        cseq: &mut HashMap<String, u64>,
        watchdogs: &mut WatchdogSet,
        message: HubMessage,
    ) -> Vec<MarketEvent> {
        let mut events = Vec::new();
        dispatch_push(registry, cseq, watchdogs, message, |event| {
            events.push(event)
        });
        events
    }

    #[test]
    fn test_market_delta_dispatches_update_and_trades() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(PairFeed::Markets, vec![String::from("USDT-BTC")]);
        let mut cseq = HashMap::new();
        let mut watchdogs = WatchdogSet::default();

        let events = collect(
            &registry,
            &mut cseq,
            &mut watchdogs,
            market_delta("USDT-BTC", 5, true),
        );

        assert_eq!(events.len(), 2);
        match &events[0] {
            MarketEvent::OrderBookUpdate { pair, cseq, bids, .. } => {
                assert_eq!(pair, "USDT-BTC");
                assert_eq!(*cseq, 5);
                assert_eq!(bids.len(), 1);
            }
            other => panic!("expected order book update, got {other:?}"),
        }
        match &events[1] {
            MarketEvent::Trades { pair, data } => {
                assert_eq!(pair, "USDT-BTC");
                assert_eq!(data.len(), 1);
            }
            other => panic!("expected trades, got {other:?}"),
        }
        assert_eq!(cseq.get("USDT-BTC"), Some(&5));
    }

    #[test]
    fn test_unsubscribed_pair_is_filtered() {
        let registry = SubscriptionRegistry::new();
        let mut cseq = HashMap::new();
        let mut watchdogs = WatchdogSet::default();

        let events = collect(
            &registry,
            &mut cseq,
            &mut watchdogs,
            market_delta("USDT-BTC", 5, false),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_stale_delta_is_dropped() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(PairFeed::Markets, vec![String::from("USDT-BTC")]);
        let mut cseq = HashMap::from([(String::from("USDT-BTC"), 10u64)]);
        let mut watchdogs = WatchdogSet::default();

        let events = collect(
            &registry,
            &mut cseq,
            &mut watchdogs,
            market_delta("USDT-BTC", 10, false),
        );
        assert!(events.is_empty());

        let events = collect(
            &registry,
            &mut cseq,
            &mut watchdogs,
            market_delta("USDT-BTC", 11, false),
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_summary_requires_subscription() {
        let mut registry = SubscriptionRegistry::new();
        let mut cseq = HashMap::new();
        let mut watchdogs = WatchdogSet::default();
        let message = HubMessage {
            hub: None,
            method: String::from("updateSummaryState"),
            args: vec![json!({"Nounce": 1, "Deltas": [{"MarketName": "USDT-BTC", "Last": "1.0"}]})],
        };

        let events = collect(&registry, &mut cseq, &mut watchdogs, message.clone());
        assert!(events.is_empty());

        registry.set_summary(true);
        let events = collect(&registry, &mut cseq, &mut watchdogs, message);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MarketEvent::Summary { .. }));
    }

    #[test]
    fn test_ticker_filtered_by_registry() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(PairFeed::Tickers, vec![String::from("USDT-BTC")]);
        let mut cseq = HashMap::new();
        let mut watchdogs = WatchdogSet::default();
        let message = HubMessage {
            hub: None,
            method: String::from("uL"),
            args: vec![json!({"Deltas": [
                {"MarketName": "USDT-BTC", "Last": "1.0"},
                {"MarketName": "BTC-ETH", "Last": "0.05"}
            ]})],
        };

        let events = collect(&registry, &mut cseq, &mut watchdogs, message);
        assert_eq!(events.len(), 1);
        match &events[0] {
            MarketEvent::Ticker { pair, .. } => assert_eq!(pair, "USDT-BTC"),
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_method_surfaces_raw() {
        let registry = SubscriptionRegistry::new();
        let mut cseq = HashMap::new();
        let mut watchdogs = WatchdogSet::default();
        let message = HubMessage {
            hub: None,
            method: String::from("updateOrderState"),
            args: vec![json!({"anything": 1})],
        };

        let events = collect(&registry, &mut cseq, &mut watchdogs, message);
        assert_eq!(events.len(), 1);
        match &events[0] {
            MarketEvent::Raw { method, args } => {
                assert_eq!(method, "updateOrderState");
                assert_eq!(args[0], json!({"anything": 1}));
            }
            other => panic!("expected raw, got {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_feeds_watchdog() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(PairFeed::Markets, vec![String::from("USDT-BTC")]);
        let mut cseq = HashMap::new();
        let mut watchdogs = WatchdogSet::from_entries([(
            FeedCategory::Markets,
            WatchdogConfig {
                timeout_ms: 60_000,
                reconnect: true,
            },
        )]);
        watchdogs.arm(FeedCategory::Markets);

        let _ = collect(
            &registry,
            &mut cseq,
            &mut watchdogs,
            market_delta("USDT-BTC", 1, false),
        );
        // The message pushed the staleness window out; nothing fires now.
        assert!(watchdogs.check(Utc::now()).is_empty());
    }

    #[test]
    fn test_raw_args_survive_verbatim() {
        let registry = SubscriptionRegistry::new();
        let mut cseq = HashMap::new();
        let mut watchdogs = WatchdogSet::default();
        let args: Vec<Value> = vec![json!([1, 2, 3]), json!("opaque")];
        let message = HubMessage {
            hub: Some(String::from("corehub")),
            method: String::from("newMethod"),
            args: args.clone(),
        };

        let events = collect(&registry, &mut cseq, &mut watchdogs, message);
        match &events[0] {
            MarketEvent::Raw { args: raw, .. } => assert_eq!(raw, &args),
            other => panic!("expected raw, got {other:?}"),
        }
    }
}
