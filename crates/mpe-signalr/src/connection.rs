//! One SignalR transport session.
//!
//! A `Connection` owns exactly one socket lifetime: negotiate → connect →
//! start → live → teardown. It is single-use; `DISCONNECTED` is terminal
//! and reconnecting means constructing a new `Connection`. The facade layer
//! above owns that replacement policy.

use crate::config::ConnectionConfig;
use crate::credentials::Credentials;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{ErrorDetail, SignalrError};
use crate::handshake::{ControlEndpoints, HandshakeStep};
use crate::pending::PendingReplies;
use crate::retry::{run_with_retry, RetryExhausted, RetryOutcome};
use crate::wire::{self, HubMessage, InboundFrame, Invocation, ReplyResult};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle states.
///
/// Monotonic from `New`; `Connecting` may jump directly to `Disconnected`
/// on handshake failure. `Disconnected` is terminal for this object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Events emitted by one connection, in emission order.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The handshake completed; emitted exactly once, before any `Data`.
    Connected { connection_id: String },
    /// One hub push message.
    Data(HubMessage),
    /// A handshake attempt failed. `retry: true` events are observability
    /// for attempts that will be retried; `retry: false` is terminal.
    ConnectionError {
        step: HandshakeStep,
        attempts: u32,
        retry: bool,
        error: ErrorDetail,
    },
    /// The transport closed without a programmatic `disconnect()`.
    /// Terminal; delivered after all already-parsed `Data`.
    Disconnected {
        connection_id: String,
        code: u16,
        reason: String,
    },
}

/// Why the live session is ending. The close handler's behavior is a pure
/// function of this value rather than a race over shared flags.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ShutdownKind {
    /// `disconnect()` was called; no `Disconnected` event is emitted.
    Programmatic,
    /// The peer closed, the transport failed, or the heartbeat expired.
    Remote { code: u16, reason: String },
}

/// Session counters, readable while the connection runs.
#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    data_messages: AtomicU64,
    invocations_sent: AtomicU64,
    replies_matched: AtomicU64,
}

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub frames_received: u64,
    pub data_messages: u64,
    pub invocations_sent: u64,
    pub replies_matched: u64,
}

/// One SignalR transport session.
pub struct Connection {
    config: ConnectionConfig,
    endpoints: ControlEndpoints,
    state: RwLock<ConnectionState>,
    pending: PendingReplies,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: TokioMutex<Option<mpsc::UnboundedReceiver<String>>>,
    shutdown: CancellationToken,
    connection_id: RwLock<Option<String>>,
    counters: Counters,
}

impl Connection {
    /// Build a connection in the `New` state.
    ///
    /// Events are delivered on `event_tx`; the channel is unbounded so the
    /// socket reader never blocks behind a slow consumer. The consumer is
    /// expected to keep up.
    pub fn new(
        config: ConnectionConfig,
        credentials: &Credentials,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<Self, SignalrError> {
        let endpoints = ControlEndpoints::new(&config, credentials)?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            endpoints,
            state: RwLock::new(ConnectionState::New),
            pending: PendingReplies::new(),
            event_tx,
            outbound_tx,
            outbound_rx: TokioMutex::new(Some(outbound_rx)),
            shutdown: CancellationToken::new(),
            connection_id: RwLock::new(None),
            counters: Counters::default(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Connection id assigned by negotiate; `None` before that point.
    pub fn connection_id(&self) -> Option<String> {
        self.connection_id.read().clone()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            data_messages: self.counters.data_messages.load(Ordering::Relaxed),
            invocations_sent: self.counters.invocations_sent.load(Ordering::Relaxed),
            replies_matched: self.counters.replies_matched.load(Ordering::Relaxed),
        }
    }

    /// Fire-and-forget hub invocation. Returns false unless the connection
    /// is `Connected` and the frame was queued for the socket.
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> bool {
        self.send_invocation(method, args, None).is_some()
    }

    /// Hub invocation with a reply channel. The receiver resolves with the
    /// server's `R` value or `E` error; it observes a closed channel when
    /// the connection dies first.
    pub fn invoke_with_reply(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Option<oneshot::Receiver<ReplyResult>> {
        let (tx, rx) = oneshot::channel();
        self.send_invocation(method, args, Some(tx)).map(|_| rx)
    }

    /// Request teardown from any non-terminal state.
    ///
    /// Idempotent. The session observes the cancellation at its next
    /// suspension point, closes the socket gracefully, and reaches
    /// `Disconnected` without emitting a `Disconnected` event.
    pub fn disconnect(&self) {
        {
            let mut state = self.state.write();
            match *state {
                ConnectionState::Disconnecting | ConnectionState::Disconnected => {}
                ConnectionState::New => {
                    // The lifecycle has exactly one shortcut: Connecting may
                    // jump straight to Disconnected. An unused connection
                    // takes that same route; Connecting is never skipped.
                    *state = ConnectionState::Connecting;
                    *state = ConnectionState::Disconnected;
                }
                _ => *state = ConnectionState::Disconnecting,
            }
        }
        self.shutdown.cancel();
    }

    /// Drive the whole session: handshake, live loop, teardown.
    ///
    /// Permitted only in `New`; returns false otherwise. Resolves once the
    /// connection reaches `Disconnected`, however it got there.
    pub async fn run(&self) -> bool {
        {
            let mut state = self.state.write();
            if *state != ConnectionState::New {
                return false;
            }
            *state = ConnectionState::Connecting;
        }
        info!(base = %self.config.base_https, hub = %self.endpoints.hub(), "connecting");

        // negotiate
        let endpoints = &self.endpoints;
        let negotiated = run_with_retry(
            self.config.retry_policy(HandshakeStep::Negotiate),
            || self.handshake_cancelled(),
            SignalrError::is_fatal,
            |attempt, has_more, e| self.observe_phase_failure(HandshakeStep::Negotiate, attempt, has_more, e),
            move || async move { endpoints.negotiate().await },
        )
        .await;
        let descriptor = match negotiated {
            Ok(RetryOutcome::Done(descriptor)) => descriptor,
            Ok(RetryOutcome::Ignored) => return self.abandon_handshake(),
            Err(exhausted) => return self.fail_handshake(HandshakeStep::Negotiate, exhausted),
        };
        *self.connection_id.write() = Some(descriptor.connection_id.clone());
        debug!(
            connection_id = %descriptor.connection_id,
            protocol = %descriptor.protocol_version,
            "negotiated"
        );

        // connect
        let descriptor_ref = &descriptor;
        let connected = run_with_retry(
            self.config.retry_policy(HandshakeStep::Connect),
            || self.handshake_cancelled(),
            SignalrError::is_fatal,
            |attempt, has_more, e| self.observe_phase_failure(HandshakeStep::Connect, attempt, has_more, e),
            move || async move { open_socket(endpoints, descriptor_ref).await },
        )
        .await;
        let mut socket = match connected {
            Ok(RetryOutcome::Done(socket)) => socket,
            Ok(RetryOutcome::Ignored) => return self.abandon_handshake(),
            Err(exhausted) => return self.fail_handshake(HandshakeStep::Connect, exhausted),
        };

        // start
        let mut start_completed = false;
        if self.config.ignore_start_step {
            debug!("start step ignored by configuration");
        } else {
            let token = descriptor.connection_token.as_str();
            let started = run_with_retry(
                self.config.retry_policy(HandshakeStep::Start),
                || self.handshake_cancelled(),
                SignalrError::is_fatal,
                |attempt, has_more, e| self.observe_phase_failure(HandshakeStep::Start, attempt, has_more, e),
                move || async move { endpoints.start(token).await },
            )
            .await;
            match started {
                Ok(RetryOutcome::Done(())) => start_completed = true,
                Ok(RetryOutcome::Ignored) => {
                    let _ = socket.close(None).await;
                    return self.abandon_handshake();
                }
                Err(exhausted) => {
                    let _ = socket.close(None).await;
                    return self.fail_handshake(HandshakeStep::Start, exhausted);
                }
            }
        }

        // Enter CONNECTED unless disconnect() raced the handshake tail.
        let raced_disconnect = {
            let mut state = self.state.write();
            if *state != ConnectionState::Connecting {
                true
            } else {
                *state = ConnectionState::Connected;
                false
            }
        };
        if raced_disconnect {
            let _ = socket.close(None).await;
            self.finalize(ShutdownKind::Programmatic, start_completed, &descriptor)
                .await;
            return true;
        }
        info!(connection_id = %descriptor.connection_id, "connected");
        self.emit(ConnectionEvent::Connected {
            connection_id: descriptor.connection_id.clone(),
        });

        self.serve(socket, &descriptor, start_completed).await;
        true
    }

    /// Live message loop: reads frames, writes queued invocations, and
    /// enforces the heartbeat until something ends the session.
    async fn serve(&self, socket: Socket, descriptor: &ConnectionDescriptor, start_completed: bool) {
        let Some(mut outbound_rx) = self.outbound_rx.lock().await.take() else {
            // run() is gated on New, so the receiver is always present.
            return;
        };
        let (mut write, mut read) = socket.split();

        let ping_enabled = self.config.ping_timeout_ms > 0;
        let ping_period = std::time::Duration::from_millis(self.config.ping_timeout_ms.max(1));
        let mut ping_timer =
            tokio::time::interval_at(tokio::time::Instant::now() + ping_period, ping_period);
        let mut is_alive = false;
        if ping_enabled && write.send(Message::Ping(Vec::new())).await.is_err() {
            self.finalize(
                ShutdownKind::Remote {
                    code: 1006,
                    reason: String::from("initial ping failed"),
                },
                start_completed,
                descriptor,
            )
            .await;
            return;
        }

        let shutdown_kind = loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break ShutdownKind::Programmatic;
                }

                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.ingest(&text),
                    Some(Ok(Message::Ping(payload))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            break ShutdownKind::Remote {
                                code: 1006,
                                reason: String::from("pong send failed"),
                            };
                        }
                    }
                    Some(Ok(Message::Pong(_))) => is_alive = true,
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1000, String::from("closed by peer")));
                        warn!(code, %reason, "socket closed by peer");
                        break ShutdownKind::Remote { code, reason };
                    }
                    // Binary frames are not part of this hub's protocol.
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        error!(%error, "socket read error");
                        break ShutdownKind::Remote { code: 1006, reason: error.to_string() };
                    }
                    None => {
                        warn!("socket stream ended");
                        break ShutdownKind::Remote {
                            code: 1006,
                            reason: String::from("stream ended"),
                        };
                    }
                },

                Some(frame) = outbound_rx.recv() => {
                    if let Err(error) = write.send(Message::Text(frame)).await {
                        error!(%error, "socket write error");
                        break ShutdownKind::Remote { code: 1006, reason: error.to_string() };
                    }
                }

                _ = ping_timer.tick(), if ping_enabled => {
                    if !is_alive {
                        // Hard close: drop the socket without a Close frame.
                        error!(interval_ms = self.config.ping_timeout_ms, "heartbeat expired");
                        break ShutdownKind::Remote {
                            code: 1006,
                            reason: String::from("ping timeout"),
                        };
                    }
                    is_alive = false;
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        break ShutdownKind::Remote {
                            code: 1006,
                            reason: String::from("ping send failed"),
                        };
                    }
                }
            }
        };

        self.finalize(shutdown_kind, start_completed, descriptor).await;
    }

    /// Apply the ingestion rules to one inbound text frame.
    fn ingest(&self, text: &str) {
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        if self.state() != ConnectionState::Connected {
            return;
        }

        match wire::classify_frame(text) {
            InboundFrame::KeepAlive => {}
            InboundFrame::Reply { id, result } => {
                if self.pending.resolve(id, result) {
                    self.counters.replies_matched.fetch_add(1, Ordering::Relaxed);
                } else {
                    debug!(id, "reply for unknown invocation id dropped");
                }
            }
            InboundFrame::Progress { id } => debug!(id, "progress frame dropped"),
            InboundFrame::Push(messages) => {
                for message in messages {
                    self.counters.data_messages.fetch_add(1, Ordering::Relaxed);
                    self.emit(ConnectionEvent::Data(message));
                }
            }
            InboundFrame::Other => debug!("unrecognized frame shape dropped"),
            InboundFrame::Invalid => debug!("undecodable frame dropped"),
        }
    }

    fn send_invocation(
        &self,
        method: &str,
        args: Vec<Value>,
        reply: Option<oneshot::Sender<ReplyResult>>,
    ) -> Option<u32> {
        if self.state() != ConnectionState::Connected {
            return None;
        }

        let id = self.pending.next_id();
        let invocation = Invocation::new(self.endpoints.hub(), method, args, id);
        let frame = match serde_json::to_string(&invocation) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, method, "invocation serialization failed");
                return None;
            }
        };

        if let Some(sender) = reply {
            self.pending.insert(id, sender);
        }
        if self.outbound_tx.send(frame).is_err() {
            // The session loop is gone; the disconnect path reports it.
            self.pending.forget(id);
            return None;
        }
        self.counters.invocations_sent.fetch_add(1, Ordering::Relaxed);
        Some(id)
    }

    fn handshake_cancelled(&self) -> bool {
        self.state() != ConnectionState::Connecting
    }

    /// Per-attempt observability event; the terminal event is emitted by
    /// `fail_handshake` so exhaustion produces exactly one `retry: false`.
    fn observe_phase_failure(
        &self,
        step: HandshakeStep,
        attempt: u32,
        has_more: bool,
        error: &SignalrError,
    ) {
        warn!(step = %step, attempt, has_more, %error, "handshake attempt failed");
        if has_more {
            self.emit(ConnectionEvent::ConnectionError {
                step,
                attempts: attempt,
                retry: true,
                error: ErrorDetail::from(error),
            });
        }
    }

    fn fail_handshake(&self, step: HandshakeStep, exhausted: RetryExhausted<SignalrError>) -> bool {
        error!(
            step = %step,
            attempts = exhausted.attempts,
            error = %exhausted.error,
            "handshake phase exhausted"
        );
        self.emit(ConnectionEvent::ConnectionError {
            step,
            attempts: exhausted.attempts,
            retry: false,
            error: ErrorDetail::from(&exhausted.error),
        });
        *self.state.write() = ConnectionState::Disconnected;
        true
    }

    /// Cancellation observed before the session went live: reach the
    /// terminal state quietly.
    fn abandon_handshake(&self) -> bool {
        debug!("handshake abandoned by disconnect");
        *self.state.write() = ConnectionState::Disconnected;
        true
    }

    async fn finalize(
        &self,
        kind: ShutdownKind,
        start_completed: bool,
        descriptor: &ConnectionDescriptor,
    ) {
        *self.state.write() = ConnectionState::Disconnected;

        let abandoned = self.pending.abandon_all();
        if abandoned > 0 {
            debug!(abandoned, "pending invocations abandoned at teardown");
        }

        if start_completed {
            self.endpoints.abort(&descriptor.connection_token).await;
        }

        match kind {
            ShutdownKind::Programmatic => {
                info!(connection_id = %descriptor.connection_id, "disconnected (programmatic)");
            }
            ShutdownKind::Remote { code, reason } => {
                info!(
                    connection_id = %descriptor.connection_id,
                    code,
                    %reason,
                    "disconnected"
                );
                self.emit(ConnectionEvent::Disconnected {
                    connection_id: descriptor.connection_id.clone(),
                    code,
                    reason,
                });
            }
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

/// One WebSocket connect attempt, bounded by the descriptor's handshake
/// timeout. An HTTP status in place of the upgrade is a remote-origin
/// failure; anything else before open is client-origin.
async fn open_socket(
    endpoints: &ControlEndpoints,
    descriptor: &ConnectionDescriptor,
) -> Result<Socket, SignalrError> {
    let url = endpoints.connect_url(descriptor)?;
    let request = endpoints.client_request(&url)?;
    let timeout = descriptor.handshake_timeout();
    debug!(%url, ?timeout, "opening socket");

    match tokio::time::timeout(
        timeout,
        connect_async_tls_with_config(request, None, true, None),
    )
    .await
    {
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(tokio_tungstenite::tungstenite::Error::Http(response))) => {
            Err(SignalrError::UpgradeRejected {
                status: response.status().as_u16(),
            })
        }
        Ok(Err(error)) => Err(error.into()),
        Err(_) => Err(SignalrError::HandshakeTimeout(timeout)),
    }
}
