//! Mock SignalR hub for integration tests.
//!
//! Runs two listeners: one serving the negotiate/start/abort control
//! endpoints over plain HTTP, one accepting WebSocket upgrades. The socket
//! side can:
//! - Greet new connections with a configured push frame
//! - Record received text frames
//! - Auto-reply to invocations with `{"I":"<id>","R":{"ok":true}}`
//! - Play deaf: accept the upgrade, then never service the connection

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Negotiate body matching the happy-path scenario.
const DESCRIPTOR_BODY: &str = r#"{"ConnectionId":"abc","ConnectionToken":"tok","ProtocolVersion":"1.5","TransportConnectTimeout":5,"DisconnectTimeout":30,"KeepAliveTimeout":20}"#;

/// How the socket side behaves after the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketBehavior {
    /// Read frames, record them, auto-reply to invocations and pings.
    Responsive,
    /// Accept the upgrade, then never read or write.
    Deaf,
}

/// A mock hub for testing.
pub struct MockHub {
    http_addr: SocketAddr,
    ws_addr: SocketAddr,
    http_shutdown: mpsc::Sender<()>,
    ws_shutdown: mpsc::Sender<()>,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockHub {
    /// Start a responsive hub on available ports. `greeting` is pushed to
    /// every socket right after its upgrade.
    pub async fn start(greeting: Option<String>) -> Self {
        Self::start_with(greeting, SocketBehavior::Responsive).await
    }

    /// Start a hub whose socket side accepts upgrades and then goes silent.
    pub async fn start_deaf() -> Self {
        Self::start_with(None, SocketBehavior::Deaf).await
    }

    async fn start_with(greeting: Option<String>, behavior: SocketBehavior) -> Self {
        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_addr = http_listener.local_addr().unwrap();
        let ws_addr = ws_listener.local_addr().unwrap();

        let messages: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (http_shutdown, mut http_shutdown_rx) = mpsc::channel::<()>(1);
        let (ws_shutdown, mut ws_shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = http_listener.accept() => {
                        tokio::spawn(handle_http(stream));
                    }
                    _ = http_shutdown_rx.recv() => break,
                }
            }
        });

        let ws_messages = messages.clone();
        let ws_connections = connections.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = ws_listener.accept() => {
                        let messages = ws_messages.clone();
                        let connections = ws_connections.clone();
                        let greeting = greeting.clone();
                        tokio::spawn(handle_socket(stream, messages, connections, greeting, behavior));
                    }
                    _ = ws_shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            http_addr,
            ws_addr,
            http_shutdown,
            ws_shutdown,
            messages,
            connections,
        }
    }

    /// Base URL for the control endpoints.
    pub fn https_base(&self) -> String {
        format!("http://{}/signalr", self.http_addr)
    }

    /// Base URL for the socket endpoint.
    pub fn wss_base(&self) -> String {
        format!("ws://{}/signalr", self.ws_addr)
    }

    /// Number of WebSocket upgrades accepted.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// All text frames received on the socket side.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// Shutdown both listeners.
    pub async fn shutdown(self) {
        let _ = self.http_shutdown.send(()).await;
        let _ = self.ws_shutdown.send(()).await;
    }
}

/// Minimal HTTP/1.1 responder for negotiate/start/abort.
async fn handle_http(mut stream: TcpStream) {
    let mut buffer = vec![0u8; 4096];
    let mut filled = 0usize;
    loop {
        if filled == buffer.len() {
            break;
        }
        match stream.read(&mut buffer[filled..]).await {
            Ok(0) => return,
            Ok(n) => {
                filled += n;
                if buffer[..filled].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(_) => return,
        }
    }

    let request = String::from_utf8_lossy(&buffer[..filled]);
    let body = if request.starts_with("GET /signalr/negotiate") {
        DESCRIPTOR_BODY
    } else {
        r#"{"Response":"started"}"#
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn handle_socket(
    stream: TcpStream,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
    greeting: Option<String>,
    behavior: SocketBehavior,
) {
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {e}");
            return;
        }
    };

    if behavior == SocketBehavior::Deaf {
        // Hold the connection open without servicing it, so client pings
        // go unanswered.
        let _held = ws_stream;
        std::future::pending::<()>().await;
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    if let Some(frame) = greeting {
        let _ = write.send(Message::Text(frame)).await;
    }

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                {
                    let mut msgs = messages.lock().await;
                    msgs.push_back(text.clone());
                }

                // Echo a success reply for every invocation frame so reply
                // matching can be exercised over the wire.
                if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) {
                    if let Some(id) = parsed.get("I").and_then(|v| v.as_u64()) {
                        let reply = format!(r#"{{"I":"{id}","R":{{"ok":true}}}}"#);
                        let _ = write.send(Message::Text(reply)).await;
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }
}
