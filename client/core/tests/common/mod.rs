//! Shared fixtures for integration tests
//!
//! - [`ScriptedTransport`]: in-memory `TransportChannel` replaying a script
//! - [`spawn_sse_server`]: minimal HTTP server answering with an event-stream
//! - [`spawn_ws_server`]: WebSocket server replaying push frames

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatstream_core::transport::{FrameResult, StreamHandle};
use chatstream_core::{
    ConversationDriver, Fragment, FragmentKind, StreamId, TransportChannel, TransportError,
    TransportKind, TurnRequest,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Scripted transport
// ============================================================================

/// Transport that replays fixed fragments and can be fed more afterwards
pub struct ScriptedTransport {
    kind: TransportKind,
    available: bool,
    fail_open: bool,
    script: Vec<FragmentKind>,
    end_after_script: bool,
    requests: Mutex<Vec<TurnRequest>>,
    live: Mutex<Option<(StreamId, mpsc::Sender<FrameResult>)>>,
    closed: Mutex<Vec<StreamId>>,
}

impl ScriptedTransport {
    /// Replays `script`, then keeps the stream open for [`feed`](Self::feed)
    pub fn new(kind: TransportKind, script: Vec<FragmentKind>) -> Self {
        Self {
            kind,
            available: true,
            fail_open: false,
            script,
            end_after_script: false,
            requests: Mutex::new(Vec::new()),
            live: Mutex::new(None),
            closed: Mutex::new(Vec::new()),
        }
    }

    /// Reports itself unavailable
    pub fn unavailable(kind: TransportKind) -> Self {
        Self {
            available: false,
            ..Self::new(kind, Vec::new())
        }
    }

    /// Available, but every open fails synchronously
    pub fn failing(kind: TransportKind) -> Self {
        Self {
            fail_open: true,
            ..Self::new(kind, Vec::new())
        }
    }

    /// Close the frame channel once the script is delivered
    pub fn ending(mut self) -> Self {
        self.end_after_script = true;
        self
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().clone()
    }

    pub fn closed(&self) -> Vec<StreamId> {
        self.closed.lock().clone()
    }

    /// Deliver another fragment on the live stream
    pub async fn feed(&self, kind: FragmentKind) {
        let live = self.live.lock().clone();
        if let Some((stream_id, tx)) = live {
            let _ = tx.send(Ok(Fragment::new(stream_id, kind))).await;
        }
    }

    /// Deliver a transport failure on the live stream
    pub async fn fail(&self, error: TransportError) {
        let live = self.live.lock().clone();
        if let Some((_, tx)) = live {
            let _ = tx.send(Err(error)).await;
        }
    }
}

#[async_trait]
impl TransportChannel for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn open(
        &self,
        stream_id: &StreamId,
        request: &TurnRequest,
    ) -> Result<StreamHandle, TransportError> {
        self.requests.lock().push(request.clone());
        if self.fail_open {
            return Err(TransportError::Unavailable("scripted failure".into()));
        }

        let (tx, rx) = mpsc::channel(64);
        for kind in &self.script {
            tx.send(Ok(Fragment::new(stream_id.clone(), kind.clone())))
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        if !self.end_after_script {
            *self.live.lock() = Some((stream_id.clone(), tx));
        }

        Ok(StreamHandle::new(
            stream_id.clone(),
            self.kind,
            rx,
            CancellationToken::new(),
        ))
    }

    async fn close(&self, handle: &StreamHandle) {
        self.closed.lock().push(handle.stream_id().clone());
        self.live.lock().take();
    }
}

pub fn chunk(payload: &str) -> FragmentKind {
    FragmentKind::Chunk {
        payload: payload.to_string(),
    }
}

pub fn done(full_content: Option<&str>) -> FragmentKind {
    FragmentKind::Done {
        full_content: full_content.map(str::to_string),
        sources: Vec::new(),
        thinking_process: Vec::new(),
    }
}

/// Pump updates until the active turn settles
pub async fn run_to_completion(driver: &mut ConversationDriver) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !driver.can_send() {
            if driver.next_update().await.is_none() {
                break;
            }
        }
    })
    .await
    .expect("turn did not settle");
}

/// Pump updates until the assistant placeholder shows `expected`
pub async fn run_until_content(driver: &mut ConversationDriver, expected: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let shown = driver
                .messages()
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            if shown == expected {
                break;
            }
            driver.next_update().await.expect("turn ended early");
        }
    })
    .await
    .expect("content never appeared");
}

// ============================================================================
// Event-stream HTTP server
// ============================================================================

/// One step of a scripted HTTP response body
#[derive(Clone, Debug)]
pub enum BodyStep {
    /// Write raw bytes
    Bytes(Vec<u8>),
    /// Pause
    Sleep(Duration),
}

impl BodyStep {
    pub fn data(json: &str) -> Self {
        Self::Bytes(format!("data: {json}\n\n").into_bytes())
    }

    pub fn raw(text: &str) -> Self {
        Self::Bytes(text.as_bytes().to_vec())
    }
}

/// Serve one request with `status` and a scripted body
///
/// Returns the endpoint URL and a receiver for the parsed request body.
pub async fn spawn_sse_server(
    status: u16,
    steps: Vec<BodyStep>,
) -> (String, mpsc::Receiver<serde_json::Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (body_tx, body_rx) = mpsc::channel(4);

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };

        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buffer.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let headers = String::from_utf8_lossy(&buffer[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buffer.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
        }
        if let Ok(body) = serde_json::from_slice(&buffer[header_end..]) {
            let _ = body_tx.send(body).await;
        }

        let reason = if status == 200 { "OK" } else { "Error" };
        let head = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n"
        );
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for step in steps {
            match step {
                BodyStep::Bytes(bytes) => {
                    if socket.write_all(&bytes).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                }
                BodyStep::Sleep(duration) => tokio::time::sleep(duration).await,
            }
        }
        let _ = socket.shutdown().await;
    });

    (format!("http://{addr}/api/generate/stream"), body_rx)
}

// ============================================================================
// WebSocket server
// ============================================================================

/// One step of a scripted push connection
#[derive(Clone, Debug)]
pub enum WsStep {
    /// Send a text frame
    Text(String),
    /// Pause
    Sleep(Duration),
    /// Drop the TCP connection without a close handshake
    Drop,
}

impl WsStep {
    pub fn json(value: serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }
}

/// Accept connections; for each received envelope, replay `steps`
///
/// Returns the `ws://` URL and a receiver for every envelope received.
pub async fn spawn_ws_server(steps: Vec<WsStep>) -> (String, mpsc::Receiver<serde_json::Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (envelope_tx, envelope_rx) = mpsc::channel(8);
    let steps = Arc::new(steps);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let steps = Arc::clone(&steps);
            let envelope_tx = envelope_tx.clone();
            tokio::spawn(async move {
                let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = socket.next().await {
                    let Message::Text(text) = message else {
                        continue;
                    };
                    let Ok(envelope) = serde_json::from_str::<serde_json::Value>(&text) else {
                        continue;
                    };
                    let stream_id = envelope["streamId"].as_str().unwrap_or_default().to_string();
                    let _ = envelope_tx.send(envelope).await;

                    for step in steps.iter() {
                        match step {
                            WsStep::Text(text) => {
                                let text = text.replace("{stream}", &stream_id);
                                if socket.send(Message::Text(text.into())).await.is_err() {
                                    return;
                                }
                            }
                            WsStep::Sleep(duration) => tokio::time::sleep(*duration).await,
                            WsStep::Drop => return,
                        }
                    }
                }
            });
        }
    });

    (format!("ws://{addr}/ws"), envelope_rx)
}
