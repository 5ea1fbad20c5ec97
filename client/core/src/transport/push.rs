//! Push Transport
//!
//! One WebSocket connection shared by every logical stream. Outbound turns go
//! out as a single `action: "stream"` text frame; inbound frames are routed to
//! their stream by the embedded `streamId`.
//!
//! # Connection lifecycle
//!
//! The connection is established lazily on the first `open` (or eagerly via
//! [`PushTransport::connect`]) with a bounded connect timeout. There is no
//! reconnect while a stream is active: if the socket drops, every routed
//! stream receives [`TransportError::ConnectionLost`]. The next `open` makes a
//! fresh connection attempt.
//!
//! Every connection carries a generation number and every route remembers the
//! generation it was opened on. A read loop only delivers to and orphans its
//! own routes, and closing a stream only tears down the connection that
//! stream was opened on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::config::{PushConfig, FRAME_CHANNEL_CAPACITY};
use super::frame::PushFrame;
use super::traits::{
    FrameResult, StreamHandle, TransportChannel, TransportError, TransportKind,
};
use crate::messages::StreamId;
use crate::turn::TurnRequest;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type Routes = Arc<DashMap<StreamId, Route>>;

/// Where frames for one stream go, and which connection carries them
#[derive(Clone)]
struct Route {
    connection: u64,
    tx: mpsc::Sender<FrameResult>,
}

struct Connection {
    id: u64,
    sink: WsSink,
    /// Cancelled when the connection is torn down, by either side
    shutdown: CancellationToken,
}

impl Connection {
    fn is_alive(&self) -> bool {
        !self.shutdown.is_cancelled()
    }
}

/// Multiplexed WebSocket transport
pub struct PushTransport {
    config: PushConfig,
    routes: Routes,
    connection: Mutex<Option<Connection>>,
    generation: AtomicU64,
}

impl PushTransport {
    /// Create a transport. No connection is made until needed.
    #[must_use]
    pub fn new(config: PushConfig) -> Self {
        Self {
            config,
            routes: Arc::new(DashMap::new()),
            connection: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Transport configuration
    #[must_use]
    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    /// Whether a live connection currently exists
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(Connection::is_alive)
    }

    /// Number of streams currently routed over the connection
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.routes.len()
    }

    /// Establish the shared connection if it is not already up
    pub async fn connect(&self) -> Result<(), TransportError> {
        let mut guard = self.connection.lock().await;
        self.ensure_connected(&mut *guard).await.map(|_| ())
    }

    /// Tear down the shared connection
    pub async fn disconnect(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            shut_down(connection).await;
        }
    }

    /// Tear down the connection only if it is still generation `id`
    async fn disconnect_generation(&self, id: u64) {
        let connection = {
            let mut guard = self.connection.lock().await;
            if guard.as_ref().is_some_and(|c| c.id == id) {
                guard.take()
            } else {
                None
            }
        };
        match connection {
            Some(connection) => shut_down(connection).await,
            None => tracing::trace!(connection = id, "Push connection already replaced"),
        }
    }

    async fn ensure_connected<'a>(
        &self,
        slot: &'a mut Option<Connection>,
    ) -> Result<&'a mut Connection, TransportError> {
        if !slot.as_ref().is_some_and(Connection::is_alive) {
            *slot = Some(self.establish().await?);
        }
        slot.as_mut()
            .ok_or_else(|| TransportError::Unavailable("push connection missing".into()))
    }

    async fn establish(&self) -> Result<Connection, TransportError> {
        let url = self
            .config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| TransportError::Unavailable("push endpoint not configured".into()))?;

        tracing::debug!(url = %url, "Connecting push transport");
        let connect = tokio_tungstenite::connect_async(url);
        let (socket, _response) =
            match tokio::time::timeout(self.config.connect_timeout(), connect).await {
                Err(_) => {
                    return Err(TransportError::ConnectTimeout(
                        self.config.connect_timeout_ms,
                    ))
                }
                Ok(Err(e)) => return Err(TransportError::Unavailable(e.to_string())),
                Ok(Ok(pair)) => pair,
            };
        tracing::info!(url = %url, "Push connection established");

        let id = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (sink, stream) = socket.split();
        let shutdown = CancellationToken::new();
        tokio::spawn(read_loop(
            stream,
            Arc::clone(&self.routes),
            id,
            shutdown.clone(),
        ));

        Ok(Connection { id, sink, shutdown })
    }
}

#[async_trait]
impl TransportChannel for PushTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Push
    }

    fn is_available(&self) -> bool {
        self.config.is_active()
    }

    async fn open(
        &self,
        stream_id: &StreamId,
        request: &TurnRequest,
    ) -> Result<StreamHandle, TransportError> {
        if !self.is_available() {
            return Err(TransportError::Unavailable("push transport disabled".into()));
        }

        let envelope = request.push_envelope(stream_id)?;

        let mut guard = self.connection.lock().await;
        let connection = self.ensure_connected(&mut *guard).await?;

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        self.routes.insert(
            stream_id.clone(),
            Route {
                connection: connection.id,
                tx,
            },
        );

        if let Err(e) = connection.sink.send(Message::Text(envelope.into())).await {
            self.routes.remove(stream_id);
            connection.shutdown.cancel();
            return Err(TransportError::SendFailed(e.to_string()));
        }

        tracing::debug!(stream_id = %stream_id, "Push stream opened");
        Ok(StreamHandle::new(
            stream_id.clone(),
            TransportKind::Push,
            rx,
            connection.shutdown.child_token(),
        ))
    }

    async fn close(&self, handle: &StreamHandle) {
        // The protocol has no per-stream abort, so stopping a live stream
        // closes the socket it runs on. The next turn reconnects.
        if let Some((_, route)) = self.routes.remove(handle.stream_id()) {
            self.disconnect_generation(route.connection).await;
        }
        tracing::debug!(stream_id = %handle.stream_id(), "Push stream closed");
    }
}

async fn shut_down(mut connection: Connection) {
    connection.shutdown.cancel();
    if let Err(e) = connection.sink.close().await {
        tracing::debug!(error = %e, "Error closing push connection");
    }
    tracing::info!(connection = connection.id, "Push connection closed");
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    routes: Routes,
    connection: u64,
    shutdown: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            () = shutdown.cancelled() => break "connection closed".to_string(),
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => route_text(&routes, connection, &text).await,
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| format!("closed by server: {}", f.reason))
                        .unwrap_or_else(|| "closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "connection ended".to_string(),
            },
        }
    };

    shutdown.cancel();
    orphan_routes(&routes, connection, &reason).await;
}

/// Fail every stream still routed over connection `connection`
async fn orphan_routes(routes: &Routes, connection: u64, reason: &str) {
    let orphaned: Vec<StreamId> = routes
        .iter()
        .filter(|entry| entry.value().connection == connection)
        .map(|entry| entry.key().clone())
        .collect();

    for stream_id in orphaned {
        let Some((_, route)) = routes.remove_if(&stream_id, |_, r| r.connection == connection) else {
            continue;
        };
        tracing::warn!(stream_id = %stream_id, reason = %reason, "Push connection lost mid-stream");
        let _ = route
            .tx
            .send(Err(TransportError::ConnectionLost(reason.to_string())))
            .await;
    }
}

async fn route_text(routes: &Routes, connection: u64, text: &str) {
    let frame = match PushFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed push frame");
            return;
        }
    };

    let target = match frame.stream_id() {
        Some(id) => {
            let stream_id = StreamId(id.to_string());
            routes
                .get(&stream_id)
                .filter(|entry| entry.value().connection == connection)
                .map(|entry| entry.value().tx.clone())
                .map(|tx| (stream_id, tx))
        }
        None => {
            let mut own = routes
                .iter()
                .filter(|entry| entry.value().connection == connection)
                .map(|entry| (entry.key().clone(), entry.value().tx.clone()));
            match (own.next(), own.next()) {
                (Some(only), None) => Some(only),
                (None, _) => None,
                (Some(_), Some(_)) => {
                    tracing::warn!("Push frame without streamId is ambiguous");
                    None
                }
            }
        }
    };

    let Some((stream_id, tx)) = target else {
        tracing::debug!("Dropping push frame for unknown stream");
        return;
    };
    let Some(fragment) = frame.into_fragment(stream_id.clone()) else {
        return;
    };

    let terminal = fragment.is_terminal();
    if tx.send(Ok(fragment)).await.is_err() || terminal {
        routes.remove_if(&stream_id, |_, r| r.connection == connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::FragmentKind;

    #[test]
    fn test_unconfigured_push_is_unavailable() {
        let transport = PushTransport::new(PushConfig::default());
        assert!(!transport.is_available());
        assert_eq!(transport.kind(), TransportKind::Push);
    }

    #[tokio::test]
    async fn test_open_without_url_fails_fast() {
        let transport = PushTransport::new(PushConfig::default());
        let request = TurnRequest::new("hi", "m", Default::default());
        let err = transport.open(&StreamId::new(), &request).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(!transport.is_connected().await);
    }

    fn route(connection: u64) -> (Route, mpsc::Receiver<FrameResult>) {
        let (tx, rx) = mpsc::channel(4);
        (Route { connection, tx }, rx)
    }

    #[tokio::test]
    async fn test_route_single_active_stream_without_id() {
        let routes: Routes = Arc::new(DashMap::new());
        let (entry, mut rx) = route(1);
        routes.insert(StreamId("stream_a".into()), entry);

        route_text(&routes, 1, r#"{"type":"stream_chunk","content":"Hi"}"#).await;
        route_text(&routes, 1, "{not json").await;
        route_text(&routes, 1, r#"{"type":"stream_complete","fullContent":"Hi!"}"#).await;

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.payload(), Some("Hi"));
        let second = rx.recv().await.unwrap().unwrap();
        assert!(matches!(second.kind, FragmentKind::Done { .. }));
        // Terminal frame unregisters the stream
        assert!(routes.is_empty());
    }

    #[tokio::test]
    async fn test_route_by_stream_id() {
        let routes: Routes = Arc::new(DashMap::new());
        let (entry_a, mut rx_a) = route(1);
        let (entry_b, mut rx_b) = route(1);
        routes.insert(StreamId("a".into()), entry_a);
        routes.insert(StreamId("b".into()), entry_b);

        route_text(&routes, 1, r#"{"type":"stream_chunk","streamId":"b","content":"for b"}"#).await;
        route_text(&routes, 1, r#"{"type":"stream_chunk","content":"nobody"}"#).await;

        assert_eq!(rx_b.recv().await.unwrap().unwrap().payload(), Some("for b"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_frames_stay_on_their_connection() {
        let routes: Routes = Arc::new(DashMap::new());
        let (old, mut rx_old) = route(1);
        let (new, mut rx_new) = route(2);
        routes.insert(StreamId("old".into()), old);
        routes.insert(StreamId("new".into()), new);

        // An untagged frame on the old socket only has one candidate there.
        route_text(&routes, 1, r#"{"type":"stream_chunk","content":"late"}"#).await;
        // A tagged frame for a stream of another connection is dropped.
        route_text(&routes, 1, r#"{"type":"stream_chunk","streamId":"new","content":"x"}"#).await;

        assert_eq!(rx_old.recv().await.unwrap().unwrap().payload(), Some("late"));
        assert!(rx_new.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dying_connection_orphans_only_its_streams() {
        let routes: Routes = Arc::new(DashMap::new());
        let (old, mut rx_old) = route(1);
        let (new, mut rx_new) = route(2);
        routes.insert(StreamId("old".into()), old);
        routes.insert(StreamId("new".into()), new);

        orphan_routes(&routes, 1, "connection closed").await;

        assert!(matches!(
            rx_old.recv().await,
            Some(Err(TransportError::ConnectionLost(_)))
        ));
        assert!(rx_new.try_recv().is_err());
        assert_eq!(routes.len(), 1);
        assert!(routes.contains_key(&StreamId("new".into())));
    }
}
