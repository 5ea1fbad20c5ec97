//! Pull Transport
//!
//! Fallback path: one HTTP POST per turn whose response body is an
//! event-stream of `data: ` records. Each record's `result` is the cumulative
//! text so far, so the assembler runs in replace mode for this transport.
//!
//! The body is read until a terminal record arrives. Running out of body
//! without one is reported as [`TransportError::IncompleteStream`].

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::{PullConfig, FRAME_CHANNEL_CAPACITY};
use super::frame::{parse_pull_record, sse_data, Fragment, FragmentKind, LineDecoder};
use super::traits::{
    FrameResult, StreamHandle, TransportChannel, TransportError, TransportKind,
};
use crate::messages::StreamId;
use crate::turn::TurnRequest;

/// HTTP event-stream transport
#[derive(Clone)]
pub struct PullTransport {
    config: PullConfig,
    http_client: reqwest::Client,
}

impl PullTransport {
    /// Create a transport for the configured endpoint
    pub fn new(config: PullConfig) -> Result<Self, TransportError> {
        // Connect timeout only. An active stream has no wall-clock limit.
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Transport configuration
    #[must_use]
    pub fn config(&self) -> &PullConfig {
        &self.config
    }
}

#[async_trait]
impl TransportChannel for PullTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Pull
    }

    fn is_available(&self) -> bool {
        !self.config.url.trim().is_empty()
    }

    async fn open(
        &self,
        stream_id: &StreamId,
        request: &TurnRequest,
    ) -> Result<StreamHandle, TransportError> {
        if !self.is_available() {
            return Err(TransportError::Unavailable("pull endpoint not configured".into()));
        }

        let body = request.pull_body(stream_id)?;
        let mut builder = self
            .http_client
            .post(&self.config.url)
            .header(ACCEPT, "text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(&body);
        if let Some(token) = self.config.auth_token.as_deref() {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(stream_id = %stream_id, status, "Pull request rejected");
            return Err(TransportError::HttpStatus { status, body });
        }

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        tokio::spawn(read_body(
            response,
            stream_id.clone(),
            tx,
            cancel.clone(),
        ));

        tracing::debug!(stream_id = %stream_id, "Pull stream opened");
        Ok(StreamHandle::new(
            stream_id.clone(),
            TransportKind::Pull,
            rx,
            cancel,
        ))
    }

    async fn close(&self, handle: &StreamHandle) {
        handle.cancel_token().cancel();
        tracing::debug!(stream_id = %handle.stream_id(), "Pull stream aborted");
    }
}

/// Outcome of feeding one line to the stream
enum LineOutcome {
    Continue,
    Terminal,
    ReceiverGone,
}

async fn read_body(
    response: reqwest::Response,
    stream_id: StreamId,
    tx: mpsc::Sender<FrameResult>,
    cancel: CancellationToken,
) {
    let mut stream = response.bytes_stream();
    let mut decoder = LineDecoder::new();
    let mut sequence = 0u64;

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(stream_id = %stream_id, "Pull read loop cancelled");
                return;
            }
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for line in decoder.push(&bytes) {
                    match deliver_line(&line, &stream_id, &mut sequence, &tx).await {
                        LineOutcome::Continue => {}
                        LineOutcome::Terminal | LineOutcome::ReceiverGone => return,
                    }
                }
            }
            Some(Err(e)) => {
                let _ = tx.send(Err(TransportError::ConnectionLost(e.to_string()))).await;
                return;
            }
            None => break,
        }
    }

    if let Some(line) = decoder.finish() {
        match deliver_line(&line, &stream_id, &mut sequence, &tx).await {
            LineOutcome::Continue => {}
            LineOutcome::Terminal | LineOutcome::ReceiverGone => return,
        }
    }

    tracing::warn!(stream_id = %stream_id, "Pull body ended without a terminal record");
    let _ = tx.send(Err(TransportError::IncompleteStream)).await;
}

async fn deliver_line(
    line: &str,
    stream_id: &StreamId,
    sequence: &mut u64,
    tx: &mpsc::Sender<FrameResult>,
) -> LineOutcome {
    let Some(data) = sse_data(line) else {
        return LineOutcome::Continue;
    };

    let kind = match parse_pull_record(data) {
        Ok(Some(kind)) => kind,
        Ok(None) => return LineOutcome::Continue,
        Err(e) => {
            tracing::warn!(stream_id = %stream_id, error = %e, "Skipping malformed pull record");
            return LineOutcome::Continue;
        }
    };

    let mut fragment = Fragment::new(stream_id.clone(), kind);
    if matches!(fragment.kind, FragmentKind::Chunk { .. }) {
        fragment.sequence_hint = Some(*sequence);
        *sequence += 1;
    }

    let terminal = fragment.is_terminal();
    if tx.send(Ok(fragment)).await.is_err() {
        return LineOutcome::ReceiverGone;
    }
    if terminal {
        LineOutcome::Terminal
    } else {
        LineOutcome::Continue
    }
}
