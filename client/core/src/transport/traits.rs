//! Transport Traits
//!
//! `TransportChannel` abstracts one communication path to the generation
//! service. Both implementations hand back a [`StreamHandle`] whose frames are
//! delivered in the order the server produced them; the assembler never
//! reorders.
//!
//! Transports do not retry. Fallback policy lives in
//! [`StreamSession`](crate::streaming::StreamSession).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::messages::StreamId;
use crate::transport::frame::Fragment;
use crate::turn::TurnRequest;

/// Which transport carries a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent multiplexed WebSocket channel
    Push,
    /// One-shot HTTP streaming request
    Pull,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => f.write_str("push"),
            Self::Pull => f.write_str("pull"),
        }
    }
}

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel is not connected or disabled
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
    /// Connection establishment exceeded its bound
    #[error("Connect timed out after {0} ms")]
    ConnectTimeout(u64),
    /// The connection dropped while a stream was active
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    /// The response body ended without a terminal record
    #[error("Stream ended without a terminal record")]
    IncompleteStream,
    /// The backend answered with a non-success HTTP status
    #[error("Backend returned HTTP {status}: {body}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Response body text (may be empty)
        body: String,
    },
    /// Request could not be issued or its body could not be read
    #[error("Request failed: {0}")]
    Request(String),
    /// Outbound frame could not be written
    #[error("Send failed: {0}")]
    SendFailed(String),
    /// Outbound payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TransportError {
    /// Whether the failure happened before any stream was established
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::ConnectTimeout(_))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Items delivered on a stream handle
pub type FrameResult = Result<Fragment, TransportError>;

/// An open logical stream
///
/// Frames arrive on an ordered channel. A transport-level failure is delivered
/// in-band as an `Err` item, after which the channel closes.
#[derive(Debug)]
pub struct StreamHandle {
    stream_id: StreamId,
    kind: TransportKind,
    frames: mpsc::Receiver<FrameResult>,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Wrap a frame receiver
    #[must_use]
    pub fn new(
        stream_id: StreamId,
        kind: TransportKind,
        frames: mpsc::Receiver<FrameResult>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream_id,
            kind,
            frames,
            cancel,
        }
    }

    /// The logical stream this handle reads
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Transport carrying the stream
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Token that aborts the transport's read loop for this stream
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait for the next frame. `None` once the transport is done.
    pub async fn next_frame(&mut self) -> Option<FrameResult> {
        self.frames.recv().await
    }
}

/// One communication path to the generation service
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// Which transport this is
    fn kind(&self) -> TransportKind;

    /// Whether the channel can currently accept a new stream
    fn is_available(&self) -> bool;

    /// Deliver the turn to the backend and start receiving its frames
    async fn open(
        &self,
        stream_id: &StreamId,
        request: &TurnRequest,
    ) -> Result<StreamHandle, TransportError>;

    /// Stop delivering frames for a stream and release its resources
    async fn close(&self, handle: &StreamHandle);
}
