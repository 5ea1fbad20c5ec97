//! Stream Session
//!
//! Binds one user turn to one transport choice and one assembler.
//!
//! 1. Try the push transport, if it reports itself available.
//! 2. If push is unavailable or `open` fails, use the pull transport with the
//!    same [`TurnRequest`]. Push is not retried within the turn.
//! 3. Feed every frame into the assembler in arrival order and relay the
//!    resulting updates to the driver.
//!
//! Cancellation is cooperative at the transport boundary and synchronous at
//! the assembler: whoever cancels the shared assembler first wins, and the
//! session stops honoring frames as soon as it observes the token.
//!
//! A cancelled session may still be closing its transport when the next turn
//! starts. The next session is given that task as its predecessor and waits
//! for it (bounded by [`PREDECESSOR_GRACE`]) before opening anything.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::assembler::{Applied, AssemblyMode, FragmentAssembler, Outcome};
use crate::error::NoticeCatalog;
use crate::messages::StreamId;
use crate::transport::{StreamHandle, TransportChannel, TransportError, TransportKind};
use crate::turn::TurnRequest;

/// Longest wait for a cancelled predecessor to release its transport
pub const PREDECESSOR_GRACE: Duration = Duration::from_secs(2);

/// Assembler shared between the session task and the driver
pub type SharedAssembler = Arc<Mutex<FragmentAssembler>>;

/// Event relayed from a session to its driver
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    /// A transport accepted the turn
    TransportSelected {
        /// Stream
        stream_id: StreamId,
        /// Chosen transport
        transport: TransportKind,
    },
    /// Informational progress
    Progress {
        /// Stream
        stream_id: StreamId,
        /// Step description
        step: String,
        /// Percentage if reported
        progress: Option<f64>,
    },
    /// Live preview changed
    Content {
        /// Stream
        stream_id: StreamId,
        /// Full preview text
        content: String,
    },
    /// Terminal state reached
    Finished {
        /// Stream
        stream_id: StreamId,
        /// Final content and status
        outcome: Outcome,
    },
}

impl SessionUpdate {
    /// Stream the update belongs to
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        match self {
            Self::TransportSelected { stream_id, .. }
            | Self::Progress { stream_id, .. }
            | Self::Content { stream_id, .. }
            | Self::Finished { stream_id, .. } => stream_id,
        }
    }
}

/// The transports available to a session
#[derive(Clone)]
pub struct TransportSet {
    /// Primary path, if configured
    pub push: Option<Arc<dyn TransportChannel>>,
    /// Fallback path
    pub pull: Arc<dyn TransportChannel>,
}

impl TransportSet {
    /// Pull-only set
    #[must_use]
    pub fn pull_only(pull: Arc<dyn TransportChannel>) -> Self {
        Self { push: None, pull }
    }

    /// Push with pull fallback
    #[must_use]
    pub fn with_push(push: Arc<dyn TransportChannel>, pull: Arc<dyn TransportChannel>) -> Self {
        Self {
            push: Some(push),
            pull,
        }
    }
}

/// One user turn in flight
pub struct StreamSession {
    stream_id: StreamId,
    transports: TransportSet,
    assembler: SharedAssembler,
    cancel: CancellationToken,
    updates: mpsc::Sender<SessionUpdate>,
    predecessor: Option<JoinHandle<()>>,
}

impl StreamSession {
    /// Create a session with a fresh assembler
    #[must_use]
    pub fn new(
        stream_id: StreamId,
        transports: TransportSet,
        notices: NoticeCatalog,
        updates: mpsc::Sender<SessionUpdate>,
    ) -> Self {
        let assembler = FragmentAssembler::new(stream_id.clone(), AssemblyMode::Append, notices);
        Self {
            stream_id,
            transports,
            assembler: Arc::new(Mutex::new(assembler)),
            cancel: CancellationToken::new(),
            updates,
            predecessor: None,
        }
    }

    /// Do not open a transport until `task` has finished
    #[must_use]
    pub fn after(mut self, task: Option<JoinHandle<()>>) -> Self {
        self.predecessor = task;
        self
    }

    /// Stream identifier
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Shared handle to the assembler
    #[must_use]
    pub fn assembler(&self) -> SharedAssembler {
        Arc::clone(&self.assembler)
    }

    /// Token that stops the session
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the session on the runtime
    pub fn spawn(self, request: TurnRequest) -> JoinHandle<()> {
        tokio::spawn(self.run(request))
    }

    /// Drive the turn to a terminal state
    pub async fn run(mut self, request: TurnRequest) {
        let predecessor = self.predecessor.take();
        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.finish_cancelled().await;
                return;
            }
            opened = async {
                self.await_predecessor(predecessor).await;
                self.open(&request).await
            } => opened,
        };

        let (mut handle, transport) = match opened {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(stream_id = %self.stream_id, error = %e, "No transport accepted the turn");
                let outcome = self.assembler.lock().fail_transport(&e);
                if let Some(outcome) = outcome {
                    self.emit_finished(outcome).await;
                }
                return;
            }
        };

        let kind = handle.kind();
        self.assembler.lock().set_mode(AssemblyMode::from(kind));
        tracing::info!(stream_id = %self.stream_id, transport = %kind, "Stream started");
        self.emit(SessionUpdate::TransportSelected {
            stream_id: self.stream_id.clone(),
            transport: kind,
        })
        .await;

        loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    transport.close(&handle).await;
                    self.finish_cancelled().await;
                    return;
                }
                frame = handle.next_frame() => frame,
            };

            let applied = {
                let mut assembler = self.assembler.lock();
                match frame {
                    Some(Ok(fragment)) => assembler.apply(fragment),
                    Some(Err(e)) => {
                        tracing::warn!(stream_id = %self.stream_id, transport = %kind, error = %e, "Transport failed mid-stream");
                        assembler
                            .fail_transport(&e)
                            .map_or(Applied::Ignored, Applied::Finished)
                    }
                    None => assembler
                        .fail_transport(&TransportError::ConnectionLost(
                            "frame channel closed".into(),
                        ))
                        .map_or(Applied::Ignored, Applied::Finished),
                }
            };

            match applied {
                Applied::Ignored => {
                    if self.assembler.lock().is_terminal() {
                        // Settled elsewhere, most likely by a synchronous cancel.
                        transport.close(&handle).await;
                        return;
                    }
                }
                Applied::Started => {
                    tracing::debug!(stream_id = %self.stream_id, "Backend accepted stream");
                }
                Applied::Progress { step, progress } => {
                    self.emit(SessionUpdate::Progress {
                        stream_id: self.stream_id.clone(),
                        step,
                        progress,
                    })
                    .await;
                }
                Applied::Content(content) => {
                    self.emit(SessionUpdate::Content {
                        stream_id: self.stream_id.clone(),
                        content,
                    })
                    .await;
                }
                Applied::Finished(outcome) => {
                    let fragments = self.assembler.lock().applied_count();
                    tracing::info!(
                        stream_id = %self.stream_id,
                        transport = %kind,
                        status = ?outcome.status,
                        fragments,
                        "Stream finished"
                    );
                    self.emit_finished(outcome).await;
                    return;
                }
            }
        }
    }

    async fn open(
        &self,
        request: &TurnRequest,
    ) -> Result<(StreamHandle, Arc<dyn TransportChannel>), TransportError> {
        match self.transports.push.as_ref() {
            Some(push) if push.is_available() => {
                match push.open(&self.stream_id, request).await {
                    Ok(handle) => return Ok((handle, Arc::clone(push))),
                    Err(e) if e.is_unavailable() => tracing::info!(
                        stream_id = %self.stream_id,
                        error = %e,
                        "Push unreachable, falling back to pull"
                    ),
                    Err(e) => tracing::warn!(
                        stream_id = %self.stream_id,
                        error = %e,
                        "Push open failed, falling back to pull"
                    ),
                }
            }
            _ => tracing::info!(stream_id = %self.stream_id, "Push unavailable, using pull"),
        }

        let pull = Arc::clone(&self.transports.pull);
        let handle = pull.open(&self.stream_id, request).await?;
        Ok((handle, pull))
    }

    async fn await_predecessor(&self, task: Option<JoinHandle<()>>) {
        let Some(task) = task else {
            return;
        };
        if tokio::time::timeout(PREDECESSOR_GRACE, task).await.is_err() {
            tracing::warn!(
                stream_id = %self.stream_id,
                "Previous turn still releasing its transport, opening anyway"
            );
        }
    }

    async fn finish_cancelled(&self) {
        let outcome = self.assembler.lock().cancel();
        if let Some(outcome) = outcome {
            self.emit_finished(outcome).await;
        }
        tracing::info!(stream_id = %self.stream_id, "Stream cancelled");
    }

    async fn emit_finished(&self, outcome: Outcome) {
        self.emit(SessionUpdate::Finished {
            stream_id: self.stream_id.clone(),
            outcome,
        })
        .await;
    }

    async fn emit(&self, update: SessionUpdate) {
        if self.updates.send(update).await.is_err() {
            tracing::debug!(stream_id = %self.stream_id, "Session update dropped, driver gone");
        }
    }
}
