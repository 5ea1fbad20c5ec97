//! Fragment Assembler
//!
//! Reduces the ordered fragment sequence of one stream into a single message
//! text and a terminal status.
//!
//! ```text
//! Idle ──> Accumulating ──> Finalizing ──> Complete
//!   │           │
//!   └───────────┴──> Errored | Cancelled
//! ```
//!
//! The two transports report progress differently. Push chunks are deltas
//! and are appended; pull chunks carry the cumulative text and replace the
//! buffer. The assembler is told which mode it is in and never guesses.
//!
//! Once terminal, every further fragment is discarded.

use serde_json::Value;

use crate::error::{classify_message, classify_transport, FailureKind, NoticeCatalog};
use crate::messages::{MessageStatus, Source, StreamId};
use crate::transport::{Fragment, FragmentKind, TransportError, TransportKind};

/// How chunk payloads combine with the buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssemblyMode {
    /// `content := content + payload`
    Append,
    /// `content := payload`
    Replace,
}

impl From<TransportKind> for AssemblyMode {
    fn from(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Push => Self::Append,
            TransportKind::Pull => Self::Replace,
        }
    }
}

/// Assembler lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssemblerState {
    /// No fragment seen yet
    Idle,
    /// Fragments are arriving
    Accumulating,
    /// Terminal frame received, final content being settled
    Finalizing,
    /// Finished successfully
    Complete,
    /// Finished with a failure
    Errored,
    /// Cancelled by the user
    Cancelled,
}

impl AssemblerState {
    /// Whether no further fragment will be honored
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Errored | Self::Cancelled)
    }
}

/// Final state of an assembled message
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    /// Terminal message status
    pub status: MessageStatus,
    /// Final visible content, including any notice
    pub content: String,
    /// Citations
    pub sources: Vec<Source>,
    /// Reasoning steps
    pub thinking_process: Vec<Value>,
    /// Failure classification, for errored and cancelled outcomes
    pub failure: Option<FailureKind>,
}

/// Effect of applying one fragment
#[derive(Clone, Debug, PartialEq)]
pub enum Applied {
    /// Fragment discarded (late, foreign, or uninformative)
    Ignored,
    /// Backend accepted the turn
    Started,
    /// Informational progress
    Progress {
        /// Step description
        step: String,
        /// Percentage if reported
        progress: Option<f64>,
    },
    /// Live preview changed
    Content(String),
    /// Stream reached a terminal state
    Finished(Outcome),
}

/// Per-stream reassembly state machine
#[derive(Debug)]
pub struct FragmentAssembler {
    stream_id: StreamId,
    mode: AssemblyMode,
    state: AssemblerState,
    content: String,
    notices: NoticeCatalog,
    outcome: Option<Outcome>,
    applied: u64,
}

impl FragmentAssembler {
    /// Create an idle assembler for a stream
    #[must_use]
    pub fn new(stream_id: StreamId, mode: AssemblyMode, notices: NoticeCatalog) -> Self {
        Self {
            stream_id,
            mode,
            state: AssemblerState::Idle,
            content: String::new(),
            notices,
            outcome: None,
            applied: 0,
        }
    }

    /// Stream this assembler belongs to
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Current mode
    #[must_use]
    pub fn mode(&self) -> AssemblyMode {
        self.mode
    }

    /// Switch mode after a transport fallback. Only allowed before the first
    /// fragment, so a live buffer never mixes the two semantics.
    pub fn set_mode(&mut self, mode: AssemblyMode) -> bool {
        if self.state != AssemblerState::Idle {
            return false;
        }
        self.mode = mode;
        true
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Whether the assembler reached a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Live preview (or final content once terminal)
    #[must_use]
    pub fn content(&self) -> &str {
        self.outcome
            .as_ref()
            .map_or(self.content.as_str(), |o| o.content.as_str())
    }

    /// Terminal outcome, once reached
    #[must_use]
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Number of fragments that changed state
    #[must_use]
    pub fn applied_count(&self) -> u64 {
        self.applied
    }

    /// Apply the next fragment in arrival order
    pub fn apply(&mut self, fragment: Fragment) -> Applied {
        if self.is_terminal() {
            tracing::trace!(stream_id = %self.stream_id, "Discarding late fragment");
            return Applied::Ignored;
        }
        if fragment.stream_id != self.stream_id {
            tracing::warn!(
                expected = %self.stream_id,
                got = %fragment.stream_id,
                "Discarding fragment for another stream"
            );
            return Applied::Ignored;
        }

        if self.state == AssemblerState::Idle {
            self.state = AssemblerState::Accumulating;
        }
        self.applied += 1;

        match fragment.kind {
            FragmentKind::Start => Applied::Started,
            FragmentKind::Progress { step, progress } => Applied::Progress { step, progress },
            FragmentKind::Chunk { payload } => {
                match self.mode {
                    AssemblyMode::Append => self.content.push_str(&payload),
                    AssemblyMode::Replace => self.content = payload,
                }
                Applied::Content(self.content.clone())
            }
            FragmentKind::Done {
                full_content,
                sources,
                thinking_process,
            } => {
                self.state = AssemblerState::Finalizing;
                let content = match full_content.filter(|c| !c.is_empty()) {
                    Some(full) => full,
                    None => std::mem::take(&mut self.content),
                };
                Applied::Finished(self.settle(Outcome {
                    status: MessageStatus::Complete,
                    content,
                    sources,
                    thinking_process,
                    failure: None,
                }))
            }
            FragmentKind::Error { message } => {
                let kind = classify_message(&message);
                Applied::Finished(self.settle_failure(kind, Some(&message)))
            }
        }
    }

    /// Force a failure, keeping the partial content visible
    ///
    /// Kinds that are normally handled silently (fallback, skip) are reported
    /// as [`FailureKind::Backend`] when they do end a turn. Returns `None` if
    /// the assembler was already terminal.
    pub fn fail(&mut self, kind: FailureKind, detail: Option<&str>) -> Option<Outcome> {
        if self.is_terminal() {
            return None;
        }
        let kind = if kind.is_surfaced() {
            kind
        } else {
            FailureKind::Backend
        };
        Some(self.settle_failure(kind, detail))
    }

    /// Force a failure from a transport error
    pub fn fail_transport(&mut self, error: &TransportError) -> Option<Outcome> {
        let detail = error.to_string();
        self.fail(classify_transport(error), Some(&detail))
    }

    /// Cancel, keeping the partial content visible
    ///
    /// Synchronous: no fragment is honored after this returns.
    pub fn cancel(&mut self) -> Option<Outcome> {
        if self.is_terminal() {
            return None;
        }
        let content = with_notice(
            std::mem::take(&mut self.content),
            self.notices.cancelled(),
        );
        self.state = AssemblerState::Cancelled;
        Some(self.settle(Outcome {
            status: MessageStatus::Cancelled,
            content,
            sources: Vec::new(),
            thinking_process: Vec::new(),
            failure: Some(FailureKind::Cancelled),
        }))
    }

    fn settle_failure(&mut self, kind: FailureKind, detail: Option<&str>) -> Outcome {
        let notice = self.notices.failure(kind, detail);
        let content = with_notice(std::mem::take(&mut self.content), &notice);
        self.state = AssemblerState::Errored;
        tracing::debug!(stream_id = %self.stream_id, failure = %kind, "Stream errored");
        self.settle(Outcome {
            status: MessageStatus::Errored,
            content,
            sources: Vec::new(),
            thinking_process: Vec::new(),
            failure: Some(kind),
        })
    }

    fn settle(&mut self, outcome: Outcome) -> Outcome {
        if outcome.status == MessageStatus::Complete {
            self.state = AssemblerState::Complete;
        }
        self.outcome = Some(outcome.clone());
        outcome
    }
}

fn with_notice(partial: String, notice: &str) -> String {
    if partial.is_empty() {
        notice.to_string()
    } else {
        format!("{partial}\n\n{notice}")
    }
}
