//! Conversation Driver
//!
//! The public controller presentation talks to. It owns the ordered message
//! list, the history window sent with each turn, and the single-flight gate:
//! while a turn is active, [`ConversationDriver::can_send`] is false and
//! [`ConversationDriver::submit`] rejects new input without touching state.
//!
//! # Usage
//!
//! ```ignore
//! let mut driver = ConversationDriver::from_config(&config)?;
//! driver.submit("오늘 주요 뉴스 알려줘")?;
//! while let Some(update) = driver.next_update().await {
//!     render(driver.messages());
//!     if driver.can_send() {
//!         break;
//!     }
//! }
//! ```
//!
//! Session updates are applied to the message list only when the driver is
//! polled ([`poll_updates`](ConversationDriver::poll_updates) or
//! [`next_update`](ConversationDriver::next_update)). Cancellation is applied
//! immediately.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, ConversationConfig};
use crate::error::NoticeCatalog;
use crate::messages::{
    ConversationId, HistoryEntry, Message, MessageId, MessageRole, MessageStatus, StreamId,
};
use crate::streaming::{Outcome, SessionUpdate, SharedAssembler, StreamSession, TransportSet};
use crate::transport::{
    PullTransport, PushTransport, TransportChannel, TransportError, TransportKind,
};
use crate::turn::{trim_history, PromptCard, TurnRequest};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Why a submission was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The input was empty or whitespace
    #[error("Message is empty")]
    EmptyInput,
    /// A turn is already in flight
    #[error("A response is still being generated")]
    TurnInProgress,
}

/// Latest progress report of the active turn
#[derive(Clone, Debug, PartialEq)]
pub struct TurnProgress {
    /// Step description
    pub step: String,
    /// Percentage if reported
    pub progress: Option<f64>,
}

/// Snapshot published to reactive consumers
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationView {
    /// Ordered message list
    pub messages: Vec<Message>,
    /// Whether a new turn may be submitted
    pub can_send: bool,
    /// Progress of the active turn
    pub progress: Option<TurnProgress>,
}

struct ActiveTurn {
    stream_id: StreamId,
    message_id: MessageId,
    assembler: SharedAssembler,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Controller for one conversation
pub struct ConversationDriver {
    transports: TransportSet,
    config: ConversationConfig,
    conversation_id: ConversationId,
    notices: NoticeCatalog,
    prompt_cards: Vec<PromptCard>,
    messages: Vec<Message>,
    active: Option<ActiveTurn>,
    /// Cancelled session still releasing its transport
    releasing: Option<JoinHandle<()>>,
    progress: Option<TurnProgress>,
    last_transport: Option<TransportKind>,
    updates_tx: mpsc::Sender<SessionUpdate>,
    updates_rx: mpsc::Receiver<SessionUpdate>,
    view_tx: watch::Sender<ConversationView>,
}

impl ConversationDriver {
    /// Create a driver over an explicit transport set
    #[must_use]
    pub fn new(transports: TransportSet, config: ConversationConfig) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (view_tx, _) = watch::channel(ConversationView {
            can_send: true,
            ..ConversationView::default()
        });
        let notices = NoticeCatalog::new(config.locale);
        Self {
            transports,
            config,
            conversation_id: ConversationId::new(),
            notices,
            prompt_cards: Vec::new(),
            messages: Vec::new(),
            active: None,
            releasing: None,
            progress: None,
            last_transport: None,
            updates_tx,
            updates_rx,
            view_tx,
        }
    }

    /// Build transports from configuration and create a driver
    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        let pull: Arc<dyn TransportChannel> = Arc::new(PullTransport::new(config.pull.clone())?);
        let transports = if config.push.is_active() {
            let push: Arc<dyn TransportChannel> = Arc::new(PushTransport::new(config.push.clone()));
            TransportSet::with_push(push, pull)
        } else {
            TransportSet::pull_only(pull)
        };

        let mut driver = Self::new(transports, config.conversation.clone());
        driver.set_prompt_cards(config.prompt_cards.clone());
        Ok(driver)
    }

    /// Conversation identifier sent to the backend
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Ordered message list
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether a new turn may be submitted
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.active.is_none()
    }

    /// Stream of the active turn, if any
    #[must_use]
    pub fn active_stream_id(&self) -> Option<&StreamId> {
        self.active.as_ref().map(|turn| &turn.stream_id)
    }

    /// Latest progress report of the active turn
    #[must_use]
    pub fn progress(&self) -> Option<&TurnProgress> {
        self.progress.as_ref()
    }

    /// Transport that carried the most recent turn
    #[must_use]
    pub fn last_transport(&self) -> Option<TransportKind> {
        self.last_transport
    }

    /// Replace the prompt cards sent with future turns
    pub fn set_prompt_cards(&mut self, cards: Vec<PromptCard>) {
        self.prompt_cards = cards;
    }

    /// Receive a snapshot on every state change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConversationView> {
        self.view_tx.subscribe()
    }

    /// History that would accompany the next turn
    ///
    /// User messages and successfully completed answers, oldest first, trimmed
    /// to the configured window. Errored and cancelled answers carry notices
    /// rather than model output and are left out.
    #[must_use]
    pub fn history_window(&self) -> Vec<HistoryEntry> {
        let entries = self
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::User || m.status == MessageStatus::Complete)
            .map(|m| HistoryEntry {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();
        trim_history(entries, self.config.history_window)
    }

    /// Start a turn. Must be called from within a tokio runtime.
    ///
    /// Returns the id of the assistant placeholder message.
    pub fn submit(&mut self, input: &str) -> Result<MessageId, SubmitError> {
        if self.active.is_some() {
            tracing::debug!("Submission rejected: turn in progress");
            return Err(SubmitError::TurnInProgress);
        }
        let text = input.trim();
        if text.is_empty() {
            return Err(SubmitError::EmptyInput);
        }

        let request = TurnRequest::new(text, &self.config.model_id, self.conversation_id.clone())
            .with_history(self.history_window())
            .with_cards(&self.prompt_cards)
            .with_project(self.config.project_id.clone())
            .with_user(self.config.user_id.clone())
            .with_knowledge_base(self.config.use_knowledge_base);

        self.messages.push(Message::user(text));
        let placeholder = Message::assistant_placeholder();
        let message_id = placeholder.id.clone();
        self.messages.push(placeholder);

        let stream_id = StreamId::new();
        let session = StreamSession::new(
            stream_id.clone(),
            self.transports.clone(),
            self.notices,
            self.updates_tx.clone(),
        )
        .after(self.releasing.take());
        let assembler = session.assembler();
        let cancel = session.cancel_token();

        tracing::info!(
            stream_id = %stream_id,
            history = request.chat_history.len(),
            cards = request.prompt_cards.len(),
            "Turn submitted"
        );
        let task = session.spawn(request);

        self.active = Some(ActiveTurn {
            stream_id,
            message_id: message_id.clone(),
            assembler,
            cancel,
            task,
        });
        self.progress = None;
        self.publish();
        Ok(message_id)
    }

    /// Apply every queued session update without waiting
    ///
    /// Returns true if anything was applied.
    pub fn poll_updates(&mut self) -> bool {
        let mut applied = false;
        while let Ok(update) = self.updates_rx.try_recv() {
            applied |= self.apply(update);
        }
        applied
    }

    /// Wait for the next session update of the active turn and apply it
    ///
    /// Returns `None` immediately when no turn is active and nothing is queued.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let update = if self.active.is_some() {
                self.updates_rx.recv().await?
            } else {
                self.updates_rx.try_recv().ok()?
            };
            if self.apply(update.clone()) {
                return Some(update);
            }
        }
    }

    /// Cancel the active turn
    ///
    /// The assistant message becomes `Cancelled` with its partial content and
    /// a notice, and the gate reopens before this returns. Returns false if
    /// no turn was active.
    ///
    /// The cancelled session keeps running until its transport is closed. A
    /// turn submitted meanwhile waits for that before it opens a transport.
    pub fn cancel(&mut self) -> bool {
        let Some(turn) = self.active.take() else {
            return false;
        };

        let outcome = {
            let mut assembler = turn.assembler.lock();
            // If the stream already settled, its outcome is still queued.
            assembler.cancel().or_else(|| assembler.outcome().cloned())
        };
        turn.cancel.cancel();
        self.releasing = Some(turn.task);

        if let Some(outcome) = outcome {
            self.finish_message(&turn.message_id, outcome);
        }
        self.progress = None;
        tracing::info!(stream_id = %turn.stream_id, "Turn cancelled");
        self.publish();
        true
    }

    /// Reset the session-scoped history
    pub fn clear(&mut self) -> Result<(), SubmitError> {
        if self.active.is_some() {
            return Err(SubmitError::TurnInProgress);
        }
        while self.updates_rx.try_recv().is_ok() {}
        self.messages.clear();
        self.progress = None;
        self.conversation_id = ConversationId::new();
        self.publish();
        Ok(())
    }

    fn apply(&mut self, update: SessionUpdate) -> bool {
        let Some(turn) = self.active.as_ref() else {
            tracing::trace!(stream_id = %update.stream_id(), "Dropping update for settled turn");
            return false;
        };
        if update.stream_id() != &turn.stream_id {
            tracing::trace!(stream_id = %update.stream_id(), "Dropping update for stale stream");
            return false;
        }
        let message_id = turn.message_id.clone();

        match update {
            SessionUpdate::TransportSelected { transport, .. } => {
                self.last_transport = Some(transport);
            }
            SessionUpdate::Progress { step, progress, .. } => {
                self.progress = Some(TurnProgress { step, progress });
            }
            SessionUpdate::Content { content, .. } => {
                if let Some(message) = self.message_mut(&message_id) {
                    message.set_live_content(content);
                }
            }
            SessionUpdate::Finished { outcome, .. } => {
                self.finish_message(&message_id, outcome);
                self.active = None;
                self.progress = None;
            }
        }

        self.publish();
        true
    }

    fn finish_message(&mut self, message_id: &MessageId, outcome: Outcome) {
        if let Some(message) = self.message_mut(message_id) {
            message.finish(
                outcome.status,
                outcome.content,
                outcome.sources,
                outcome.thinking_process,
                outcome.failure,
            );
        }
    }

    fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| &m.id == id)
    }

    fn publish(&self) {
        self.view_tx.send_replace(ConversationView {
            messages: self.messages.clone(),
            can_send: self.can_send(),
            progress: self.progress.clone(),
        });
    }
}

impl Drop for ConversationDriver {
    fn drop(&mut self) {
        if let Some(turn) = self.active.take() {
            turn.cancel.cancel();
            turn.task.abort();
        }
    }
}
