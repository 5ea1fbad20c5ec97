//! Conversation Messages
//!
//! The message model exposed to presentation. A [`Message`] is owned by the
//! [`ConversationDriver`](crate::driver::ConversationDriver) and is only
//! mutated through stream session updates while it is not terminal.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──> Streaming ──> Complete
//!    │            │
//!    └────────────┴──────> Errored | Cancelled
//! ```
//!
//! Presentation reads `content`, [`Message::is_streaming`] and
//! [`Message::is_error`]; nothing else about the protocol leaks out.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureKind;

/// Unique message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("msg_{}", Uuid::new_v4().simple()))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one logical stream (one user turn)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub String);

impl StreamId {
    /// Generate a new unique stream ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("stream_{}", Uuid::new_v4().simple()))
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation identifier forwarded to the backend
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Generate a new conversation ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The human user
    User,
    /// The generation service
    Assistant,
}

impl MessageRole {
    /// Wire name used in `chat_history`
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Lifecycle status of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Placeholder created, no fragment received yet
    Pending,
    /// Fragments are arriving
    Streaming,
    /// Finished successfully
    Complete,
    /// Finished with a failure notice appended
    Errored,
    /// Cancelled by the user
    Cancelled,
}

impl MessageStatus {
    /// Whether this status is final
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Errored | Self::Cancelled)
    }
}

/// Citation metadata attached to a completed answer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Citation number
    #[serde(default)]
    pub id: serde_json::Value,
    /// Article title
    #[serde(default)]
    pub title: String,
    /// Link to the original
    #[serde(default)]
    pub url: String,
    /// Publication date as reported by the backend
    #[serde(default)]
    pub date: String,
}

/// One entry in the conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message text (the live preview while streaming)
    pub content: String,
    /// Lifecycle status
    pub status: MessageStatus,
    /// Citations, set once the message completes
    pub sources: Vec<Source>,
    /// Reasoning steps reported alongside the final answer
    #[serde(default)]
    pub thinking_process: Vec<serde_json::Value>,
    /// Failure classification for errored messages
    #[serde(default)]
    pub failure: Option<FailureKind>,
    /// When the message was created
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a complete user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::User,
            content: content.into(),
            status: MessageStatus::Complete,
            sources: Vec::new(),
            thinking_process: Vec::new(),
            failure: None,
            created_at: Utc::now(),
        }
    }

    /// Create an empty assistant placeholder awaiting a stream
    #[must_use]
    pub fn assistant_placeholder() -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::Assistant,
            content: String::new(),
            status: MessageStatus::Pending,
            sources: Vec::new(),
            thinking_process: Vec::new(),
            failure: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the assistant is still producing this message
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self.status, MessageStatus::Pending | MessageStatus::Streaming)
    }

    /// Whether the message ended in failure
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == MessageStatus::Errored
    }

    /// Replace the live preview. Ignored once the message is terminal.
    pub fn set_live_content(&mut self, content: String) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.content = content;
        self.status = MessageStatus::Streaming;
        true
    }

    /// Move the message into a terminal status. Ignored if already terminal.
    pub fn finish(
        &mut self,
        status: MessageStatus,
        content: String,
        sources: Vec<Source>,
        thinking_process: Vec<serde_json::Value>,
        failure: Option<FailureKind>,
    ) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.content = content;
        self.sources = sources;
        self.thinking_process = thinking_process;
        self.failure = failure;
        true
    }
}

/// One `{role, content}` entry of the outbound chat history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// `user` or `assistant`
    pub role: MessageRole,
    /// Message text
    pub content: String,
}
