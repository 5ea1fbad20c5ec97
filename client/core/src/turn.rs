//! Turn Requests
//!
//! Everything one user turn sends to the generation service. Both transports
//! serialize the same [`TurnRequest`], so the backend sees identical
//! parameters regardless of which path carried the turn.

use serde::{Deserialize, Serialize};

use crate::messages::{ConversationId, HistoryEntry, StreamId};

/// Default number of history entries sent with a turn
pub const DEFAULT_HISTORY_WINDOW: usize = 50;

fn default_enabled() -> bool {
    true
}

/// A prompt/context card that steers generation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptCard {
    /// Card identifier
    #[serde(rename = "promptId")]
    pub prompt_id: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Instruction text
    #[serde(default)]
    pub prompt_text: String,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Position in the card sequence
    #[serde(rename = "stepOrder", default)]
    pub step_order: i64,
    /// Disabled cards are never sent
    #[serde(default = "default_enabled", skip_serializing)]
    pub enabled: bool,
}

impl PromptCard {
    /// Create an enabled card
    pub fn new(prompt_id: impl Into<String>, prompt_text: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            title: String::new(),
            prompt_text: prompt_text.into(),
            tags: Vec::new(),
            step_order: 0,
            enabled: true,
        }
    }

    /// Set title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set step order
    #[must_use]
    pub fn with_step_order(mut self, step_order: i64) -> Self {
        self.step_order = step_order;
        self
    }

    /// Set enabled flag
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Cards that should accompany a turn: enabled, non-empty, in step order
#[must_use]
pub fn active_cards(cards: &[PromptCard]) -> Vec<PromptCard> {
    let mut active: Vec<PromptCard> = cards
        .iter()
        .filter(|card| card.enabled && !card.prompt_text.trim().is_empty())
        .cloned()
        .collect();
    active.sort_by_key(|card| card.step_order);
    active
}

/// Keep only the most recent `window` entries
#[must_use]
pub fn trim_history(mut entries: Vec<HistoryEntry>, window: usize) -> Vec<HistoryEntry> {
    if entries.len() > window {
        entries.drain(..entries.len() - window);
    }
    entries
}

/// Outbound parameters of one user turn
#[derive(Clone, Debug, PartialEq)]
pub struct TurnRequest {
    /// The user's message text
    pub user_input: String,
    /// Trimmed conversation history, oldest first
    pub chat_history: Vec<HistoryEntry>,
    /// Active prompt cards, already filtered and ordered
    pub prompt_cards: Vec<PromptCard>,
    /// Target model identifier
    pub model_id: String,
    /// Project the conversation belongs to
    pub project_id: Option<String>,
    /// Conversation identifier
    pub conversation_id: ConversationId,
    /// User identifier
    pub user_id: Option<String>,
    /// Whether the backend should consult its knowledge base
    pub use_knowledge_base: bool,
}

impl TurnRequest {
    /// Create a request with no history or cards
    pub fn new(
        user_input: impl Into<String>,
        model_id: impl Into<String>,
        conversation_id: ConversationId,
    ) -> Self {
        Self {
            user_input: user_input.into(),
            chat_history: Vec::new(),
            prompt_cards: Vec::new(),
            model_id: model_id.into(),
            project_id: None,
            conversation_id,
            user_id: None,
            use_knowledge_base: false,
        }
    }

    /// Set history
    #[must_use]
    pub fn with_history(mut self, chat_history: Vec<HistoryEntry>) -> Self {
        self.chat_history = chat_history;
        self
    }

    /// Set prompt cards, keeping only the active ones in step order
    #[must_use]
    pub fn with_cards(mut self, cards: &[PromptCard]) -> Self {
        self.prompt_cards = active_cards(cards);
        self
    }

    /// Set project
    #[must_use]
    pub fn with_project(mut self, project_id: Option<String>) -> Self {
        self.project_id = project_id;
        self
    }

    /// Set user
    #[must_use]
    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Set knowledge base flag
    #[must_use]
    pub fn with_knowledge_base(mut self, use_knowledge_base: bool) -> Self {
        self.use_knowledge_base = use_knowledge_base;
        self
    }

    /// Text frame sent over the push channel
    pub fn push_envelope(&self, stream_id: &StreamId) -> Result<String, serde_json::Error> {
        serde_json::to_string(&PushEnvelope {
            action: "stream",
            stream_id: stream_id.as_str(),
            project_id: self.project_id.as_deref(),
            user_input: &self.user_input,
            chat_history: &self.chat_history,
            prompt_cards: &self.prompt_cards,
            conversation_id: &self.conversation_id.0,
            user_sub: self.user_id.as_deref(),
            model_id: &self.model_id,
        })
    }

    /// JSON body of the pull request
    pub fn pull_body(&self, stream_id: &StreamId) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(PullBody {
            stream_id: stream_id.as_str(),
            project_id: self.project_id.as_deref(),
            user_input: &self.user_input,
            chat_history: &self.chat_history,
            prompt_cards: &self.prompt_cards,
            model_id: &self.model_id,
            use_knowledge_base: self.use_knowledge_base,
            conversation_id: &self.conversation_id.0,
            user_sub: self.user_id.as_deref(),
        })
    }
}

#[derive(Serialize)]
struct PushEnvelope<'a> {
    action: &'static str,
    #[serde(rename = "streamId")]
    stream_id: &'a str,
    #[serde(rename = "projectId")]
    project_id: Option<&'a str>,
    #[serde(rename = "userInput")]
    user_input: &'a str,
    chat_history: &'a [HistoryEntry],
    prompt_cards: &'a [PromptCard],
    #[serde(rename = "conversationId")]
    conversation_id: &'a str,
    #[serde(rename = "userSub")]
    user_sub: Option<&'a str>,
    #[serde(rename = "modelId")]
    model_id: &'a str,
}

#[derive(Serialize)]
struct PullBody<'a> {
    #[serde(rename = "streamId")]
    stream_id: &'a str,
    #[serde(rename = "projectId")]
    project_id: Option<&'a str>,
    #[serde(rename = "userInput")]
    user_input: &'a str,
    chat_history: &'a [HistoryEntry],
    prompt_cards: &'a [PromptCard],
    #[serde(rename = "modelId")]
    model_id: &'a str,
    #[serde(rename = "useKnowledgeBase")]
    use_knowledge_base: bool,
    #[serde(rename = "conversationId")]
    conversation_id: &'a str,
    #[serde(rename = "userSub")]
    user_sub: Option<&'a str>,
}
