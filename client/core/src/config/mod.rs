//! TOML Configuration File Support
//!
//! Client configuration lives at `~/.config/chatstream/client.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`CHATSTREAM_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [push]
//! url = "wss://chat.example.com/ws"
//! connect_timeout_ms = 5000
//!
//! [pull]
//! url = "https://chat.example.com/api/generate/stream"
//!
//! [conversation]
//! model_id = "claude-sonnet"
//! project_id = "newsroom"
//! history_window = 50
//! locale = "ko"
//!
//! [[prompt_cards]]
//! promptId = "style"
//! title = "House style"
//! prompt_text = "Answer in three short paragraphs."
//! stepOrder = 1
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Locale;
use crate::transport::{PullConfig, PushConfig};
use crate::turn::{PromptCard, DEFAULT_HISTORY_WINDOW};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where configuration values came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[push]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushToml {
    /// WebSocket endpoint
    pub url: Option<String>,
    /// Whether push is attempted
    pub enabled: Option<bool>,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// `[pull]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PullToml {
    /// Streaming generation endpoint
    pub url: Option<String>,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Bearer token
    pub auth_token: Option<String>,
}

/// `[conversation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationToml {
    /// Target model identifier
    pub model_id: Option<String>,
    /// Project identifier
    pub project_id: Option<String>,
    /// User identifier
    pub user_id: Option<String>,
    /// History entries sent per turn
    pub history_window: Option<usize>,
    /// Knowledge base flag
    pub use_knowledge_base: Option<bool>,
    /// Notice language
    pub locale: Option<Locale>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Push transport section
    pub push: PushToml,
    /// Pull transport section
    pub pull: PullToml,
    /// Conversation section
    pub conversation: ConversationToml,
    /// Prompt cards sent with every turn
    pub prompt_cards: Vec<PromptCard>,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Per-conversation settings used by the driver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationConfig {
    /// Target model identifier
    pub model_id: String,
    /// Project identifier
    pub project_id: Option<String>,
    /// User identifier
    pub user_id: Option<String>,
    /// Most recent history entries sent with a turn
    pub history_window: usize,
    /// Knowledge base flag for the pull body
    pub use_knowledge_base: bool,
    /// Notice language
    pub locale: Locale,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            model_id: "default".to_string(),
            project_id: None,
            user_id: None,
            history_window: DEFAULT_HISTORY_WINDOW,
            use_knowledge_base: false,
            locale: Locale::default(),
        }
    }
}

/// Fully resolved client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Push transport
    pub push: PushConfig,
    /// Pull transport
    pub pull: PullConfig,
    /// Conversation settings
    pub conversation: ConversationConfig,
    /// Prompt cards
    pub prompt_cards: Vec<PromptCard>,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    /// Highest-priority layer that supplied a value
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            push: PushConfig::default(),
            pull: PullConfig::default(),
            conversation: ConversationConfig::default(),
            prompt_cards: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would make every turn fail
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pull.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "pull.url must not be empty".into(),
            ));
        }
        if self.conversation.history_window == 0 {
            return Err(ConfigError::ValidationError(
                "conversation.history_window must be at least 1".into(),
            ));
        }
        if self.conversation.model_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "conversation.model_id must not be empty".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chatstream/client.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chatstream").join("client.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

fn apply_toml_config(config: &mut ClientConfig, toml: ClientToml) {
    if toml.push.url.is_some() {
        config.push.url = toml.push.url;
    }
    if let Some(enabled) = toml.push.enabled {
        config.push.enabled = enabled;
    }
    if let Some(timeout) = toml.push.connect_timeout_ms {
        config.push.connect_timeout_ms = timeout;
    }

    if let Some(url) = toml.pull.url {
        config.pull.url = url;
    }
    if let Some(timeout) = toml.pull.connect_timeout_ms {
        config.pull.connect_timeout_ms = timeout;
    }
    if toml.pull.auth_token.is_some() {
        config.pull.auth_token = toml.pull.auth_token;
    }

    let conversation = toml.conversation;
    if let Some(model) = conversation.model_id {
        config.conversation.model_id = model;
    }
    if conversation.project_id.is_some() {
        config.conversation.project_id = conversation.project_id;
    }
    if conversation.user_id.is_some() {
        config.conversation.user_id = conversation.user_id;
    }
    if let Some(window) = conversation.history_window {
        config.conversation.history_window = window;
    }
    if let Some(flag) = conversation.use_knowledge_base {
        config.conversation.use_knowledge_base = flag;
    }
    if let Some(locale) = conversation.locale {
        config.conversation.locale = locale;
    }

    config.prompt_cards = toml.prompt_cards;
}

fn apply_env_config<F>(config: &mut ClientConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env("CHATSTREAM_PUSH_URL") {
        config.push.url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Some(enabled) = env("CHATSTREAM_PUSH_ENABLED") {
        config.push.enabled = enabled != "0" && enabled.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env("CHATSTREAM_CONNECT_TIMEOUT") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.push.connect_timeout_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(url) = env("CHATSTREAM_PULL_URL") {
        config.pull.url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(token) = env("CHATSTREAM_AUTH_TOKEN") {
        config.pull.auth_token = Some(token);
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("CHATSTREAM_MODEL") {
        config.conversation.model_id = model;
        config.source = ConfigSource::Env;
    }
    if let Some(project) = env("CHATSTREAM_PROJECT_ID") {
        config.conversation.project_id = Some(project);
        config.source = ConfigSource::Env;
    }
    if let Some(user) = env("CHATSTREAM_USER_ID") {
        config.conversation.user_id = Some(user);
        config.source = ConfigSource::Env;
    }
    if let Some(window) = env("CHATSTREAM_HISTORY_WINDOW") {
        if let Ok(n) = window.parse::<usize>() {
            config.conversation.history_window = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(locale) = env("CHATSTREAM_LOCALE") {
        match locale.parse::<Locale>() {
            Ok(locale) => {
                config.conversation.locale = locale;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring CHATSTREAM_LOCALE"),
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Push endpoint override
    pub push_url: Option<String>,
    /// Pull endpoint override
    pub pull_url: Option<String>,
    /// Model override
    pub model_id: Option<String>,
    /// Disable push entirely
    pub disable_push: bool,
    /// Locale override
    pub locale: Option<Locale>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set push endpoint override
    #[must_use]
    pub fn with_push_url(mut self, url: String) -> Self {
        self.push_url = Some(url);
        self
    }

    /// Set pull endpoint override
    #[must_use]
    pub fn with_pull_url(mut self, url: String) -> Self {
        self.pull_url = Some(url);
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model_id = Some(model);
        self
    }

    /// Disable push
    #[must_use]
    pub fn without_push(mut self) -> Self {
        self.disable_push = true;
        self
    }

    /// Set locale override
    #[must_use]
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = Some(locale);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        if self.push_url.is_some()
            || self.pull_url.is_some()
            || self.model_id.is_some()
            || self.disable_push
            || self.locale.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.push_url {
            config.push.url = Some(url.clone());
        }
        if let Some(ref url) = self.pull_url {
            config.pull.url = url.clone();
        }
        if let Some(ref model) = self.model_id {
            config.conversation.model_id = model.clone();
        }
        if self.disable_push {
            config.push.enabled = false;
        }
        if let Some(locale) = self.locale {
            config.conversation.locale = locale;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
