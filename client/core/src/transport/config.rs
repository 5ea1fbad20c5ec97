//! Transport Configuration
//!
//! Connection parameters for the push and pull transports. These map to the
//! `[push]` and `[pull]` sections of the client configuration file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default push connect timeout in milliseconds
pub const DEFAULT_PUSH_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default pull connect timeout in milliseconds
pub const DEFAULT_PULL_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Frames buffered between a transport read loop and its consumer
pub const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Push (WebSocket) transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// WebSocket endpoint. Push is disabled when absent.
    pub url: Option<String>,
    /// Whether push should be attempted at all
    pub enabled: bool,
    /// Bound on connection establishment
    pub connect_timeout_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: None,
            enabled: true,
            connect_timeout_ms: DEFAULT_PUSH_CONNECT_TIMEOUT_MS,
        }
    }
}

impl PushConfig {
    /// Config for an endpoint with default timeouts
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Connect timeout as a duration
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Whether a push transport should be built from this config
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

/// Pull (HTTP event-stream) transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    /// Streaming generation endpoint
    pub url: String,
    /// Bound on TCP/TLS connection establishment
    pub connect_timeout_ms: u64,
    /// Opaque bearer token forwarded as `Authorization`
    pub auth_token: Option<String>,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/api/generate/stream".to_string(),
            connect_timeout_ms: DEFAULT_PULL_CONNECT_TIMEOUT_MS,
            auth_token: None,
        }
    }
}

impl PullConfig {
    /// Config for an endpoint with default timeouts
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Connect timeout as a duration
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
