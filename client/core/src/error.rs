//! Failure Taxonomy
//!
//! Classifies everything that can end a turn without success and renders a
//! human-readable notice for it. Transport and parse faults are handled where
//! they occur (fallback or skip); the kinds below are the ones that reach the
//! assistant message.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::transport::TransportError;

/// Why a turn did not complete successfully
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Push channel not connected. Triggers fallback, never shown to the user.
    TransportUnavailable,
    /// Backend rejected the session as unauthorized
    AuthExpired,
    /// Backend reported a processing timeout
    Timeout,
    /// Backend is throttling requests
    RateLimited,
    /// An inbound frame could not be parsed. Logged and skipped.
    MalformedFrame,
    /// Pull body ended without a terminal record
    IncompleteStream,
    /// Push connection dropped while the stream was active
    ConnectionLost,
    /// Any other backend-reported or transport failure
    Backend,
    /// User-initiated cancellation (not an error)
    Cancelled,
}

impl FailureKind {
    /// Whether this kind ends up visible on the assistant message
    #[must_use]
    pub fn is_surfaced(self) -> bool {
        !matches!(self, Self::TransportUnavailable | Self::MalformedFrame)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransportUnavailable => "transport-unavailable",
            Self::AuthExpired => "auth-expired",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate-limited",
            Self::MalformedFrame => "malformed-frame",
            Self::IncompleteStream => "incomplete-stream",
            Self::ConnectionLost => "connection-lost",
            Self::Backend => "backend",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Classify a backend-reported error message
///
/// Matching is case-insensitive and covers the English and Korean phrasings
/// the generation service emits. Status codes only count as whole tokens, so
/// "HTTP 429" matches and "15040 tokens" does not.
#[must_use]
pub fn classify_message(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    let has_code = |codes: &[&str]| tokens.iter().any(|t| codes.contains(t));

    if has_code(&["401"])
        || has(&[
            "unauthorized",
            "token expired",
            "expired token",
            "forbidden",
            "인증",
        ])
    {
        FailureKind::AuthExpired
    } else if has_code(&["429"])
        || has(&[
            "rate limit",
            "ratelimit",
            "throttl",
            "too many requests",
            "요청이 너무 많",
        ])
    {
        FailureKind::RateLimited
    } else if has_code(&["504"])
        || has(&["timeout", "timed out", "time out", "시간 초과", "시간이 초과"])
    {
        FailureKind::Timeout
    } else {
        FailureKind::Backend
    }
}

/// Classify a transport failure that ended an active stream
#[must_use]
pub fn classify_transport(error: &TransportError) -> FailureKind {
    match error {
        TransportError::Unavailable(_) | TransportError::ConnectTimeout(_) => {
            FailureKind::TransportUnavailable
        }
        TransportError::ConnectionLost(_) => FailureKind::ConnectionLost,
        TransportError::IncompleteStream => FailureKind::IncompleteStream,
        TransportError::HttpStatus { status, body } => match status {
            401 | 403 => FailureKind::AuthExpired,
            429 => FailureKind::RateLimited,
            408 | 504 => FailureKind::Timeout,
            _ => classify_message(body),
        },
        TransportError::Request(message) | TransportError::SendFailed(message) => {
            classify_message(message)
        }
        TransportError::Serialization(_) => FailureKind::Backend,
    }
}

/// Language used for user-facing notices
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    /// Korean
    #[default]
    Ko,
    /// English
    En,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ko" | "ko-kr" | "korean" => Ok(Self::Ko),
            "en" | "en-us" | "english" => Ok(Self::En),
            other => Err(format!("unsupported locale: {other}")),
        }
    }
}

/// Notice strings appended to the assistant message on non-success paths
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoticeCatalog {
    locale: Locale,
}

impl NoticeCatalog {
    /// Catalog for a locale
    #[must_use]
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    /// The catalog's locale
    #[must_use]
    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// Neutral notice appended on user cancellation
    #[must_use]
    pub fn cancelled(&self) -> &'static str {
        match self.locale {
            Locale::Ko => "[응답 생성이 중단되었습니다]",
            Locale::En => "[Response generation was stopped]",
        }
    }

    /// Notice for a failure kind, with the backend detail for generic failures
    #[must_use]
    pub fn failure(&self, kind: FailureKind, detail: Option<&str>) -> String {
        let base = match (self.locale, kind) {
            (_, FailureKind::Cancelled) => return self.cancelled().to_string(),
            (Locale::Ko, FailureKind::AuthExpired) => {
                "⚠️ 로그인 세션이 만료되었습니다. 다시 로그인한 뒤 시도해 주세요."
            }
            (Locale::En, FailureKind::AuthExpired) => {
                "⚠️ Your session has expired. Please sign in again and retry."
            }
            (Locale::Ko, FailureKind::Timeout) => {
                "⚠️ 응답 처리 시간이 초과되었습니다. 질문을 더 간단하게 바꿔 다시 시도해 주세요."
            }
            (Locale::En, FailureKind::Timeout) => {
                "⚠️ The request timed out. Try simplifying your question and send it again."
            }
            (Locale::Ko, FailureKind::RateLimited) => {
                "⚠️ 요청이 너무 많습니다. 잠시 후 다시 시도해 주세요."
            }
            (Locale::En, FailureKind::RateLimited) => {
                "⚠️ Too many requests right now. Please wait a moment and retry."
            }
            (Locale::Ko, FailureKind::IncompleteStream) => {
                "⚠️ 응답이 완료되기 전에 연결이 종료되었습니다. 다시 시도해 주세요."
            }
            (Locale::En, FailureKind::IncompleteStream) => {
                "⚠️ The response ended before it was complete. Please try again."
            }
            (Locale::Ko, FailureKind::ConnectionLost) => {
                "⚠️ 스트리밍 중 연결이 끊어졌습니다. 다시 시도해 주세요."
            }
            (Locale::En, FailureKind::ConnectionLost) => {
                "⚠️ The connection dropped while streaming. Please try again."
            }
            (Locale::Ko, _) => "⚠️ 응답 생성 중 오류가 발생했습니다.",
            (Locale::En, _) => "⚠️ An error occurred while generating the response.",
        };

        match (kind, detail.map(str::trim).filter(|d| !d.is_empty())) {
            (FailureKind::Backend, Some(detail)) => format!("{base} ({detail})"),
            _ => base.to_string(),
        }
    }
}
