//! Wire Frames
//!
//! Inbound frame shapes for both transports and their conversion into the
//! transport-neutral [`Fragment`] the assembler consumes.
//!
//! Push frames are JSON objects discriminated by `type`. Pull records are
//! `data: `-prefixed JSON lines from an event-stream body whose `result` is
//! the cumulative text so far.

use serde::Deserialize;
use serde_json::Value;

use crate::messages::{Source, StreamId};

/// What a fragment means to the assembler
#[derive(Clone, Debug, PartialEq)]
pub enum FragmentKind {
    /// The backend accepted the turn
    Start,
    /// Informational progress, never appended to content
    Progress {
        /// Human-readable step description
        step: String,
        /// Percentage if reported
        progress: Option<f64>,
    },
    /// Content. A delta on push, the cumulative text on pull.
    Chunk {
        /// Text payload
        payload: String,
    },
    /// Terminal success
    Done {
        /// Authoritative final content, supersedes the live preview
        full_content: Option<String>,
        /// Citations
        sources: Vec<Source>,
        /// Reasoning steps
        thinking_process: Vec<Value>,
    },
    /// Terminal backend-reported failure
    Error {
        /// Backend message text
        message: String,
    },
}

/// One discrete unit of data received from a transport
#[derive(Clone, Debug, PartialEq)]
pub struct Fragment {
    /// Logical stream this fragment belongs to
    pub stream_id: StreamId,
    /// Position reported by the server, if any. Informational only.
    pub sequence_hint: Option<u64>,
    /// Meaning
    pub kind: FragmentKind,
}

impl Fragment {
    /// Build a fragment without a sequence hint
    #[must_use]
    pub fn new(stream_id: StreamId, kind: FragmentKind) -> Self {
        Self {
            stream_id,
            sequence_hint: None,
            kind,
        }
    }

    /// Content fragment
    pub fn chunk(stream_id: StreamId, payload: impl Into<String>) -> Self {
        Self::new(
            stream_id,
            FragmentKind::Chunk {
                payload: payload.into(),
            },
        )
    }

    /// Terminal success fragment
    #[must_use]
    pub fn done(stream_id: StreamId, full_content: Option<String>) -> Self {
        Self::new(
            stream_id,
            FragmentKind::Done {
                full_content,
                sources: Vec::new(),
                thinking_process: Vec::new(),
            },
        )
    }

    /// Terminal failure fragment
    pub fn error(stream_id: StreamId, message: impl Into<String>) -> Self {
        Self::new(
            stream_id,
            FragmentKind::Error {
                message: message.into(),
            },
        )
    }

    /// Text payload of a chunk fragment
    #[must_use]
    pub fn payload(&self) -> Option<&str> {
        match &self.kind {
            FragmentKind::Chunk { payload } => Some(payload),
            _ => None,
        }
    }

    /// Whether this fragment ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            FragmentKind::Done { .. } | FragmentKind::Error { .. }
        )
    }
}

// ============================================================================
// Push frames
// ============================================================================

/// Inbound push channel frame
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    /// Stream accepted
    StreamStart {
        /// Logical stream, when the server tags it
        #[serde(rename = "streamId", default)]
        stream_id: Option<String>,
    },
    /// Informational progress
    Progress {
        /// Logical stream, when the server tags it
        #[serde(rename = "streamId", default)]
        stream_id: Option<String>,
        /// Step description
        #[serde(default)]
        step: String,
        /// Percentage
        #[serde(default)]
        progress: Option<f64>,
    },
    /// Content delta
    StreamChunk {
        /// Logical stream, when the server tags it
        #[serde(rename = "streamId", default)]
        stream_id: Option<String>,
        /// Content delta
        #[serde(default)]
        content: String,
        /// Position of this chunk
        #[serde(default)]
        chunk_index: Option<u64>,
        /// Total chunks announced by the server
        #[serde(default)]
        total_chunks: Option<u64>,
    },
    /// Terminal success
    StreamComplete {
        /// Logical stream, when the server tags it
        #[serde(rename = "streamId", default)]
        stream_id: Option<String>,
        /// Authoritative final content
        #[serde(rename = "fullContent", default)]
        full_content: Option<String>,
        /// Citations
        #[serde(default)]
        sources: Vec<Source>,
        /// Reasoning steps
        #[serde(rename = "thinkingProcess", default)]
        thinking_process: Vec<Value>,
    },
    /// Terminal failure
    Error {
        /// Logical stream, when the server tags it
        #[serde(rename = "streamId", default)]
        stream_id: Option<String>,
        /// Backend error text
        #[serde(default)]
        message: String,
    },
    /// Any other `type` (acks, heartbeats). Ignored.
    #[serde(other)]
    Unknown,
}

impl PushFrame {
    /// Parse one text frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Stream identifier embedded in the frame, if any
    #[must_use]
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            Self::StreamStart { stream_id }
            | Self::Progress { stream_id, .. }
            | Self::StreamChunk { stream_id, .. }
            | Self::StreamComplete { stream_id, .. }
            | Self::Error { stream_id, .. } => stream_id.as_deref(),
            Self::Unknown => None,
        }
    }

    /// Convert into a fragment for the given stream. `None` for ignored frames.
    #[must_use]
    pub fn into_fragment(self, stream_id: StreamId) -> Option<Fragment> {
        let (sequence_hint, kind) = match self {
            Self::StreamStart { .. } => (None, FragmentKind::Start),
            Self::Progress { step, progress, .. } => {
                (None, FragmentKind::Progress { step, progress })
            }
            Self::StreamChunk {
                content,
                chunk_index,
                total_chunks,
                ..
            } => {
                tracing::trace!(
                    stream_id = %stream_id,
                    chunk_index = ?chunk_index,
                    total_chunks = ?total_chunks,
                    "push chunk"
                );
                (chunk_index, FragmentKind::Chunk { payload: content })
            }
            Self::StreamComplete {
                full_content,
                sources,
                thinking_process,
                ..
            } => (
                None,
                FragmentKind::Done {
                    full_content,
                    sources,
                    thinking_process,
                },
            ),
            Self::Error { message, .. } => (None, FragmentKind::Error { message }),
            Self::Unknown => return None,
        };

        Some(Fragment {
            stream_id,
            sequence_hint,
            kind,
        })
    }
}

// ============================================================================
// Pull records
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct PullRecord {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(rename = "fullResponse", default)]
    full_response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    step: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    sources: Vec<Source>,
    #[serde(rename = "thinkingProcess", default)]
    thinking_process: Vec<Value>,
}

/// Extract the payload of an event-stream `data:` line
///
/// Comments, `event:`/`id:` fields and blank separators yield `None`.
#[must_use]
pub fn sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data))
}

/// Interpret one pull record payload
///
/// Returns `Ok(None)` for records that carry nothing the assembler needs.
pub fn parse_pull_record(data: &str) -> Result<Option<FragmentKind>, serde_json::Error> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(FragmentKind::Done {
            full_content: None,
            sources: Vec::new(),
            thinking_process: Vec::new(),
        }));
    }

    let record: PullRecord = serde_json::from_str(data)?;
    let kind = record.kind.as_deref().unwrap_or_default();

    if kind == "error" || record.error.is_some() {
        let message = match record.error {
            Some(Value::String(text)) => text,
            Some(Value::Object(map)) => {
                let text = map.get("message").and_then(Value::as_str).map(str::to_string);
                text.unwrap_or_else(|| Value::Object(map).to_string())
            }
            Some(Value::Null) | None => record.message.unwrap_or_default(),
            Some(other) => other.to_string(),
        };
        return Ok(Some(FragmentKind::Error { message }));
    }

    if record.done || kind == "complete" || kind == "done" {
        return Ok(Some(FragmentKind::Done {
            full_content: record.full_response.or(record.result),
            sources: record.sources,
            thinking_process: record.thinking_process,
        }));
    }

    let fragment = match kind {
        "start" => Some(FragmentKind::Start),
        "progress" => Some(FragmentKind::Progress {
            step: record.step.unwrap_or_default(),
            progress: record.progress,
        }),
        _ => record.result.map(|payload| FragmentKind::Chunk { payload }),
    };
    Ok(fragment)
}

/// Reassembles newline-delimited lines from arbitrary byte chunks
///
/// UTF-8 is decoded only once a line is complete, so multi-byte characters
/// split across network reads survive intact.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Flush a trailing line that was not newline-terminated
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_push_chunk() {
        let frame = PushFrame::parse(
            r#"{"type":"stream_chunk","streamId":"s1","content":"Hel","chunk_index":0,"total_chunks":3}"#,
        )
        .unwrap();
        assert_eq!(frame.stream_id(), Some("s1"));

        let fragment = frame.into_fragment(StreamId("s1".into())).unwrap();
        assert_eq!(fragment.payload(), Some("Hel"));
        assert_eq!(fragment.sequence_hint, Some(0));
        assert!(!fragment.is_terminal());
    }

    #[test]
    fn test_parse_push_complete_with_sources() {
        let frame = PushFrame::parse(
            r#"{"type":"stream_complete","fullContent":"Final [1]","sources":[{"id":1,"title":"T","url":"https://example.com","date":"2025-07-01"}],"thinkingProcess":[{"step":"search"}]}"#,
        )
        .unwrap();
        assert_eq!(frame.stream_id(), None);

        let fragment = frame.into_fragment(StreamId("s1".into())).unwrap();
        match fragment.kind {
            FragmentKind::Done {
                full_content,
                sources,
                thinking_process,
            } => {
                assert_eq!(full_content.as_deref(), Some("Final [1]"));
                assert_eq!(sources.len(), 1);
                assert_eq!(sources[0].date, "2025-07-01");
                assert_eq!(thinking_process.len(), 1);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_push_type_ignored() {
        let frame = PushFrame::parse(r#"{"type":"pong"}"#).unwrap();
        assert!(frame.into_fragment(StreamId::new()).is_none());
        assert!(PushFrame::parse("not json").is_err());
    }

    #[test]
    fn test_progress_accepts_integer_percentage() {
        let frame =
            PushFrame::parse(r#"{"type":"progress","step":"검색 중...","progress":25}"#).unwrap();
        let fragment = frame.into_fragment(StreamId::new()).unwrap();
        assert_eq!(
            fragment.kind,
            FragmentKind::Progress {
                step: "검색 중...".to_string(),
                progress: Some(25.0)
            }
        );
    }

    #[test]
    fn test_sse_data_prefix() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data("event: message"), None);
        assert_eq!(sse_data(""), None);
    }

    #[test]
    fn test_pull_record_kinds() {
        assert_eq!(
            parse_pull_record(r#"{"result":"Hello wo"}"#).unwrap(),
            Some(FragmentKind::Chunk {
                payload: "Hello wo".into()
            })
        );
        assert_eq!(
            parse_pull_record(r#"{"type":"start"}"#).unwrap(),
            Some(FragmentKind::Start)
        );
        assert_eq!(
            parse_pull_record(r#"{"type":"error","error":"Unauthorized"}"#).unwrap(),
            Some(FragmentKind::Error {
                message: "Unauthorized".into()
            })
        );
        assert_eq!(
            parse_pull_record(r#"{"error":{"message":"Task timed out"}}"#).unwrap(),
            Some(FragmentKind::Error {
                message: "Task timed out".into()
            })
        );
        assert_eq!(parse_pull_record(r#"{"status":"ok"}"#).unwrap(), None);
        assert!(parse_pull_record("{broken").is_err());
    }

    #[test]
    fn test_pull_terminal_records() {
        let done = parse_pull_record(r#"{"done":true,"fullResponse":"Hello world","result":"Hello"}"#)
            .unwrap();
        assert!(matches!(
            done,
            Some(FragmentKind::Done { full_content: Some(ref c), .. }) if c == "Hello world"
        ));

        let done = parse_pull_record(r#"{"type":"complete","result":"Hi"}"#).unwrap();
        assert!(matches!(
            done,
            Some(FragmentKind::Done { full_content: Some(ref c), .. }) if c == "Hi"
        ));

        assert!(matches!(
            parse_pull_record("[DONE]").unwrap(),
            Some(FragmentKind::Done {
                full_content: None,
                ..
            })
        ));
    }

    #[test]
    fn test_line_decoder_split_multibyte() {
        let text = "data: {\"result\":\"안녕\"}\r\ndata: [DONE]\n";
        let bytes = text.as_bytes();
        let mut decoder = LineDecoder::new();

        let mut lines = Vec::new();
        // Feed one byte at a time so every multi-byte character is split.
        for byte in bytes {
            lines.extend(decoder.push(std::slice::from_ref(byte)));
        }
        assert_eq!(lines, vec!["data: {\"result\":\"안녕\"}", "data: [DONE]"]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_line_decoder_trailing_partial() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"data: {\"result\"").is_empty());
        assert_eq!(decoder.push(b":\"x\"}\ndata: tail"), vec!["data: {\"result\":\"x\"}"]);
        assert_eq!(decoder.finish().as_deref(), Some("data: tail"));
    }
}
