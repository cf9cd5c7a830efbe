use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::TokenUsage;

/// A single event on a completion stream.
///
/// Produced by the LLM client, teed through the resumable stream context,
/// and delivered to HTTP clients as SSE data payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token {
        content: String,
    },

    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },

    Error {
        message: String,
    },
}

impl StreamEvent {
    /// Terminal events end a stream; a resumed subscriber stops after one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

/// A sequenced stream event as stored in the catch-up buffer and published
/// on the pub/sub channel.
///
/// Sequence numbers start at 1 and are allocated by the stream driver, so a
/// resuming subscriber can replay the buffer and drop live frames it has
/// already seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub seq: u64,
    pub event: StreamEvent,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Frame {
    pub fn new(seq: u64, event: StreamEvent) -> Self {
        Self { seq, event }
    }

    /// One frame per line; the pub/sub bridge adds the blank-line terminator.
    pub fn encode(&self) -> String {
        // Frame contains no raw newlines: serde_json escapes them.
        serde_json::to_string(self).expect("frame serialization is infallible")
    }

    pub fn decode(line: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(line.trim())?)
    }

    /// Decode a newline-separated buffer of frames, skipping blank lines.
    pub fn decode_buffer(buffer: &str) -> Result<Vec<Self>, FrameError> {
        buffer
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(Self::decode)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tags() {
        let token = StreamEvent::Token {
            content: "hi".to_string(),
        };
        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains("\"type\":\"token\""));

        let done = StreamEvent::Done {
            finish_reason: Some("stop".to_string()),
            usage: None,
        };
        let json = serde_json::to_string(&done).unwrap();
        assert!(json.contains("\"type\":\"done\""));
        assert!(!json.contains("usage"));
    }

    #[test]
    fn test_terminal_classification() {
        assert!(!StreamEvent::Token {
            content: "x".to_string()
        }
        .is_terminal());
        assert!(StreamEvent::Done {
            finish_reason: None,
            usage: None
        }
        .is_terminal());
        assert!(StreamEvent::Error {
            message: "boom".to_string()
        }
        .is_terminal());
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(
            7,
            StreamEvent::Token {
                content: "line one\nline two".to_string(),
            },
        );
        let encoded = frame.encode();
        assert!(!encoded.contains('\n'));
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_decode_buffer_skips_blank_lines() {
        let a = Frame::new(1, StreamEvent::Token { content: "a".to_string() });
        let b = Frame::new(
            2,
            StreamEvent::Done {
                finish_reason: None,
                usage: None,
            },
        );
        let buffer = format!("{}\n\n{}\n", a.encode(), b.encode());
        let frames = Frame::decode_buffer(&buffer).unwrap();
        assert_eq!(frames, vec![a, b]);
    }
}
