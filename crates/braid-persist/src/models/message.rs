use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use braid_types::{TimingStats, TokenUsage};

/// One node of a thread's message tree.
///
/// Immutable once created, except for the lifecycle of a `generating`
/// assistant placeholder: its parts and stats are filled in exactly once
/// when the stream finalizes. Edits and regenerations create new siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    /// Absent only for the thread's root message.
    pub parent_id: Option<String>,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    pub status: MessageStatus,
    /// Distance from the root; `parent_id == None ⟺ depth == 0`.
    pub depth: u32,
    /// Stable ordering among siblings; allocated by the store, serialized
    /// per parent.
    pub sibling_index: u32,
    pub provenance: Provenance,
    /// Assistant messages only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Out-of-band abort flag, polled by the orchestrator while streaming.
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Generating,
    Completed,
    Failed,
}

/// Normalized content: raw string content from the wire becomes a single
/// text part at the store boundary, so nothing past it handles both shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Data { value: serde_json::Value },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }

    pub fn normalize(raw: impl Into<String>) -> Vec<MessagePart> {
        vec![MessagePart::text(raw)]
    }
}

/// How a message came to exist, and which earlier sibling it supersedes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Provenance {
    Original,
    Edit { from_message_id: String },
    Regeneration { from_message_id: String },
}

impl Message {
    pub fn is_generating(&self) -> bool {
        self.status == MessageStatus::Generating
    }

    /// Flattened text content, for building provider conversation history.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::Data { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_wraps_string_in_text_part() {
        let parts = MessagePart::normalize("hello");
        assert_eq!(parts, vec![MessagePart::text("hello")]);
    }

    #[test]
    fn test_text_skips_data_parts() {
        let message = Message {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            parent_id: None,
            role: MessageRole::User,
            parts: vec![
                MessagePart::text("a"),
                MessagePart::Data {
                    value: serde_json::json!({"k": 1}),
                },
                MessagePart::text("b"),
            ],
            status: MessageStatus::Completed,
            depth: 0,
            sibling_index: 0,
            provenance: Provenance::Original,
            model: None,
            usage: None,
            timing: None,
            error: None,
            cancel_requested: false,
            created_at: Utc::now(),
        };
        assert_eq!(message.text(), "ab");
    }

    #[test]
    fn test_provenance_serialization() {
        let p = Provenance::Edit {
            from_message_id: "m9".to_string(),
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"type\":\"edit\""));
        assert!(json.contains("m9"));
    }
}
