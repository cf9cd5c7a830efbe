use serde::{Deserialize, Serialize};

use braid_types::{GenerationSettings, TimingStats, TokenUsage};

use crate::models::{
    ActiveStream, Message, MessagePart, MessageRole, MessageStatus, Provenance, Thread,
    ThreadStatus,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct ThreadDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub status: ThreadStatus,
    pub settings: GenerationSettings,
    pub current_leaf_id: Option<String>,
    pub active_stream: Option<ActiveStream>,
    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

impl From<ThreadDoc> for Thread {
    fn from(doc: ThreadDoc) -> Self {
        Thread {
            id: doc.id,
            user_id: doc.user_id,
            name: doc.name,
            status: doc.status,
            settings: doc.settings,
            current_leaf_id: doc.current_leaf_id,
            active_stream: doc.active_stream,
            created_at: doc.created_at.to_chrono(),
            updated_at: doc.updated_at.to_chrono(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub thread_id: String,
    pub parent_id: Option<String>,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    pub status: MessageStatus,
    pub depth: u32,
    pub sibling_index: u32,
    pub provenance: Provenance,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
    pub timing: Option<TimingStats>,
    pub error: Option<String>,
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: bson::DateTime,
}

impl From<MessageDoc> for Message {
    fn from(doc: MessageDoc) -> Self {
        Message {
            id: doc.id,
            thread_id: doc.thread_id,
            parent_id: doc.parent_id,
            role: doc.role,
            parts: doc.parts,
            status: doc.status,
            depth: doc.depth,
            sibling_index: doc.sibling_index,
            provenance: doc.provenance,
            model: doc.model,
            usage: doc.usage,
            timing: doc.timing,
            error: doc.error,
            cancel_requested: doc.cancel_requested,
            created_at: doc.created_at.to_chrono(),
        }
    }
}

/// Per-(thread, parent) monotonic counter backing sibling-index allocation.
/// Updated with an atomic find-one-and-update, which is the serialization
/// point for concurrent edits under one parent.
#[derive(Debug, Serialize, Deserialize)]
pub struct SiblingCounter {
    #[serde(rename = "_id")]
    pub key: String,
    pub seq: i64,
}

pub fn counter_key(thread_id: &str, parent_id: Option<&str>) -> String {
    format!("{}:{}", thread_id, parent_id.unwrap_or("root"))
}
