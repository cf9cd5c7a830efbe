use async_trait::async_trait;

use braid_types::{GenerationSettings, TimingStats, TokenUsage};

use crate::error::Result;
use crate::models::{ActiveStream, Message, MessagePart, MessageRole, Provenance, Thread};

/// Insert payload for a message. Depth and sibling index are allocated by
/// the store: sibling allocation must be serialized per parent, and it is
/// the store's atomicity that guarantees two concurrent edits under the
/// same parent never collide on an index.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub thread_id: String,
    pub parent_id: Option<String>,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    pub generating: bool,
    pub provenance: Provenance,
    pub model: Option<String>,
}

/// Terminal outcome of a `generating` assistant message.
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    Completed {
        parts: Vec<MessagePart>,
        usage: Option<TokenUsage>,
        timing: Option<TimingStats>,
    },
    Failed {
        error: Option<String>,
    },
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn create_thread(
        &self,
        id: String,
        user_id: String,
        name: String,
        settings: GenerationSettings,
    ) -> Result<Thread>;

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>>;

    async fn list_threads(&self, user_id: &str, limit: i64) -> Result<Vec<Thread>>;

    async fn rename_thread(&self, id: &str, name: &str) -> Result<()>;

    async fn set_current_leaf(&self, id: &str, leaf_id: &str) -> Result<()>;

    /// `None` clears the pointer. Must only be cleared after the associated
    /// assistant message has been finalized.
    async fn set_active_stream(&self, id: &str, stream: Option<ActiveStream>) -> Result<()>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: NewMessage) -> Result<Message>;

    async fn get_message(&self, id: &str) -> Result<Option<Message>>;

    /// All messages of a thread, in insertion order. Tree shape is
    /// reconstructed client-side from parent pointers and sibling indices.
    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>>;

    /// One-shot `generating → completed|failed` transition.
    async fn finalize_message(&self, id: &str, outcome: FinalizeOutcome) -> Result<()>;

    /// Raise the out-of-band cancellation flag on a generating message.
    async fn request_cancel(&self, id: &str) -> Result<()>;

    async fn cancel_requested(&self, id: &str) -> Result<bool>;
}

/// Both store roles together, as the orchestrator consumes them.
pub trait Store: ThreadStore + MessageStore {}

impl<T: ThreadStore + MessageStore> Store for T {}
