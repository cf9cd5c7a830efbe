//! In-memory store. One mutex over all state; sibling-index allocation is
//! serialized by construction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use braid_types::GenerationSettings;

use crate::error::{PersistError, Result};
use crate::models::{
    ActiveStream, Message, MessageStatus, Thread, ThreadStatus,
};
use crate::store::{FinalizeOutcome, MessageStore, NewMessage, ThreadStore};

#[derive(Default)]
struct Inner {
    threads: HashMap<String, Thread>,
    messages: HashMap<String, Message>,
    // Insertion order, per thread.
    order: Vec<String>,
}

impl Inner {
    fn touch_thread(&mut self, thread_id: &str) {
        if let Some(thread) = self.threads.get_mut(thread_id) {
            thread.updated_at = Utc::now();
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for MemoryStore {
    async fn create_thread(
        &self,
        id: String,
        user_id: String,
        name: String,
        settings: GenerationSettings,
    ) -> Result<Thread> {
        let now = Utc::now();
        let thread = Thread {
            id: id.clone(),
            user_id,
            name,
            status: ThreadStatus::Active,
            settings,
            current_leaf_id: None,
            active_stream: None,
            created_at: now,
            updated_at: now,
        };
        let mut inner = self.inner.lock().await;
        inner.threads.insert(id, thread.clone());
        Ok(thread)
    }

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>> {
        let inner = self.inner.lock().await;
        Ok(inner.threads.get(id).cloned())
    }

    async fn list_threads(&self, user_id: &str, limit: i64) -> Result<Vec<Thread>> {
        let inner = self.inner.lock().await;
        let mut threads: Vec<Thread> = inner
            .threads
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        threads.truncate(limit.max(0) as usize);
        Ok(threads)
    }

    async fn rename_thread(&self, id: &str, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let thread = inner
            .threads
            .get_mut(id)
            .ok_or_else(|| PersistError::ThreadNotFound(id.to_string()))?;
        thread.name = name.to_string();
        thread.updated_at = Utc::now();
        Ok(())
    }

    async fn set_current_leaf(&self, id: &str, leaf_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let thread = inner
            .threads
            .get_mut(id)
            .ok_or_else(|| PersistError::ThreadNotFound(id.to_string()))?;
        thread.current_leaf_id = Some(leaf_id.to_string());
        thread.updated_at = Utc::now();
        Ok(())
    }

    async fn set_active_stream(&self, id: &str, stream: Option<ActiveStream>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let thread = inner
            .threads
            .get_mut(id)
            .ok_or_else(|| PersistError::ThreadNotFound(id.to_string()))?;
        thread.active_stream = stream;
        thread.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let mut inner = self.inner.lock().await;

        if !inner.threads.contains_key(&new.thread_id) {
            return Err(PersistError::ThreadNotFound(new.thread_id));
        }

        let depth = match &new.parent_id {
            Some(parent_id) => {
                let parent = inner
                    .messages
                    .get(parent_id)
                    .ok_or_else(|| PersistError::MessageNotFound(parent_id.clone()))?;
                if parent.thread_id != new.thread_id {
                    return Err(PersistError::ParentMismatch {
                        parent_id: parent_id.clone(),
                        thread_id: new.thread_id,
                    });
                }
                parent.depth + 1
            }
            None => 0,
        };

        let sibling_index = inner
            .messages
            .values()
            .filter(|m| m.thread_id == new.thread_id && m.parent_id == new.parent_id)
            .count() as u32;

        let message = Message {
            id: new.id.clone(),
            thread_id: new.thread_id.clone(),
            parent_id: new.parent_id,
            role: new.role,
            parts: new.parts,
            status: if new.generating {
                MessageStatus::Generating
            } else {
                MessageStatus::Completed
            },
            depth,
            sibling_index,
            provenance: new.provenance,
            model: new.model,
            usage: None,
            timing: None,
            error: None,
            cancel_requested: false,
            created_at: Utc::now(),
        };

        inner.messages.insert(new.id.clone(), message.clone());
        inner.order.push(new.id);
        inner.touch_thread(&message.thread_id);
        Ok(message)
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let inner = self.inner.lock().await;
        Ok(inner.messages.get(id).cloned())
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect())
    }

    async fn finalize_message(&self, id: &str, outcome: FinalizeOutcome) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let message = inner
            .messages
            .get_mut(id)
            .ok_or_else(|| PersistError::MessageNotFound(id.to_string()))?;

        if message.status != MessageStatus::Generating {
            return Err(PersistError::NotGenerating(id.to_string()));
        }

        match outcome {
            FinalizeOutcome::Completed {
                parts,
                usage,
                timing,
            } => {
                message.parts = parts;
                message.usage = usage;
                message.timing = timing;
                message.status = MessageStatus::Completed;
            }
            FinalizeOutcome::Failed { error } => {
                message.error = error;
                message.status = MessageStatus::Failed;
            }
        }
        let thread_id = message.thread_id.clone();
        inner.touch_thread(&thread_id);
        Ok(())
    }

    async fn request_cancel(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let message = inner
            .messages
            .get_mut(id)
            .ok_or_else(|| PersistError::MessageNotFound(id.to_string()))?;
        message.cancel_requested = true;
        Ok(())
    }

    async fn cancel_requested(&self, id: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .get(id)
            .map(|m| m.cancel_requested)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessagePart, MessageRole, Provenance};

    fn new_message(
        id: &str,
        thread_id: &str,
        parent_id: Option<&str>,
        role: MessageRole,
    ) -> NewMessage {
        NewMessage {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            role,
            parts: MessagePart::normalize("content"),
            generating: false,
            provenance: Provenance::Original,
            model: None,
        }
    }

    async fn store_with_thread() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_thread(
                "t1".to_string(),
                "u1".to_string(),
                "Test".to_string(),
                GenerationSettings::new("gpt-4o"),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_depth_follows_parent_chain() {
        let store = store_with_thread().await;
        let root = store
            .insert_message(new_message("m1", "t1", None, MessageRole::User))
            .await
            .unwrap();
        let child = store
            .insert_message(new_message("m2", "t1", Some("m1"), MessageRole::Assistant))
            .await
            .unwrap();

        assert_eq!(root.depth, 0);
        assert!(root.parent_id.is_none());
        assert_eq!(child.depth, 1);
    }

    #[tokio::test]
    async fn test_sibling_index_increments_per_parent() {
        let store = store_with_thread().await;
        store
            .insert_message(new_message("m1", "t1", None, MessageRole::User))
            .await
            .unwrap();
        let a = store
            .insert_message(new_message("a1", "t1", Some("m1"), MessageRole::Assistant))
            .await
            .unwrap();
        let b = store
            .insert_message(new_message("a2", "t1", Some("m1"), MessageRole::Assistant))
            .await
            .unwrap();

        assert_eq!(a.sibling_index, 0);
        assert_eq!(b.sibling_index, 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_foreign_parent() {
        let store = store_with_thread().await;
        store
            .create_thread(
                "t2".to_string(),
                "u1".to_string(),
                "Other".to_string(),
                GenerationSettings::new("gpt-4o"),
            )
            .await
            .unwrap();
        store
            .insert_message(new_message("m1", "t1", None, MessageRole::User))
            .await
            .unwrap();

        let err = store
            .insert_message(new_message("x1", "t2", Some("m1"), MessageRole::User))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::ParentMismatch { .. }));
    }

    #[tokio::test]
    async fn test_finalize_is_one_shot() {
        let store = store_with_thread().await;
        let mut new = new_message("a1", "t1", None, MessageRole::Assistant);
        new.generating = true;
        store.insert_message(new).await.unwrap();

        store
            .finalize_message(
                "a1",
                FinalizeOutcome::Completed {
                    parts: MessagePart::normalize("final"),
                    usage: None,
                    timing: None,
                },
            )
            .await
            .unwrap();

        let err = store
            .finalize_message("a1", FinalizeOutcome::Failed { error: None })
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::NotGenerating(_)));

        let message = store.get_message("a1").await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Completed);
        assert_eq!(message.text(), "final");
    }

    #[tokio::test]
    async fn test_mutations_touch_updated_at() {
        let store = store_with_thread().await;
        let before = store.get_thread("t1").await.unwrap().unwrap().updated_at;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .insert_message(new_message("m1", "t1", None, MessageRole::User))
            .await
            .unwrap();
        let after = store.get_thread("t1").await.unwrap().unwrap().updated_at;
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_cancel_flag_roundtrip() {
        let store = store_with_thread().await;
        let mut new = new_message("a1", "t1", None, MessageRole::Assistant);
        new.generating = true;
        store.insert_message(new).await.unwrap();

        assert!(!store.cancel_requested("a1").await.unwrap());
        store.request_cancel("a1").await.unwrap();
        assert!(store.cancel_requested("a1").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_threads_orders_by_recency() {
        let store = store_with_thread().await;
        store
            .create_thread(
                "t2".to_string(),
                "u1".to_string(),
                "Second".to_string(),
                GenerationSettings::new("gpt-4o"),
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.rename_thread("t1", "Bumped").await.unwrap();

        let threads = store.list_threads("u1", 10).await.unwrap();
        assert_eq!(threads[0].id, "t1");
        assert_eq!(threads[1].id, "t2");
    }
}
