use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection};

use braid_types::GenerationSettings;

use crate::error::{PersistError, Result};
use crate::models::{ActiveStream, Message, MessageStatus, Thread, ThreadStatus};
use crate::store::{FinalizeOutcome, MessageStore, NewMessage, ThreadStore};

use super::models::{counter_key, MessageDoc, SiblingCounter, ThreadDoc};

#[derive(Clone)]
pub struct MongoStore {
    threads: Collection<ThreadDoc>,
    messages: Collection<MessageDoc>,
    counters: Collection<SiblingCounter>,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| PersistError::Connection(e.to_string()))?;
        let db = client.database(db_name);
        Ok(Self {
            threads: db.collection("threads"),
            messages: db.collection("messages"),
            counters: db.collection("sibling_counters"),
        })
    }

    async fn next_sibling_index(&self, thread_id: &str, parent_id: Option<&str>) -> Result<u32> {
        let counter = self
            .counters
            .find_one_and_update(
                doc! { "_id": counter_key(thread_id, parent_id) },
                doc! { "$inc": { "seq": 1 } },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| PersistError::Internal("counter upsert returned nothing".to_string()))?;
        Ok((counter.seq - 1) as u32)
    }

    async fn touch(&self, thread_id: &str) -> Result<()> {
        self.threads
            .update_one(
                doc! { "_id": thread_id },
                doc! { "$set": { "updated_at": bson::DateTime::now() } },
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for MongoStore {
    async fn create_thread(
        &self,
        id: String,
        user_id: String,
        name: String,
        settings: GenerationSettings,
    ) -> Result<Thread> {
        let now = bson::DateTime::now();
        let doc = ThreadDoc {
            id,
            user_id,
            name,
            status: ThreadStatus::Active,
            settings,
            current_leaf_id: None,
            active_stream: None,
            created_at: now,
            updated_at: now,
        };
        self.threads.insert_one(&doc).await?;
        Ok(doc.into())
    }

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>> {
        Ok(self
            .threads
            .find_one(doc! { "_id": id })
            .await?
            .map(Thread::from))
    }

    async fn list_threads(&self, user_id: &str, limit: i64) -> Result<Vec<Thread>> {
        let docs: Vec<ThreadDoc> = self
            .threads
            .find(doc! { "user_id": user_id })
            .sort(doc! { "updated_at": -1 })
            .limit(limit)
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(Thread::from).collect())
    }

    async fn rename_thread(&self, id: &str, name: &str) -> Result<()> {
        let result = self
            .threads
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "name": name, "updated_at": bson::DateTime::now() } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(PersistError::ThreadNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_current_leaf(&self, id: &str, leaf_id: &str) -> Result<()> {
        let result = self
            .threads
            .update_one(
                doc! { "_id": id },
                doc! { "$set": {
                    "current_leaf_id": leaf_id,
                    "updated_at": bson::DateTime::now(),
                } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(PersistError::ThreadNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_active_stream(&self, id: &str, stream: Option<ActiveStream>) -> Result<()> {
        let stream_bson = match stream {
            Some(stream) => bson::to_bson(&stream)?,
            None => bson::Bson::Null,
        };
        let result = self
            .threads
            .update_one(
                doc! { "_id": id },
                doc! { "$set": {
                    "active_stream": stream_bson,
                    "updated_at": bson::DateTime::now(),
                } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(PersistError::ThreadNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MongoStore {
    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        if self.get_thread(&new.thread_id).await?.is_none() {
            return Err(PersistError::ThreadNotFound(new.thread_id));
        }

        let depth = match &new.parent_id {
            Some(parent_id) => {
                let parent = self
                    .messages
                    .find_one(doc! { "_id": parent_id })
                    .await?
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

        let sibling_index = self
            .next_sibling_index(&new.thread_id, new.parent_id.as_deref())
            .await?;

        let doc = MessageDoc {
            id: new.id,
            thread_id: new.thread_id,
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
            created_at: bson::DateTime::now(),
        };
        self.messages.insert_one(&doc).await?;
        self.touch(&doc.thread_id).await?;
        Ok(doc.into())
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        Ok(self
            .messages
            .find_one(doc! { "_id": id })
            .await?
            .map(Message::from))
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        let docs: Vec<MessageDoc> = self
            .messages
            .find(doc! { "thread_id": thread_id })
            .sort(doc! { "created_at": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(Message::from).collect())
    }

    async fn finalize_message(&self, id: &str, outcome: FinalizeOutcome) -> Result<()> {
        let update = match outcome {
            FinalizeOutcome::Completed {
                parts,
                usage,
                timing,
            } => doc! { "$set": {
                "parts": bson::to_bson(&parts)?,
                "usage": bson::to_bson(&usage)?,
                "timing": bson::to_bson(&timing)?,
                "status": "completed",
            } },
            FinalizeOutcome::Failed { error } => doc! { "$set": {
                "error": bson::to_bson(&error)?,
                "status": "failed",
            } },
        };

        // Guarding on status makes the transition one-shot even under races.
        let result = self
            .messages
            .update_one(doc! { "_id": id, "status": "generating" }, update)
            .await?;
        if result.matched_count == 0 {
            return match self.get_message(id).await? {
                Some(_) => Err(PersistError::NotGenerating(id.to_string())),
                None => Err(PersistError::MessageNotFound(id.to_string())),
            };
        }

        if let Some(message) = self.get_message(id).await? {
            self.touch(&message.thread_id).await?;
        }
        Ok(())
    }

    async fn request_cancel(&self, id: &str) -> Result<()> {
        let result = self
            .messages
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "cancel_requested": true } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(PersistError::MessageNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn cancel_requested(&self, id: &str) -> Result<bool> {
        Ok(self
            .messages
            .find_one(doc! { "_id": id })
            .await?
            .map(|m| m.cancel_requested)
            .unwrap_or(false))
    }
}
