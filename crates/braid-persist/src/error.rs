use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("parent message {parent_id} does not belong to thread {thread_id}")]
    ParentMismatch {
        parent_id: String,
        thread_id: String,
    },

    #[error("message {0} is not in a finalizable state")]
    NotGenerating(String),

    #[cfg(feature = "mongodb")]
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[cfg(feature = "mongodb")]
    #[error("bson serialization error: {0}")]
    BsonSerialization(#[from] bson::ser::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PersistError>;
