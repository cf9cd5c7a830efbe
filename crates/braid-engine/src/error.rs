use thiserror::Error;

use braid_ids::IdError;
use braid_persist::PersistError;
use braid_stream::StreamError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error(transparent)]
    InvalidId(#[from] IdError),

    #[error("upstream generation error: {0}")]
    UpstreamGeneration(String),

    #[error("generation cancelled by client")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] PersistError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}
