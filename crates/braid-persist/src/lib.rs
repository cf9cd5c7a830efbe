//! Thread and message persistence.
//!
//! The message set of a thread forms a tree: edits and regenerations create
//! new siblings, never overwrite. The store traits here are the seam the
//! orchestrator and client core program against; [`MemoryStore`] backs tests
//! and single-node deployments, [`mongo::MongoStore`] (behind the `mongodb`
//! feature) backs real ones.

pub mod error;
pub mod memory;
pub mod models;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod store;

pub use error::{PersistError, Result};
pub use memory::MemoryStore;
pub use models::{
    ActiveStream, Message, MessagePart, MessageRole, MessageStatus, Provenance, Thread,
    ThreadStatus,
};
#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;
pub use store::{FinalizeOutcome, MessageStore, NewMessage, Store, ThreadStore};
