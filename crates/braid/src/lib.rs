//! # Braid
//!
//! Resumable, multi-branch chat streaming. Braid is the server and headless
//! client core of a chat application whose conversations form trees (edits
//! and regenerations create siblings, never overwrites) and whose token
//! streams survive the connection that started them.
//!
//! ## Overview
//!
//! - **Signed ids**: clients render optimistically under HMAC-signed ids
//!   issued ahead of need and verified before any write.
//! - **Resumable streams**: a completion is teed through a pub/sub bridge
//!   with a catch-up buffer, so any connection (the original, another tab,
//!   a reload) can attach and see the whole output exactly once.
//! - **Branching**: messages are immutable; the tree is rebuilt client-side
//!   from parent pointers and sibling indices, defaulting to the latest
//!   branch at every level.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use braid::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let llm: Arc<dyn ChatClient> =
//!         Arc::new(OpenAIClient::new(std::env::var("OPENAI_API_KEY")?)?);
//!     let streams = ResumableStreamContext::new(Arc::new(MemoryBus::new()));
//!     let issuer = IdIssuer::new(b"secret");
//!
//!     let orchestrator =
//!         CompletionOrchestrator::new(store, llm, streams, issuer, "gpt-4o-mini");
//!
//!     let run = orchestrator
//!         .run(CompletionRequest::submit("user-1", "Hello!"))
//!         .await?;
//!
//!     let mut stream = run.stream;
//!     while let Some(event) = futures::StreamExt::next(&mut stream).await {
//!         match event? {
//!             StreamEvent::Token { content } => print!("{}", content),
//!             StreamEvent::Done { .. } => break,
//!             StreamEvent::Error { message } => anyhow::bail!(message),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **`braid-types`**: stream events, wire frames, generation settings
//! - **`braid-ids`**: signed-id issuance and constant-time verification
//! - **`braid-pubsub`**: publisher/subscriber bridge (in-memory, Redis)
//! - **`braid-stream`**: resumable stream context over the bridge
//! - **`braid-persist`**: thread/message stores (in-memory, MongoDB)
//! - **`braid-llm`**: provider client trait and OpenAI SSE streaming
//! - **`braid-engine`**: the completion orchestrator
//! - **`braid-client`**: message tree, id cache, view controller

pub mod prelude;

pub use braid_types::{
    Frame, FrameError, GenerationSettings, StreamEvent, TimingStats, TokenUsage, TriggerKind,
};

pub use braid_ids::{IdError, IdIssuer, SignedId, MAX_BATCH};

pub use braid_pubsub::{Bus, MemoryBus, PubSubError, Publisher, Subscriber, Subscription};

#[cfg(feature = "redis")]
pub use braid_pubsub::RedisBus;

pub use braid_stream::{AttachedStream, EventStream, ResumableStreamContext, StreamError};

pub use braid_persist::{
    ActiveStream, FinalizeOutcome, MemoryStore, Message, MessagePart, MessageRole, MessageStatus,
    MessageStore, NewMessage, PersistError, Provenance, Store, Thread, ThreadStatus, ThreadStore,
};

#[cfg(feature = "mongodb")]
pub use braid_persist::MongoStore;

pub use braid_llm::{ChatClient, ChatMessage, ChatRequest, ChatRole, OpenAIClient, TokenStream};

pub use braid_engine::{
    CancelPoller, CompletionOrchestrator, CompletionRequest, CompletionRun, EngineError,
};

pub use braid_client::{
    BranchSelections, ChatStatus, ChatViewController, IdCache, IdCacheError, MessageTree,
    SignedIdFetcher,
};
