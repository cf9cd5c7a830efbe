//! Prelude module for convenient imports
//!
//! Import everything you need with:
//! ```rust
//! use braid::prelude::*;
//! ```

pub use crate::{
    ActiveStream, AttachedStream, BranchSelections, ChatClient, ChatMessage, ChatRequest,
    ChatStatus, ChatViewController, CompletionOrchestrator, CompletionRequest, CompletionRun,
    EngineError, GenerationSettings, IdCache, IdIssuer, MemoryBus, MemoryStore, Message,
    MessagePart, MessageRole, MessageStatus, MessageTree, OpenAIClient, Provenance,
    ResumableStreamContext, SignedId, SignedIdFetcher, Store, StreamEvent, Thread, TriggerKind,
};
