//! Chat completion orchestration.
//!
//! One request moves through `Received → ResolvingContext → Streaming →
//! Finalizing → {Completed | Aborted | Failed}`: resolve the branch-correct
//! conversation history, place the user/assistant messages in the tree,
//! stream from the provider while polling for cancellation, persist the
//! outcome, and keep the whole stream resumable for any connection.

pub mod cancel;
pub mod error;
pub mod orchestrator;
pub mod request;

pub use cancel::CancelPoller;
pub use error::EngineError;
pub use orchestrator::{CompletionOrchestrator, CompletionRun};
pub use request::CompletionRequest;
