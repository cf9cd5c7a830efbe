//! Token-streaming LLM client.
//!
//! The orchestrator treats the provider as an external collaborator exposing
//! one capability: turn a conversation into a stream of
//! [`braid_types::StreamEvent`]s. [`ChatClient`] is that seam;
//! [`OpenAIClient`] is the shipped implementation, speaking the
//! chat-completions SSE protocol.

pub mod openai;
pub mod streaming;
pub mod traits;
pub mod types;

pub use openai::OpenAIClient;
pub use streaming::parse_chat_sse_stream;
pub use traits::{ChatClient, ChatRequest, TokenStream};
pub use types::{ChatMessage, ChatRole};
