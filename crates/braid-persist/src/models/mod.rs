pub mod message;
pub mod thread;

pub use message::{Message, MessagePart, MessageRole, MessageStatus, Provenance};
pub use thread::{ActiveStream, Thread, ThreadStatus};
