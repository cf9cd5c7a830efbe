//! Pub/sub bridge for the resumable stream transport.
//!
//! Adapts a key/value + publish/subscribe store into the two roles the
//! stream context needs. Two backends: an in-process one built on tokio
//! broadcast channels (used in tests and single-node deployments) and a
//! Redis one behind the `redis` cargo feature.
//!
//! Delivery contract: every payload handed to a subscriber is terminated
//! with a blank line. The downstream transport frames records on blank-line
//! boundaries, and an unterminated record stalls it silently.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::MemoryBus;
#[cfg(feature = "redis")]
pub use redis::RedisBus;

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("pub/sub backend error: {0}")]
    Backend(String),

    #[error("subscription to {0} lagged and dropped messages")]
    Lagged(String),
}

pub type Result<T> = std::result::Result<T, PubSubError>;

/// Write half of the bridge: publish plus the KV operations the stream
/// context uses for its catch-up buffer.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Connectionless backends implement this as a no-op.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn incr(&self, key: &str) -> Result<i64>;
}

/// Read half of the bridge. A channel may have any number of concurrent
/// subscribers; each gets every message published after it subscribed.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    /// Tears down the channel; outstanding subscriptions end.
    async fn unsubscribe(&self, channel: &str) -> Result<()>;
}

/// Both halves together, as the stream context consumes them.
pub trait Bus: Publisher + Subscriber {}

impl<T: Publisher + Subscriber> Bus for T {}

/// A live subscription. Messages arrive already blank-line terminated.
pub struct Subscription {
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Next message, or `None` once the channel is torn down.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Enforces the blank-line termination contract on a raw payload.
pub(crate) fn framed(message: &str) -> String {
    let trimmed = message.trim_end_matches('\n');
    format!("{trimmed}\n\n")
}

#[cfg(test)]
mod tests {
    use super::framed;

    #[test]
    fn test_framed_appends_blank_line() {
        assert_eq!(framed("payload"), "payload\n\n");
    }

    #[test]
    fn test_framed_normalizes_existing_newlines() {
        assert_eq!(framed("payload\n"), "payload\n\n");
        assert_eq!(framed("payload\n\n"), "payload\n\n");
    }
}
