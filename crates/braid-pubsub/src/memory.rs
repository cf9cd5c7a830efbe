//! In-process bus built on tokio broadcast channels and a mutexed KV map.
//!
//! Connectionless by construction; `connect` is the trait's default no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::{framed, PubSubError, Publisher, Result, Subscriber, Subscription};

const CHANNEL_CAPACITY: usize = 1024;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

#[derive(Default)]
struct Inner {
    kv: HashMap<String, Entry>,
    // One broadcast sender per channel; resubscribing reuses it, so a channel
    // never carries more than one underlying subscription object.
    channels: HashMap<String, broadcast::Sender<String>>,
}

/// In-memory implementation of both bridge roles. Cheap to clone; all clones
/// share state.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut inner = self.inner.lock().await;
        inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Publisher for MemoryBus {
    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let sender = self.sender(channel).await;
        // No receivers yet is not an error; the buffer covers late joiners.
        let _ = sender.send(framed(message));
        Ok(())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        match inner.kv.get(key) {
            Some(entry) if entry.live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                inner.kv.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        let current = match inner.kv.get(key) {
            Some(entry) if entry.live() => entry
                .value
                .parse::<i64>()
                .map_err(|e| PubSubError::Backend(format!("incr on non-integer value: {e}")))?,
            _ => 0,
        };
        let next = current + 1;
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }
}

#[async_trait]
impl Subscriber for MemoryBus {
    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut bcast_rx = self.sender(channel).await.subscribe();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let channel_name = channel.to_string();

        tokio::spawn(async move {
            loop {
                match bcast_rx.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            channel = %channel_name,
                            skipped,
                            "subscription lagged, dropping behind"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.channels.remove(channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber_with_framing() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("ch").await.unwrap();
        bus.publish("ch", "hello").await.unwrap();
        assert_eq!(sub.next().await.unwrap(), "hello\n\n");
    }

    #[tokio::test]
    async fn test_fan_out_to_multiple_subscribers() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("ch").await.unwrap();
        let mut b = bus.subscribe("ch").await.unwrap();
        bus.publish("ch", "x").await.unwrap();
        assert_eq!(a.next().await.unwrap(), "x\n\n");
        assert_eq!(b.next().await.unwrap(), "x\n\n");
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_subscriptions() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("ch").await.unwrap();
        bus.unsubscribe("ch").await.unwrap();
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_kv_set_get_and_incr() {
        let bus = MemoryBus::new();
        bus.set("k", "v", None).await.unwrap();
        assert_eq!(bus.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(bus.get("missing").await.unwrap(), None);

        assert_eq!(bus.incr("n").await.unwrap(), 1);
        assert_eq!(bus.incr("n").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_kv_ttl_expiry() {
        let bus = MemoryBus::new();
        bus.set("k", "v", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bus.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_connect_is_noop() {
        assert!(MemoryBus::new().connect().await.is_ok());
    }
}
