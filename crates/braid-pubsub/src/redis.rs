//! Redis-backed bus. Publisher operations ride a multiplexed connection;
//! each subscribed channel gets one dedicated pub/sub connection whose
//! messages fan out to local subscribers over a broadcast channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::{framed, PubSubError, Publisher, Result, Subscriber, Subscription};

const CHANNEL_CAPACITY: usize = 1024;

struct ChannelState {
    sender: broadcast::Sender<String>,
    reader: JoinHandle<()>,
}

pub struct RedisBus {
    client: redis::Client,
    conn: redis::aio::MultiplexedConnection,
    channels: Arc<Mutex<HashMap<String, ChannelState>>>,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| PubSubError::Backend(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)?;
        Ok(Self {
            client,
            conn,
            channels: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

fn backend(e: redis::RedisError) -> PubSubError {
    PubSubError::Backend(e.to_string())
}

#[async_trait]
impl Publisher for RedisBus {
    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, framed(message))
            .await
            .map_err(backend)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs())
                .await
                .map_err(backend),
            None => conn.set::<_, _, ()>(key, value).await.map_err(backend),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(backend)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1).await.map_err(backend)
    }
}

#[async_trait]
impl Subscriber for RedisBus {
    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut channels = self.channels.lock().await;

        let sender = match channels.get(channel) {
            // One underlying redis subscription per channel; later local
            // subscribers tap the same broadcast.
            Some(state) => state.sender.clone(),
            None => {
                let mut pubsub = self
                    .client
                    .get_async_pubsub()
                    .await
                    .map_err(backend)?;
                pubsub.subscribe(channel).await.map_err(backend)?;

                let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
                let fan_out = sender.clone();
                let channel_name = channel.to_string();
                let reader = tokio::spawn(async move {
                    let mut messages = pubsub.on_message();
                    while let Some(msg) = messages.next().await {
                        match msg.get_payload::<String>() {
                            // framed() is idempotent, so payloads from other
                            // producers still arrive terminated.
                            Ok(payload) => {
                                let _ = fan_out.send(framed(&payload));
                            }
                            Err(e) => {
                                tracing::warn!(
                                    channel = %channel_name,
                                    error = %e,
                                    "dropping undecodable pub/sub payload"
                                );
                            }
                        }
                    }
                });

                channels.insert(
                    channel.to_string(),
                    ChannelState {
                        sender: sender.clone(),
                        reader,
                    },
                );
                sender
            }
        };

        let mut bcast_rx = sender.subscribe();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                match bcast_rx.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let mut channels = self.channels.lock().await;
        if let Some(state) = channels.remove(channel) {
            state.reader.abort();
        }
        Ok(())
    }
}
