//! Resumable stream context.
//!
//! Decouples "a token stream is being generated" from "an HTTP connection is
//! attached to it". A registered stream is driven to completion by a
//! background task that publishes every frame on a pub/sub channel and
//! appends it to a KV catch-up buffer; any number of connections, the
//! originating one included, attach by replaying the buffer and then
//! following live frames. Sequence numbers dedupe the handover between the
//! two, so a resumed stream has no gaps and no repeats.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use thiserror::Error;

use braid_pubsub::{Bus, PubSubError};
use braid_types::{Frame, FrameError, StreamEvent};

/// A source of stream events, as produced by the orchestrator.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A stream attached to an in-flight (or finished) generation.
pub type AttachedStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, StreamError>> + Send>>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Bus(#[from] PubSubError),

    #[error(transparent)]
    Codec(#[from] FrameError),

    #[error("stream {0} vanished before registration completed")]
    NotRegistered(String),

    #[error("channel for stream {0} closed before a terminal frame")]
    ChannelClosed(String),
}

const STATE_RUNNING: &str = "running";
const STATE_DONE: &str = "done";
const STATE_FAILED: &str = "failed";

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct ResumableStreamContext {
    bus: Arc<dyn Bus>,
    ttl: Duration,
}

fn channel(stream_id: &str) -> String {
    format!("stream:{stream_id}")
}

fn state_key(stream_id: &str) -> String {
    format!("stream:{stream_id}:state")
}

fn seq_key(stream_id: &str) -> String {
    format!("stream:{stream_id}:seq")
}

fn buffer_key(stream_id: &str) -> String {
    format!("stream:{stream_id}:buffer")
}

impl ResumableStreamContext {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Register a freshly started generation under `stream_id` and return
    /// the originating connection's view of it.
    ///
    /// The source is consumed by a spawned task, so generation continues
    /// even if the returned stream is dropped mid-flight.
    pub async fn register(
        &self,
        stream_id: &str,
        source: EventStream,
    ) -> Result<AttachedStream, StreamError> {
        let ttl = Some(self.ttl);
        self.bus.set(&state_key(stream_id), STATE_RUNNING, ttl).await?;
        self.bus.set(&buffer_key(stream_id), "", ttl).await?;

        let driver = Driver {
            bus: Arc::clone(&self.bus),
            stream_id: stream_id.to_string(),
            ttl: self.ttl,
        };
        tokio::spawn(driver.run(source));

        self.resume(stream_id)
            .await?
            .ok_or_else(|| StreamError::NotRegistered(stream_id.to_string()))
    }

    /// Attach to the stream registered under `stream_id`.
    ///
    /// `None` means no such stream was ever registered (or its state has
    /// expired); callers map that to "no active stream", not an error. A
    /// stream that already finished still yields its buffered output once
    /// and then terminates; a failed one ends with a terminal error frame.
    pub async fn resume(&self, stream_id: &str) -> Result<Option<AttachedStream>, StreamError> {
        let Some(state) = self.bus.get(&state_key(stream_id)).await? else {
            return Ok(None);
        };

        // Subscribe before snapshotting the buffer: frames are appended to
        // the buffer before they are published, so everything missed by the
        // subscription is covered by the snapshot and everything after the
        // snapshot arrives live.
        let mut subscription = self.bus.subscribe(&channel(stream_id)).await?;
        let buffer = self
            .bus
            .get(&buffer_key(stream_id))
            .await?
            .unwrap_or_default();
        let buffered = Frame::decode_buffer(&buffer)?;
        let snapshot_seq = buffered.last().map(|f| f.seq).unwrap_or(0);

        let id = stream_id.to_string();
        let stream = async_stream::stream! {
            let mut terminal_seen = false;
            for frame in buffered {
                terminal_seen = frame.event.is_terminal();
                yield Ok(frame.event);
                if terminal_seen {
                    break;
                }
            }

            if terminal_seen {
                return;
            }

            // Finished before any terminal frame made it into the buffer:
            // close out explicitly rather than hanging on the channel.
            if state != STATE_RUNNING {
                if state == STATE_FAILED {
                    yield Ok(StreamEvent::Error {
                        message: "generation failed".to_string(),
                    });
                } else {
                    yield Ok(StreamEvent::Done {
                        finish_reason: None,
                        usage: None,
                    });
                }
                return;
            }

            while let Some(message) = subscription.next().await {
                for line in message.lines().filter(|l| !l.trim().is_empty()) {
                    let frame = match Frame::decode(line) {
                        Ok(frame) => frame,
                        Err(e) => {
                            yield Err(StreamError::Codec(e));
                            return;
                        }
                    };
                    if frame.seq <= snapshot_seq {
                        continue;
                    }
                    let terminal = frame.event.is_terminal();
                    yield Ok(frame.event);
                    if terminal {
                        return;
                    }
                }
            }

            yield Err(StreamError::ChannelClosed(id.clone()));
        };

        Ok(Some(Box::pin(stream)))
    }

    /// Whether a generation is still being driven under `stream_id`.
    pub async fn is_active(&self, stream_id: &str) -> Result<bool, StreamError> {
        Ok(self.bus.get(&state_key(stream_id)).await?.as_deref() == Some(STATE_RUNNING))
    }
}

struct Driver {
    bus: Arc<dyn Bus>,
    stream_id: String,
    ttl: Duration,
}

impl Driver {
    async fn run(self, mut source: EventStream) {
        let mut buffer = String::new();
        let mut seq = 0u64;
        let mut terminal: Option<StreamEvent> = None;

        while let Some(event) = source.next().await {
            let is_terminal = event.is_terminal();
            if is_terminal {
                terminal = Some(event.clone());
            }
            if let Err(e) = self.emit(&mut buffer, &mut seq, event).await {
                tracing::error!(stream_id = %self.stream_id, error = %e, "stream driver lost its bus");
                return;
            }
            if is_terminal {
                break;
            }
        }

        // A source that ended without a terminal event still terminates
        // cleanly for every attached consumer.
        if terminal.is_none() {
            let done = StreamEvent::Done {
                finish_reason: None,
                usage: None,
            };
            terminal = Some(done.clone());
            if let Err(e) = self.emit(&mut buffer, &mut seq, done).await {
                tracing::error!(stream_id = %self.stream_id, error = %e, "stream driver lost its bus");
                return;
            }
        }

        let state = match terminal {
            Some(StreamEvent::Error { .. }) => STATE_FAILED,
            _ => STATE_DONE,
        };
        if let Err(e) = self
            .bus
            .set(&state_key(&self.stream_id), state, Some(self.ttl))
            .await
        {
            tracing::error!(stream_id = %self.stream_id, error = %e, "failed to record stream state");
        }
    }

    async fn emit(
        &self,
        buffer: &mut String,
        seq: &mut u64,
        event: StreamEvent,
    ) -> Result<(), StreamError> {
        *seq = self.bus.incr(&seq_key(&self.stream_id)).await? as u64;
        let encoded = Frame::new(*seq, event).encode();

        buffer.push_str(&encoded);
        buffer.push('\n');
        // Buffer write strictly precedes publish; the resume snapshot
        // ordering depends on it.
        self.bus
            .set(&buffer_key(&self.stream_id), buffer, Some(self.ttl))
            .await?;
        self.bus.publish(&channel(&self.stream_id), &encoded).await?;
        Ok(())
    }
}
