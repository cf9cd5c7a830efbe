use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;

use braid_ids::IdIssuer;
use braid_llm::{ChatClient, ChatMessage, ChatRequest};
use braid_persist::{
    ActiveStream, FinalizeOutcome, Message, MessagePart, MessageRole, MessageStatus, NewMessage,
    Provenance, Store, Thread,
};
use braid_stream::{AttachedStream, EventStream, ResumableStreamContext};
use braid_types::{
    GenerationSettings, StreamEvent, TimingStats, TriggerKind,
};

use crate::cancel::CancelPoller;
use crate::error::EngineError;
use crate::request::CompletionRequest;

const THREAD_NAME_MAX: usize = 48;

/// Handle returned to the HTTP layer once a completion has been resolved
/// and its stream registered.
pub struct CompletionRun {
    pub thread_id: String,
    /// True when no thread id was supplied and one was minted; the route
    /// reports it in a response header.
    pub minted_thread: bool,
    pub assistant_message_id: String,
    pub stream_id: String,
    pub stream: AttachedStream,
}

pub struct CompletionOrchestrator {
    store: Arc<dyn Store>,
    llm: Arc<dyn ChatClient>,
    streams: ResumableStreamContext,
    issuer: IdIssuer,
    default_model: String,
    cancel_period: Duration,
}

impl CompletionOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        llm: Arc<dyn ChatClient>,
        streams: ResumableStreamContext,
        issuer: IdIssuer,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            llm,
            streams,
            issuer,
            default_model: default_model.into(),
            cancel_period: CancelPoller::DEFAULT_PERIOD,
        }
    }

    pub fn cancel_period(mut self, period: Duration) -> Self {
        self.cancel_period = period;
        self
    }

    pub fn streams(&self) -> &ResumableStreamContext {
        &self.streams
    }

    /// Resume the active stream of a thread, if any. `None` means idle.
    pub async fn resume_thread_stream(
        &self,
        user_id: &str,
        thread_id: &str,
    ) -> Result<Option<AttachedStream>, EngineError> {
        let thread = self.owned_thread(user_id, thread_id).await?;
        let Some(active) = thread.active_stream else {
            return Ok(None);
        };
        Ok(self.streams.resume(&active.stream_id).await?)
    }

    /// Raise the cancellation flag on a generating assistant message. The
    /// running generation notices on its next poll.
    pub async fn cancel_message(&self, user_id: &str, message_id: &str) -> Result<(), EngineError> {
        let message = self.require_message(message_id).await?;
        self.owned_thread(user_id, &message.thread_id).await?;
        self.store.request_cancel(message_id).await?;
        Ok(())
    }

    /// Run a submit/edit/regenerate request end to end.
    pub async fn run(&self, request: CompletionRequest) -> Result<CompletionRun, EngineError> {
        // Proposed ids are verified up front: a forged signature must fail
        // the request before a thread or message is written.
        if let Some(signed) = &request.user_message_id {
            self.issuer.require_valid(signed)?;
        }
        if let Some(signed) = &request.assistant_message_id {
            self.issuer.require_valid(signed)?;
        }

        // ResolvingContext: place the new messages in the tree and derive
        // the history the provider will see.
        let (thread, minted_thread) = self.resolve_thread(&request).await?;
        let assistant = self.resolve_messages(&thread, &request).await?;
        let history = self.history_for(&thread, &assistant).await?;

        let model = assistant
            .model
            .clone()
            .unwrap_or_else(|| thread.settings.model.clone());
        let chat_request = ChatRequest::new(model, history).temperature(thread.settings.temperature);

        // Register before streaming so a reconnecting client can discover
        // the stream id on the thread from the very first token.
        let stream_id = self.issuer.mint_id();
        self.store
            .set_active_stream(
                &thread.id,
                Some(ActiveStream {
                    stream_id: stream_id.clone(),
                    client_id: request.client_id.clone(),
                }),
            )
            .await?;

        let source = self.generation_stream(
            thread.id.clone(),
            stream_id.clone(),
            assistant.id.clone(),
            chat_request,
        );
        let stream = self.streams.register(&stream_id, source).await?;

        tracing::info!(
            thread_id = %thread.id,
            assistant_message_id = %assistant.id,
            stream_id = %stream_id,
            trigger = ?request.trigger,
            "completion stream started"
        );

        Ok(CompletionRun {
            thread_id: thread.id,
            minted_thread,
            assistant_message_id: assistant.id,
            stream_id,
            stream,
        })
    }

    async fn resolve_thread(
        &self,
        request: &CompletionRequest,
    ) -> Result<(Thread, bool), EngineError> {
        match &request.thread_id {
            Some(thread_id) => Ok((self.owned_thread(&request.user_id, thread_id).await?, false)),
            None => {
                if request.trigger != TriggerKind::SubmitMessage {
                    return Err(EngineError::InvalidTrigger(
                        "edit and regenerate require an existing thread".to_string(),
                    ));
                }
                let text = request.text.as_deref().unwrap_or_default();
                let name = derive_thread_name(text);
                let model = request
                    .model
                    .clone()
                    .unwrap_or_else(|| self.default_model.clone());
                let thread = self
                    .store
                    .create_thread(
                        self.issuer.mint_id(),
                        request.user_id.clone(),
                        name,
                        GenerationSettings::new(model),
                    )
                    .await?;
                Ok((thread, true))
            }
        }
    }

    /// Create the user message (if the trigger carries one) and the
    /// generating assistant placeholder; return the placeholder.
    async fn resolve_messages(
        &self,
        thread: &Thread,
        request: &CompletionRequest,
    ) -> Result<Message, EngineError> {
        let assistant_parent = match request.trigger {
            TriggerKind::SubmitMessage => {
                let text = request.text.as_deref().ok_or_else(|| {
                    EngineError::InvalidTrigger("submit requires message text".to_string())
                })?;
                let user_message = self
                    .insert_user_message(
                        thread,
                        request,
                        text,
                        thread.current_leaf_id.clone(),
                        Provenance::Original,
                    )
                    .await?;
                Some(user_message.id)
            }
            TriggerKind::EditMessage => {
                let target = self.trigger_target(request, MessageRole::User).await?;
                let text = request.text.as_deref().ok_or_else(|| {
                    EngineError::InvalidTrigger("edit requires replacement text".to_string())
                })?;
                // The edited original stays untouched; the replacement is a
                // new sibling under the same parent.
                let user_message = self
                    .insert_user_message(
                        thread,
                        request,
                        text,
                        target.parent_id.clone(),
                        Provenance::Edit {
                            from_message_id: target.id.clone(),
                        },
                    )
                    .await?;
                Some(user_message.id)
            }
            TriggerKind::RegenerateMessage => {
                let target = self.trigger_target(request, MessageRole::Assistant).await?;
                return self
                    .insert_assistant_message(
                        thread,
                        request,
                        target.parent_id.clone(),
                        Provenance::Regeneration {
                            from_message_id: target.id.clone(),
                        },
                    )
                    .await;
            }
        };

        self.insert_assistant_message(thread, request, assistant_parent, Provenance::Original)
            .await
    }

    async fn insert_user_message(
        &self,
        thread: &Thread,
        request: &CompletionRequest,
        text: &str,
        parent_id: Option<String>,
        provenance: Provenance,
    ) -> Result<Message, EngineError> {
        let id = self.claim_id(request.user_message_id.as_ref())?;
        Ok(self
            .store
            .insert_message(NewMessage {
                id,
                thread_id: thread.id.clone(),
                parent_id,
                role: MessageRole::User,
                parts: MessagePart::normalize(text),
                generating: false,
                provenance,
                model: None,
            })
            .await?)
    }

    async fn insert_assistant_message(
        &self,
        thread: &Thread,
        request: &CompletionRequest,
        parent_id: Option<String>,
        provenance: Provenance,
    ) -> Result<Message, EngineError> {
        let id = self.claim_id(request.assistant_message_id.as_ref())?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| thread.settings.model.clone());
        Ok(self
            .store
            .insert_message(NewMessage {
                id,
                thread_id: thread.id.clone(),
                parent_id,
                role: MessageRole::Assistant,
                parts: Vec::new(),
                generating: true,
                provenance,
                model: Some(model),
            })
            .await?)
    }

    /// Verify a client-proposed signed id, or mint a fresh one. A signature
    /// mismatch fails the request before any write.
    fn claim_id(&self, signed: Option<&braid_ids::SignedId>) -> Result<String, EngineError> {
        match signed {
            Some(signed) => {
                self.issuer.require_valid(signed)?;
                Ok(signed.id.clone())
            }
            None => Ok(self.issuer.mint_id()),
        }
    }

    async fn trigger_target(
        &self,
        request: &CompletionRequest,
        expected_role: MessageRole,
    ) -> Result<Message, EngineError> {
        let target_id = request.target_message_id.as_deref().ok_or_else(|| {
            EngineError::InvalidTrigger("trigger requires a target message id".to_string())
        })?;
        let target = self.require_message(target_id).await?;
        if target.role != expected_role {
            return Err(EngineError::InvalidTrigger(format!(
                "target message {target_id} has the wrong role"
            )));
        }
        Ok(target)
    }

    /// Authoritative history: the parent chain from the assistant
    /// placeholder to the root, oldest first. Branch-correct by
    /// construction; flat insertion order would leak other branches.
    async fn history_for(
        &self,
        thread: &Thread,
        assistant: &Message,
    ) -> Result<Vec<ChatMessage>, EngineError> {
        let messages = self.store.get_messages(&thread.id).await?;
        let by_id: std::collections::HashMap<&str, &Message> =
            messages.iter().map(|m| (m.id.as_str(), m)).collect();

        let mut history = Vec::new();
        let mut cursor = assistant.parent_id.as_deref();
        while let Some(id) = cursor {
            let message = by_id
                .get(id)
                .ok_or_else(|| braid_persist::PersistError::MessageNotFound(id.to_string()))?;
            if message.status == MessageStatus::Completed {
                let content = message.text();
                history.push(match message.role {
                    MessageRole::User => ChatMessage::user(content),
                    MessageRole::Assistant => ChatMessage::assistant(content),
                    MessageRole::System => ChatMessage::system(content),
                });
            }
            cursor = message.parent_id.as_deref();
        }
        history.reverse();

        if history.is_empty() {
            return Err(EngineError::InvalidTrigger(
                "no conversation context to complete".to_string(),
            ));
        }
        Ok(history)
    }

    /// The Streaming + Finalizing phases as one event source. Driven to
    /// completion by the resumable stream context regardless of whether any
    /// HTTP connection stays attached.
    fn generation_stream(
        &self,
        thread_id: String,
        stream_id: String,
        assistant_id: String,
        chat_request: ChatRequest,
    ) -> EventStream {
        let store = Arc::clone(&self.store);
        let llm = Arc::clone(&self.llm);
        let cancel_period = self.cancel_period;

        Box::pin(async_stream::stream! {
            let started = Instant::now();
            let mut first_token_at: Option<Instant> = None;
            let mut token_count: usize = 0;
            let mut accumulated = String::new();

            let mut provider = match llm.chat_stream(chat_request).await {
                Ok(stream) => stream,
                Err(e) => {
                    let error = EngineError::UpstreamGeneration(e.to_string());
                    tracing::error!(%thread_id, %assistant_id, error = %error, "provider refused the stream");
                    finalize_failure(&store, &thread_id, &stream_id, &assistant_id, &error).await;
                    yield StreamEvent::Error { message: error.to_string() };
                    return;
                }
            };

            let mut poller = CancelPoller::new(cancel_period);
            loop {
                tokio::select! {
                    _ = poller.due() => {
                        let cancelled = store
                            .cancel_requested(&assistant_id)
                            .await
                            .unwrap_or(false);
                        if cancelled {
                            let error = EngineError::Cancelled;
                            tracing::info!(%thread_id, %assistant_id, "generation cancelled");
                            finalize_failure(&store, &thread_id, &stream_id, &assistant_id, &error).await;
                            yield StreamEvent::Error { message: error.to_string() };
                            return;
                        }
                    }
                    event = provider.next() => {
                        match event {
                            Some(Ok(StreamEvent::Token { content })) => {
                                first_token_at.get_or_insert_with(Instant::now);
                                token_count += 1;
                                accumulated.push_str(&content);
                                yield StreamEvent::Token { content };
                            }
                            Some(Ok(StreamEvent::Done { finish_reason, usage })) => {
                                let duration = started.elapsed();
                                let ttft = first_token_at
                                    .map(|at| at.duration_since(started))
                                    .unwrap_or(duration);
                                let timing = TimingStats {
                                    time_to_first_token_ms: ttft.as_millis() as u64,
                                    duration_ms: duration.as_millis() as u64,
                                    tokens_per_sec: if duration.as_secs_f64() > 0.0 {
                                        token_count as f64 / duration.as_secs_f64()
                                    } else {
                                        0.0
                                    },
                                };

                                // Finalizing: persist the outcome before the
                                // stream pointer is touched, so a resumer can
                                // never see an active stream whose tail is gone.
                                let outcome = FinalizeOutcome::Completed {
                                    parts: MessagePart::normalize(accumulated.clone()),
                                    usage,
                                    timing: Some(timing),
                                };
                                if let Err(e) = store.finalize_message(&assistant_id, outcome).await {
                                    tracing::error!(%assistant_id, error = %e, "failed to persist completion");
                                }
                                if let Err(e) = store.set_current_leaf(&thread_id, &assistant_id).await {
                                    tracing::error!(%thread_id, error = %e, "failed to advance thread leaf");
                                }
                                clear_active_stream(&store, &thread_id, &stream_id).await;

                                yield StreamEvent::Done { finish_reason, usage };
                                return;
                            }
                            Some(Ok(StreamEvent::Error { message })) => {
                                let error = EngineError::UpstreamGeneration(message);
                                tracing::error!(%thread_id, %assistant_id, error = %error, "provider stream failed");
                                finalize_failure(&store, &thread_id, &stream_id, &assistant_id, &error).await;
                                yield StreamEvent::Error { message: error.to_string() };
                                return;
                            }
                            Some(Err(e)) => {
                                let error = EngineError::UpstreamGeneration(e.to_string());
                                tracing::error!(%thread_id, %assistant_id, error = %error, "provider stream failed");
                                finalize_failure(&store, &thread_id, &stream_id, &assistant_id, &error).await;
                                yield StreamEvent::Error { message: error.to_string() };
                                return;
                            }
                            None => {
                                // Provider hung up without a Done; close out as
                                // a completion with what we have.
                                let outcome = FinalizeOutcome::Completed {
                                    parts: MessagePart::normalize(accumulated.clone()),
                                    usage: None,
                                    timing: None,
                                };
                                if let Err(e) = store.finalize_message(&assistant_id, outcome).await {
                                    tracing::error!(%assistant_id, error = %e, "failed to persist completion");
                                }
                                if let Err(e) = store.set_current_leaf(&thread_id, &assistant_id).await {
                                    tracing::error!(%thread_id, error = %e, "failed to advance thread leaf");
                                }
                                clear_active_stream(&store, &thread_id, &stream_id).await;
                                yield StreamEvent::Done { finish_reason: None, usage: None };
                                return;
                            }
                        }
                    }
                }
            }
        })
    }

    async fn owned_thread(&self, user_id: &str, thread_id: &str) -> Result<Thread, EngineError> {
        let thread = self
            .store
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| braid_persist::PersistError::ThreadNotFound(thread_id.to_string()))?;
        if thread.user_id != user_id {
            return Err(EngineError::Unauthorized);
        }
        Ok(thread)
    }

    async fn require_message(&self, message_id: &str) -> Result<Message, EngineError> {
        Ok(self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| braid_persist::PersistError::MessageNotFound(message_id.to_string()))?)
    }
}

async fn finalize_failure(
    store: &Arc<dyn Store>,
    thread_id: &str,
    stream_id: &str,
    assistant_id: &str,
    error: &EngineError,
) {
    let outcome = FinalizeOutcome::Failed {
        error: Some(error.to_string()),
    };
    if let Err(e) = store.finalize_message(assistant_id, outcome).await {
        tracing::error!(%assistant_id, error = %e, "failed to persist failure");
    }
    clear_active_stream(store, thread_id, stream_id).await;
}

/// Clear the thread's active-stream pointer, but only while it still names
/// this stream; a newer generation may have superseded it.
async fn clear_active_stream(store: &Arc<dyn Store>, thread_id: &str, stream_id: &str) {
    let current = match store.get_thread(thread_id).await {
        Ok(Some(thread)) => thread.active_stream,
        Ok(None) => None,
        Err(e) => {
            tracing::error!(%thread_id, error = %e, "failed to read thread for stream cleanup");
            return;
        }
    };
    if current.map(|a| a.stream_id) == Some(stream_id.to_string()) {
        if let Err(e) = store.set_active_stream(thread_id, None).await {
            tracing::error!(%thread_id, error = %e, "failed to clear active stream");
        }
    }
}

fn derive_thread_name(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "New chat".to_string();
    }
    let mut name: String = trimmed.chars().take(THREAD_NAME_MAX).collect();
    if trimmed.chars().count() > THREAD_NAME_MAX {
        name.push('…');
    }
    name
}
