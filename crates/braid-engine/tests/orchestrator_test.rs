use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;

use braid_engine::{CompletionOrchestrator, CompletionRequest, EngineError};
use braid_ids::IdIssuer;
use braid_llm::{ChatClient, ChatRequest, TokenStream};
use braid_persist::{
    MemoryStore, MessageRole, MessageStatus, MessageStore, Provenance, Store, ThreadStore,
};
use braid_pubsub::MemoryBus;
use braid_stream::ResumableStreamContext;
use braid_types::{StreamEvent, TokenUsage, TriggerKind};

/// Provider double: replays a fixed script, or streams tokens forever when
/// `endless` is set (for cancellation tests).
struct ScriptedClient {
    script: Vec<StreamEvent>,
    endless: bool,
}

impl ScriptedClient {
    fn replying(text: &str) -> Self {
        Self {
            script: vec![
                StreamEvent::Token {
                    content: text.to_string(),
                },
                StreamEvent::Done {
                    finish_reason: Some("stop".to_string()),
                    usage: Some(TokenUsage {
                        prompt_tokens: 4,
                        response_tokens: 2,
                        total_tokens: 6,
                    }),
                },
            ],
            endless: false,
        }
    }

    fn endless() -> Self {
        Self {
            script: Vec::new(),
            endless: true,
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            script: vec![StreamEvent::Error {
                message: message.to_string(),
            }],
            endless: false,
        }
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn chat_stream(&self, _request: ChatRequest) -> Result<TokenStream> {
        let script = self.script.clone();
        let endless = self.endless;
        Ok(Box::pin(async_stream::stream! {
            for event in script {
                yield Ok(event);
            }
            while endless {
                tokio::time::sleep(Duration::from_millis(10)).await;
                yield Ok(StreamEvent::Token { content: "tok ".to_string() });
            }
        }))
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    orchestrator: CompletionOrchestrator,
    issuer: IdIssuer,
}

fn harness(client: ScriptedClient) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let issuer = IdIssuer::new(b"engine-test-secret");
    let streams = ResumableStreamContext::new(Arc::new(MemoryBus::new()));
    let orchestrator = CompletionOrchestrator::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(client),
        streams,
        issuer.clone(),
        "gpt-4o",
    )
    .cancel_period(Duration::from_millis(20));
    Harness {
        store,
        orchestrator,
        issuer,
    }
}

async fn drain(mut stream: braid_stream::AttachedStream) -> (String, Option<StreamEvent>) {
    let mut text = String::new();
    let mut terminal = None;
    while let Some(event) = stream.next().await {
        match event.expect("bus error") {
            StreamEvent::Token { content } => text.push_str(&content),
            other => {
                terminal = Some(other);
                break;
            }
        }
    }
    (text, terminal)
}

#[tokio::test]
async fn test_fresh_thread_submit() {
    let h = harness(ScriptedClient::replying("Hi there"));

    let run = h
        .orchestrator
        .run(CompletionRequest::submit("u1", "Hello"))
        .await
        .unwrap();
    assert!(run.minted_thread);

    let (text, terminal) = drain(run.stream).await;
    assert_eq!(text, "Hi there");
    assert!(matches!(terminal, Some(StreamEvent::Done { .. })));

    let messages = h.store.get_messages(&run.thread_id).await.unwrap();
    assert_eq!(messages.len(), 2);

    let user = &messages[0];
    assert_eq!(user.role, MessageRole::User);
    assert_eq!(user.status, MessageStatus::Completed);
    assert!(user.parent_id.is_none());
    assert_eq!(user.depth, 0);

    let assistant = &messages[1];
    assert_eq!(assistant.role, MessageRole::Assistant);
    assert_eq!(assistant.status, MessageStatus::Completed);
    assert_eq!(assistant.parent_id.as_deref(), Some(user.id.as_str()));
    assert_eq!(assistant.depth, 1);
    assert_eq!(assistant.text(), "Hi there");
    assert_eq!(assistant.usage.unwrap().total_tokens, 6);
    assert!(assistant.timing.is_some());

    let thread = h.store.get_thread(&run.thread_id).await.unwrap().unwrap();
    assert_eq!(thread.name, "Hello");
    assert_eq!(thread.current_leaf_id.as_deref(), Some(assistant.id.as_str()));
    assert!(thread.active_stream.is_none());
}

#[tokio::test]
async fn test_client_proposed_signed_ids_are_honored() {
    let h = harness(ScriptedClient::replying("ok"));
    let mut ids = h.issuer.issue(2).unwrap();
    let user_id = ids.remove(0);
    let assistant_id = ids.remove(0);

    let mut request = CompletionRequest::submit("u1", "Hello");
    request.user_message_id = Some(user_id.clone());
    request.assistant_message_id = Some(assistant_id.clone());

    let run = h.orchestrator.run(request).await.unwrap();
    assert_eq!(run.assistant_message_id, assistant_id.id);
    drain(run.stream).await;

    assert!(h.store.get_message(&user_id.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_forged_id_fails_before_any_write() {
    let h = harness(ScriptedClient::replying("ok"));
    let mut signed = h.issuer.issue(1).unwrap().remove(0);
    signed.id = "attacker-chosen-id".to_string();

    let mut request = CompletionRequest::submit("u1", "Hello");
    request.user_message_id = Some(signed);

    let err = h
        .orchestrator
        .run(request)
        .await
        .err()
        .expect("forged signature must be rejected");
    assert!(matches!(err, EngineError::InvalidId(_)));
    assert!(h
        .store
        .get_message("attacker-chosen-id")
        .await
        .unwrap()
        .is_none());
    // Not even a freshly minted thread may survive the rejection.
    assert!(h.store.list_threads("u1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_edit_creates_sibling_with_provenance() {
    let h = harness(ScriptedClient::replying("reply"));

    let first = h
        .orchestrator
        .run(CompletionRequest::submit("u1", "original question"))
        .await
        .unwrap();
    let thread_id = first.thread_id.clone();
    drain(first.stream).await;

    let original_user = h.store.get_messages(&thread_id).await.unwrap()[0].clone();

    let mut edit = CompletionRequest::submit("u1", "edited question").thread(&thread_id);
    edit.trigger = TriggerKind::EditMessage;
    edit.target_message_id = Some(original_user.id.clone());
    let run = h.orchestrator.run(edit).await.unwrap();
    drain(run.stream).await;

    let messages = h.store.get_messages(&thread_id).await.unwrap();
    let edited = messages
        .iter()
        .find(|m| m.text() == "edited question")
        .unwrap();

    // New sibling under the same parent; the original is untouched.
    assert_eq!(edited.parent_id, original_user.parent_id);
    assert_eq!(edited.sibling_index, original_user.sibling_index + 1);
    assert_eq!(
        edited.provenance,
        Provenance::Edit {
            from_message_id: original_user.id.clone()
        }
    );
    let untouched = h.store.get_message(&original_user.id).await.unwrap().unwrap();
    assert_eq!(untouched.text(), "original question");
}

#[tokio::test]
async fn test_regenerate_creates_assistant_sibling() {
    let h = harness(ScriptedClient::replying("take two"));

    let first = h
        .orchestrator
        .run(CompletionRequest::submit("u1", "question"))
        .await
        .unwrap();
    let thread_id = first.thread_id.clone();
    drain(first.stream).await;

    let original_assistant = h.store.get_messages(&thread_id).await.unwrap()[1].clone();

    let mut regen = CompletionRequest::submit("u1", "ignored");
    regen.text = None;
    regen.thread_id = Some(thread_id.clone());
    regen.trigger = TriggerKind::RegenerateMessage;
    regen.target_message_id = Some(original_assistant.id.clone());
    let run = h.orchestrator.run(regen).await.unwrap();
    drain(run.stream).await;

    let regenerated = h
        .store
        .get_message(&run.assistant_message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(regenerated.parent_id, original_assistant.parent_id);
    assert_eq!(
        regenerated.sibling_index,
        original_assistant.sibling_index + 1
    );
    assert_eq!(
        regenerated.provenance,
        Provenance::Regeneration {
            from_message_id: original_assistant.id.clone()
        }
    );
    assert_eq!(regenerated.text(), "take two");
}

#[tokio::test]
async fn test_regenerate_without_target_is_invalid() {
    let h = harness(ScriptedClient::replying("x"));
    let first = h
        .orchestrator
        .run(CompletionRequest::submit("u1", "question"))
        .await
        .unwrap();
    let thread_id = first.thread_id.clone();
    drain(first.stream).await;

    let mut regen = CompletionRequest::submit("u1", "ignored");
    regen.text = None;
    regen.thread_id = Some(thread_id);
    regen.trigger = TriggerKind::RegenerateMessage;

    let err = h
        .orchestrator
        .run(regen)
        .await
        .err()
        .expect("regenerate without a target must be rejected");
    assert!(matches!(err, EngineError::InvalidTrigger(_)));
}

#[tokio::test]
async fn test_cancellation_poll_aborts_generation() {
    let h = harness(ScriptedClient::endless());

    let run = h
        .orchestrator
        .run(CompletionRequest::submit("u1", "never-ending"))
        .await
        .unwrap();
    let assistant_id = run.assistant_message_id.clone();
    let thread_id = run.thread_id.clone();

    let mut stream = run.stream;
    // Let a few tokens through, then raise the flag out of band.
    let _ = stream.next().await;
    h.orchestrator
        .cancel_message("u1", &assistant_id)
        .await
        .unwrap();

    let mut terminal = None;
    while let Some(event) = stream.next().await {
        if let Ok(event) = event {
            if event.is_terminal() {
                terminal = Some(event);
                break;
            }
        }
    }
    match terminal {
        Some(StreamEvent::Error { message }) => assert!(message.contains("cancelled")),
        other => panic!("expected cancellation error, got {other:?}"),
    }

    let assistant = h.store.get_message(&assistant_id).await.unwrap().unwrap();
    assert_eq!(assistant.status, MessageStatus::Failed);
    let thread = h.store.get_thread(&thread_id).await.unwrap().unwrap();
    assert!(thread.active_stream.is_none());
}

#[tokio::test]
async fn test_provider_failure_persists_error() {
    let h = harness(ScriptedClient::failing("model melted"));

    let run = h
        .orchestrator
        .run(CompletionRequest::submit("u1", "Hello"))
        .await
        .unwrap();
    let (_, terminal) = drain(run.stream).await;
    match terminal {
        Some(StreamEvent::Error { message }) => assert!(message.contains("model melted")),
        other => panic!("expected error, got {other:?}"),
    }

    let assistant = h
        .store
        .get_message(&run.assistant_message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(assistant.status, MessageStatus::Failed);
    assert!(assistant.error.as_deref().unwrap().contains("model melted"));

    let thread = h.store.get_thread(&run.thread_id).await.unwrap().unwrap();
    assert!(thread.active_stream.is_none());
}

#[tokio::test]
async fn test_resume_thread_stream_mid_generation() {
    let h = harness(ScriptedClient::endless());

    let run = h
        .orchestrator
        .run(CompletionRequest::submit("u1", "stream on").client("tab-a"))
        .await
        .unwrap();
    let thread_id = run.thread_id.clone();

    let thread = h.store.get_thread(&thread_id).await.unwrap().unwrap();
    let active = thread.active_stream.expect("stream registered on thread");
    assert_eq!(active.client_id.as_deref(), Some("tab-a"));

    let mut resumed = h
        .orchestrator
        .resume_thread_stream("u1", &thread_id)
        .await
        .unwrap()
        .expect("active stream is resumable");
    let first = resumed.next().await.unwrap().unwrap();
    assert!(matches!(first, StreamEvent::Token { .. }));

    h.orchestrator
        .cancel_message("u1", &run.assistant_message_id)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_foreign_thread_is_unauthorized() {
    let h = harness(ScriptedClient::replying("x"));
    let first = h
        .orchestrator
        .run(CompletionRequest::submit("owner", "mine"))
        .await
        .unwrap();
    let thread_id = first.thread_id.clone();
    drain(first.stream).await;

    let err = h
        .orchestrator
        .run(CompletionRequest::submit("intruder", "theirs").thread(&thread_id))
        .await
        .err()
        .expect("a foreign user must not reach the thread");
    assert!(matches!(err, EngineError::Unauthorized));
}
