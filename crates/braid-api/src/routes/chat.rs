use axum::{
    extract::{Path, State},
    http::HeaderValue,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;

use braid_engine::CompletionRequest;
use braid_ids::SignedId;
use braid_stream::AttachedStream;
use braid_types::{StreamEvent, TriggerKind};

use crate::{auth::Session, error::ApiResult, state::AppState};

/// Response header carrying a freshly minted thread id when the request
/// did not name one.
pub const THREAD_ID_HEADER: &str = "x-thread-id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    pub trigger: TriggerKind,
    pub thread_id: Option<String>,
    pub client_id: Option<String>,
    pub model: Option<String>,
    /// New user message text; required for submit and edit triggers.
    pub text: Option<String>,
    /// Pre-issued ids for the messages the client already rendered.
    pub user_message_id: Option<SignedId>,
    pub assistant_message_id: Option<SignedId>,
    /// The message being edited or regenerated.
    pub message_id: Option<String>,
}

/// Start a completion and stream its events back as SSE.
///
/// The generation itself is owned by a background task; this connection is
/// just the first subscriber. Disconnecting does not stop it, and the
/// stream-resume route can pick it back up.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(body): Json<ChatRequestBody>,
) -> ApiResult<Response> {
    let request = CompletionRequest {
        user_id: session.user_id,
        thread_id: body.thread_id,
        client_id: body.client_id,
        trigger: body.trigger,
        model: body.model,
        text: body.text,
        user_message_id: body.user_message_id,
        assistant_message_id: body.assistant_message_id,
        target_message_id: body.message_id,
    };

    let run = state.orchestrator.run(request).await?;

    let mut response = Sse::new(sse_events(run.stream)).into_response();
    if run.minted_thread {
        if let Ok(value) = HeaderValue::from_str(&run.thread_id) {
            response.headers_mut().insert(THREAD_ID_HEADER, value);
        }
    }
    Ok(response)
}

/// Raise the cancellation flag on a generating assistant message. The
/// running generation notices on its next poll, within the poll interval.
pub async fn cancel_message(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(message_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .orchestrator
        .cancel_message(&session.user_id, &message_id)
        .await?;
    Ok(Json(serde_json::json!({ "status": "cancelling" })))
}

/// Convert an attached stream into SSE events, one per stream event, with
/// the event name mirroring the payload's tag.
pub(crate) fn sse_events(
    stream: AttachedStream,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream.map(|item| {
        let event = match item {
            Ok(ref ev) => {
                let name = match ev {
                    StreamEvent::Token { .. } => "token",
                    StreamEvent::Done { .. } => "done",
                    StreamEvent::Error { .. } => "error",
                };
                Event::default().event(name).json_data(ev)
            }
            Err(e) => Event::default()
                .event("error")
                .json_data(serde_json::json!({ "error": e.to_string() })),
        };
        Ok(event.unwrap_or_else(|_| Event::default().event("error").data("serialization failed")))
    })
}
