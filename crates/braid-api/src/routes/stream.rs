use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{sse::Sse, IntoResponse, Response},
};
use std::sync::Arc;

use crate::{auth::Session, error::ApiResult, routes::chat::sse_events, state::AppState};

/// Attach to a thread's in-flight generation.
///
/// 204 when the thread has no active stream; otherwise the full stream so
/// far, replayed from the first token, followed by live output until the
/// generation ends.
pub async fn resume_stream(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(thread_id): Path<String>,
) -> ApiResult<Response> {
    match state
        .orchestrator
        .resume_thread_stream(&session.user_id, &thread_id)
        .await?
    {
        None => Ok(StatusCode::NO_CONTENT.into_response()),
        Some(stream) => {
            tracing::debug!(thread_id = %thread_id, "resuming active stream");
            Ok(Sse::new(sse_events(stream)).into_response())
        }
    }
}
