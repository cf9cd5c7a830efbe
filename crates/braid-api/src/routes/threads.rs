use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use braid_engine::EngineError;
use braid_persist::{Message, PersistError, Thread};

use crate::{auth::Session, error::ApiResult, state::AppState};

const DEFAULT_LIST_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ListThreadsQuery {
    pub limit: Option<i64>,
}

/// List the caller's threads, most recently updated first.
pub async fn list_threads(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(query): Query<ListThreadsQuery>,
) -> ApiResult<Json<Vec<Thread>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 200);
    let threads = state
        .store
        .list_threads(&session.user_id, limit)
        .await
        .map_err(EngineError::Store)?;
    Ok(Json(threads))
}

#[derive(Debug, Deserialize)]
pub struct RenameThreadRequest {
    pub name: String,
}

pub async fn rename_thread(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(thread_id): Path<String>,
    Json(req): Json<RenameThreadRequest>,
) -> ApiResult<Json<Thread>> {
    owned_thread(&state, &session.user_id, &thread_id).await?;
    state
        .store
        .rename_thread(&thread_id, &req.name)
        .await
        .map_err(EngineError::Store)?;
    owned_thread(&state, &session.user_id, &thread_id)
        .await
        .map(Json)
}

/// Flat message list for a thread; tree shape is client-side.
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    owned_thread(&state, &session.user_id, &thread_id).await?;
    let messages = state
        .store
        .get_messages(&thread_id)
        .await
        .map_err(EngineError::Store)?;
    Ok(Json(messages))
}

async fn owned_thread(
    state: &AppState,
    user_id: &str,
    thread_id: &str,
) -> ApiResult<Thread> {
    let thread = state
        .store
        .get_thread(thread_id)
        .await
        .map_err(EngineError::Store)?
        .ok_or_else(|| EngineError::Store(PersistError::ThreadNotFound(thread_id.to_string())))?;
    if thread.user_id != user_id {
        return Err(EngineError::Unauthorized.into());
    }
    Ok(thread)
}
