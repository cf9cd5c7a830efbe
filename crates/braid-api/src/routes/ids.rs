use axum::{extract::State, Json};
use serde::Deserialize;
use std::sync::Arc;

use braid_ids::SignedId;

use crate::{auth::Session, error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct IssueIdsRequest {
    pub count: usize,
}

/// Issue a batch of signed message/thread ids for optimistic rendering.
/// The issuer enforces the batch ceiling.
pub async fn issue_ids(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(req): Json<IssueIdsRequest>,
) -> ApiResult<Json<Vec<SignedId>>> {
    let ids = state.issuer.issue(req.count)?;
    tracing::debug!(user_id = %session.user_id, count = ids.len(), "issued signed ids");
    Ok(Json(ids))
}
