use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{error::ApiError, state::AppState};

/// The authenticated caller, resolved from a `Bearer` token. Stands in for
/// a real auth provider: tokens are configured key material, not sessions
/// with a lifecycle.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;

        let user_id = state
            .sessions
            .get(token)
            .cloned()
            .ok_or(ApiError::Unauthorized)?;

        Ok(Session { user_id })
    }
}
