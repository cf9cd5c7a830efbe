use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use braid_engine::EngineError;
use braid_ids::IdError;
use braid_persist::PersistError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Id error: {0}")]
    Ids(#[from] IdError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized | ApiError::Engine(EngineError::Unauthorized) => {
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Ids(ref e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Engine(EngineError::InvalidTrigger(ref msg)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, format!("Invalid trigger: {}", msg))
            }
            ApiError::Engine(EngineError::InvalidId(ref e)) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            ApiError::Engine(EngineError::Store(PersistError::ThreadNotFound(ref id))) => {
                (StatusCode::NOT_FOUND, format!("Thread not found: {}", id))
            }
            ApiError::Engine(EngineError::Store(PersistError::MessageNotFound(ref id))) => {
                (StatusCode::NOT_FOUND, format!("Message not found: {}", id))
            }
            ApiError::Engine(ref e) => {
                tracing::error!("Engine error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Processing error".to_string())
            }
            ApiError::Internal(ref e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_of(ApiError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(ApiError::Engine(EngineError::Unauthorized)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(ApiError::Engine(EngineError::InvalidTrigger(
                "regenerate without target".to_string()
            ))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(ApiError::Engine(EngineError::Store(
                PersistError::ThreadNotFound("t1".to_string())
            ))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::Ids(IdError::TooManyRequested {
                requested: 9,
                max: 3
            })),
            StatusCode::BAD_REQUEST
        );
    }
}
