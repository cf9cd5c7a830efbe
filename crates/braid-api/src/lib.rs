//! HTTP surface: chat completion, stream resume, signed-id issuance, thread
//! listing, health. Everything stateful lives in the engine and store crates;
//! this crate is routing, auth, config, and SSE plumbing.

pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use routes::{chat, health, ids, stream, threads};

pub fn router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Completion + streaming
        .route("/api/chat", post(chat::chat))
        .route("/api/chat/:thread_id/stream", get(stream::resume_stream))
        .route("/api/messages/:message_id/cancel", post(chat::cancel_message))
        // Signed ids
        .route("/api/ids", post(ids::issue_ids))
        // Threads
        .route("/api/threads", get(threads::list_threads))
        .route("/api/threads/:thread_id", patch(threads::rename_thread))
        .route("/api/threads/:thread_id/messages", get(threads::list_messages))
        // Health
        .route("/health", get(health::health_check));

    Router::new()
        .merge(api_routes)
        .layer(axum::middleware::from_fn(middleware::logging::log_request))
        .layer(TimeoutLayer::new(Duration::from_secs(300))) // 5 min for streaming
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.cors.enabled {
        let mut cors = CorsLayer::new()
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PATCH,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers(Any);

        if config.cors.origins.iter().any(|o| o == "*") {
            cors = cors.allow_origin(Any);
        } else {
            for origin in &config.cors.origins {
                if let Ok(parsed_origin) = origin.parse::<axum::http::HeaderValue>() {
                    cors = cors.allow_origin(parsed_origin);
                }
            }
        }

        cors
    } else {
        CorsLayer::permissive()
    }
}
