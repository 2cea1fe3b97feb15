pub mod admin;
pub mod auth;
pub mod chat;
pub mod media;
pub mod models;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Builds the full API router: a small `public` surface that bypasses
/// bearer-token auth (liveness and health, so orchestrators and
/// dashboards can probe the router without a token), and a `protected`
/// surface carrying everything else behind
/// [`auth::require_api_token`].
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/live", get(models::live))
        .route("/api/v1/health", get(models::health));

    let protected = Router::new()
        .route("/api/v0/chat/completions", post(chat::chat_completions))
        .route("/api/v1/chat/completions", post(chat::chat_completions))
        .route("/api/v1/completions", post(chat::completions))
        .route("/api/v1/responses", post(chat::responses))
        .route("/api/v1/embeddings", post(chat::embeddings))
        .route("/api/v1/reranking", post(chat::reranking))
        .route("/api/v1/audio/transcriptions", post(media::audio_transcriptions))
        .route("/api/v1/audio/speech", post(media::audio_speech))
        .route("/api/v1/images/generations", post(media::images_generations))
        .route("/api/v1/models", get(models::list_models))
        .route("/api/v1/models/:id", get(models::get_model))
        .route("/api/v1/stats", get(models::stats))
        .route("/api/v1/system-info", get(models::system_info))
        .route("/api/v1/pull", post(admin::pull))
        .route("/api/v1/delete", post(admin::delete))
        .route("/api/v1/load", post(admin::load))
        .route("/api/v1/unload", post(admin::unload))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public.merge(protected)
}
