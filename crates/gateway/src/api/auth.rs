use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Gates every route in the `protected` router. A request with no
/// `Authorization: Bearer <token>` header (or a mismatching one) is
/// rejected; skipped entirely when no `api_key` is configured.
pub async fn require_api_token(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let expected_hash = match &state.api_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    let provided_hash = Sha256::digest(provided.as_bytes());

    if !bool::from(provided_hash.ct_eq(expected_hash.as_ref())) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "invalid or missing API token", "type": "unauthorized"}})),
        )
            .into_response();
    }

    next.run(req).await
}
