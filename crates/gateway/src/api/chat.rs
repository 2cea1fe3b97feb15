//! OpenAI-compatible text endpoints: chat completions, completions,
//! responses, embeddings, and the llama.cpp-extension reranking endpoint.
//! Every handler's job is routing and streaming, not re-encoding: the
//! forwarded body is the child's own, byte for byte.

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde_json::Value;

use lmr_domain::capability::Operation;
use lmr_domain::error::Error;

use crate::error::ApiError;
use crate::forward::{forward_responses_sse, forward_responses_unary, forward_streaming_sse, forward_unary_json};
use crate::state::AppState;

fn extract_model(body: &Value) -> Result<String, ApiError> {
    body.get("model")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::BadRequest("missing required field `model`".into()).into())
}

fn wants_stream(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

pub async fn chat_completions(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    let model_id = extract_model(&body)?;
    if wants_stream(&body) {
        forward_streaming_sse(&state, model_id, Operation::ChatCompletion, body).await
    } else {
        forward_unary_json(&state, &model_id, Operation::ChatCompletion, body).await
    }
}

pub async fn completions(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    let model_id = extract_model(&body)?;
    if wants_stream(&body) {
        forward_streaming_sse(&state, model_id, Operation::Completion, body).await
    } else {
        forward_unary_json(&state, &model_id, Operation::Completion, body).await
    }
}

pub async fn responses(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    let model_id = extract_model(&body)?;
    if wants_stream(&body) {
        forward_responses_sse(&state, model_id, body).await
    } else {
        forward_responses_unary(&state, &model_id, body).await
    }
}

pub async fn embeddings(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    let model_id = extract_model(&body)?;
    forward_unary_json(&state, &model_id, Operation::Embeddings, body).await
}

pub async fn reranking(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    let model_id = extract_model(&body)?;
    forward_unary_json(&state, &model_id, Operation::Reranking, body).await
}
