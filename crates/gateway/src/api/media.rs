//! Audio and image endpoints: transcription (multipart in, JSON out),
//! speech synthesis (JSON in, audio out, optionally chunked), and image
//! generation (JSON in, JSON out). Transcription is the only inbound
//! multipart surface; the upload is re-encoded into a `reqwest` multipart
//! form rather than streamed through, since the router needs the `model`
//! field before it knows which child to forward to.

use axum::extract::{Multipart, State};
use axum::response::Response;
use axum::Json;
use serde_json::Value;

use lmr_domain::capability::Operation;
use lmr_domain::error::Error;

use crate::error::ApiError;
use crate::forward::{forward_binary_stream, forward_multipart, forward_unary_json};
use crate::state::AppState;

pub async fn audio_transcriptions(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut model_id: Option<String> = None;
    let mut form = reqwest::multipart::Form::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::BadRequest(format!("invalid multipart field `{name}`: {e}")))?;

        if name == "model" {
            model_id = Some(String::from_utf8_lossy(&data).trim().to_string());
        }

        let mut part = reqwest::multipart::Part::bytes(data.to_vec());
        if let Some(fname) = file_name {
            part = part.file_name(fname);
        }
        if let Some(ct) = content_type {
            part = part.mime_str(&ct).unwrap_or(part);
        }
        form = form.part(name, part);
    }

    let model_id = model_id.ok_or_else(|| Error::BadRequest("missing required field `model`".into()))?;
    forward_multipart(&state, &model_id, Operation::AudioTranscriptions, form).await
}

fn extract_model(body: &Value) -> Result<String, ApiError> {
    body.get("model")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::BadRequest("missing required field `model`".into()).into())
}

pub async fn audio_speech(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    let model_id = extract_model(&body)?;
    let chunked = body
        .get("stream_format")
        .and_then(Value::as_str)
        .map(|f| f == "audio")
        .unwrap_or(false);

    if chunked {
        forward_binary_stream(&state, &model_id, Operation::AudioSpeech, body).await
    } else {
        forward_unary_json(&state, &model_id, Operation::AudioSpeech, body).await
    }
}

pub async fn images_generations(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    let model_id = extract_model(&body)?;
    forward_unary_json(&state, &model_id, Operation::ImagesGenerations, body).await
}
