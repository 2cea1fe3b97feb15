//! Request forwarding: acquires a loaded instance from the Load Coordinator,
//! resolves the adapter's path for the logical operation, and proxies the
//! request to the child. Unary requests are forwarded and returned as a
//! single response; streaming requests are re-framed as SSE, one `data:`
//! payload at a time, passed through verbatim rather than re-synthesized.

use std::time::Instant;

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde_json::Value;

use lmr_domain::capability::Operation;
use lmr_domain::error::Error;
use lmr_domain::model::RecipeOptions;
use lmr_domain::trace::TraceEvent;

use crate::error::{sse_error_frame, ApiError};
use crate::state::{AppState, RequestStats};

pub fn operation_name(op: Operation) -> &'static str {
    match op {
        Operation::ChatCompletion => "chat_completion",
        Operation::Completion => "completion",
        Operation::Responses => "responses",
        Operation::Embeddings => "embeddings",
        Operation::Reranking => "reranking",
        Operation::AudioTranscriptions => "audio_transcriptions",
        Operation::AudioSpeech => "audio_speech",
        Operation::ImagesGenerations => "images_generations",
    }
}

fn upstream_error(url: &str, what: &str, err: impl std::fmt::Display) -> Error {
    Error::UpstreamError {
        message: format!("{what} {url}: {err}"),
        status: 502,
        model_invalidated: false,
    }
}

/// Forwards `body` as a single JSON POST and returns the child's response
/// unchanged (status, content-type, body bytes).
pub async fn forward_unary_json(
    state: &AppState,
    model_id: &str,
    op: Operation,
    mut body: Value,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let (instance, _release) = state.cache.acquire(model_id, RecipeOptions::default()).await?;

    let path = instance.adapter.path_for(op).ok_or_else(|| {
        Error::UnsupportedOperation(format!(
            "{} does not support {}",
            instance.recipe.as_str(),
            operation_name(op)
        ))
    })?;
    instance
        .adapter
        .transform_request_body(op, &mut body, &instance.recipe_options)?;

    let url = format!("{}{}", instance.backend_url, path);
    let resp = state
        .http_client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| upstream_error(&url, "forwarding to", e))?;

    let status = resp.status();
    let content_type = resp
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .cloned();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| upstream_error(&url, "reading response from", e))?;

    record(state, model_id, op, false, status.as_u16(), started);

    let mut builder = Response::builder().status(status.as_u16());
    if let Some(ct) = content_type {
        builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
    }
    Ok(builder
        .body(axum::body::Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()))
}

/// Forwards a raw (non-JSON) body, e.g. a multipart transcription upload,
/// passing the response bytes and content-type through unchanged.
pub async fn forward_raw(
    state: &AppState,
    model_id: &str,
    op: Operation,
    content_type: Option<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let (instance, _release) = state.cache.acquire(model_id, RecipeOptions::default()).await?;

    let path = instance.adapter.path_for(op).ok_or_else(|| {
        Error::UnsupportedOperation(format!(
            "{} does not support {}",
            instance.recipe.as_str(),
            operation_name(op)
        ))
    })?;
    let url = format!("{}{}", instance.backend_url, path);

    let mut req = state.http_client.post(&url).body(body);
    if let Some(ct) = content_type {
        req = req.header(axum::http::header::CONTENT_TYPE, ct);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| upstream_error(&url, "forwarding to", e))?;

    let status = resp.status();
    let out_content_type = resp
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .cloned();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| upstream_error(&url, "reading response from", e))?;

    record(state, model_id, op, false, status.as_u16(), started);

    let mut builder = Response::builder().status(status.as_u16());
    if let Some(ct) = out_content_type {
        builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
    }
    Ok(builder
        .body(axum::body::Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()))
}

/// Forwards a multipart upload (audio transcription), passing the response
/// bytes and content-type through unchanged.
pub async fn forward_multipart(
    state: &AppState,
    model_id: &str,
    op: Operation,
    form: reqwest::multipart::Form,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let (instance, _release) = state.cache.acquire(model_id, RecipeOptions::default()).await?;

    let path = instance.adapter.path_for(op).ok_or_else(|| {
        Error::UnsupportedOperation(format!(
            "{} does not support {}",
            instance.recipe.as_str(),
            operation_name(op)
        ))
    })?;
    let url = format!("{}{}", instance.backend_url, path);

    let resp = state
        .http_client
        .post(&url)
        .multipart(form)
        .send()
        .await
        .map_err(|e| upstream_error(&url, "forwarding to", e))?;

    let status = resp.status();
    let content_type = resp
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .cloned();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| upstream_error(&url, "reading response from", e))?;

    record(state, model_id, op, false, status.as_u16(), started);

    let mut builder = Response::builder().status(status.as_u16());
    if let Some(ct) = content_type {
        builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
    }
    Ok(builder
        .body(axum::body::Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()))
}

/// Forwards `body` as JSON and streams the raw response bytes straight
/// through with no re-framing, for chunked binary responses such as
/// `stream_format=audio` speech synthesis.
pub async fn forward_binary_stream(
    state: &AppState,
    model_id: &str,
    op: Operation,
    mut body: Value,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let (instance, release) = state.cache.acquire(model_id, RecipeOptions::default()).await?;

    let path = instance.adapter.path_for(op).ok_or_else(|| {
        Error::UnsupportedOperation(format!(
            "{} does not support {}",
            instance.recipe.as_str(),
            operation_name(op)
        ))
    })?;
    instance
        .adapter
        .transform_request_body(op, &mut body, &instance.recipe_options)?;
    let url = format!("{}{}", instance.backend_url, path);

    let resp = state
        .http_client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| upstream_error(&url, "forwarding to", e))?;
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .cloned();
    record(state, model_id, op, true, status.as_u16(), started);

    let model_id_owned = model_id.to_string();
    let byte_stream = async_stream::stream! {
        let _release = release;
        let mut upstream = resp.bytes_stream();
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => yield Ok(bytes),
                Err(e) => {
                    tracing::warn!(model_id = %model_id_owned, error = %e, "binary stream broke mid-response");
                    yield Err(std::io::Error::new(std::io::ErrorKind::Other, e));
                    break;
                }
            }
        }
    };

    let mut builder = Response::builder().status(status.as_u16());
    if let Some(ct) = content_type {
        builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
    }
    Ok(builder
        .body(axum::body::Body::from_stream(byte_stream))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()))
}

/// Drops not-completed-normally tracking: emits `Cancelled` if the stream is
/// torn down (client disconnect) before `mark_done` runs.
struct StreamGuard {
    model_id: String,
    operation: &'static str,
    done: bool,
}

impl StreamGuard {
    fn mark_done(&mut self) {
        self.done = true;
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.done {
            TraceEvent::Cancelled {
                model_id: self.model_id.clone(),
                operation: self.operation.to_string(),
            }
            .emit();
        }
    }
}

/// Forwards `body` and re-frames the child's SSE response one `data:`
/// payload at a time. Holds the instance's acquire guard for the lifetime of
/// the stream so it cannot be evicted mid-response (see S5 in the scenario
/// suite). A connection error mid-stream tears the instance down rather than
/// leaving a half-dead process registered.
pub async fn forward_streaming_sse(
    state: &AppState,
    model_id: String,
    op: Operation,
    mut body: Value,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let (instance, release) = state.cache.acquire(&model_id, RecipeOptions::default()).await?;

    let path = instance.adapter.path_for(op).ok_or_else(|| {
        Error::UnsupportedOperation(format!(
            "{} does not support {}",
            instance.recipe.as_str(),
            operation_name(op)
        ))
    })?;
    instance
        .adapter
        .transform_request_body(op, &mut body, &instance.recipe_options)?;
    let url = format!("{}{}", instance.backend_url, path);

    let cache = state.cache.clone();
    let client = state.http_client.clone();
    let op_name = operation_name(op);
    let stats_model_id = model_id.clone();
    let state = state.clone();

    let stream = async_stream::stream! {
        let release = release;
        let mut guard = StreamGuard { model_id: model_id.clone(), operation: op_name, done: false };

        let resp = match client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                guard.mark_done();
                let err = upstream_error(&url, "forwarding to", e);
                yield Ok::<_, std::convert::Infallible>(Event::default().event("error").data(sse_error_frame(&err)));
                record(&state, &stats_model_id, op, true, 502, started);
                return;
            }
        };

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            guard.mark_done();
            let err = Error::UpstreamError { message, status, model_invalidated: false };
            yield Ok(Event::default().event("error").data(sse_error_frame(&err)));
            record(&state, &stats_model_id, op, true, status, started);
            return;
        }

        let mut byte_stream = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        let mut broke = false;

        'outer: while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    broke = true;
                    let err = upstream_error(&url, "stream from", e);
                    yield Ok(Event::default().event("error").data(sse_error_frame(&err)));
                    break;
                }
            };
            buf.extend_from_slice(&chunk);

            while let Some(end) = find_frame_end(&buf) {
                let frame: Vec<u8> = buf.drain(..end).collect();
                if let Some(data) = extract_data(&frame) {
                    let is_done = data.trim() == "[DONE]";
                    yield Ok(Event::default().data(data));
                    if is_done {
                        break 'outer;
                    }
                }
            }
        }

        guard.mark_done();
        drop(release);
        if broke {
            tracing::warn!(model_id = %stats_model_id, "upstream connection broke mid-stream, tearing down instance");
            let _ = cache.unload(Some(&stats_model_id)).await;
        }
        record(&state, &stats_model_id, op, true, 200, started);
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}

/// Forwards a non-streaming `/api/v1/responses` request to the backend's
/// chat-completions endpoint and wraps the reply in a minimal Responses
/// envelope, since none of the Completion-capable backends expose a native
/// Responses endpoint of their own.
pub async fn forward_responses_unary(
    state: &AppState,
    model_id: &str,
    mut body: Value,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let (instance, _release) = state.cache.acquire(model_id, RecipeOptions::default()).await?;

    let path = instance.adapter.path_for(Operation::Responses).ok_or_else(|| {
        Error::UnsupportedOperation(format!(
            "{} does not support {}",
            instance.recipe.as_str(),
            operation_name(Operation::Responses)
        ))
    })?;
    instance
        .adapter
        .transform_request_body(Operation::Responses, &mut body, &instance.recipe_options)?;

    let url = format!("{}{}", instance.backend_url, path);
    let resp = state
        .http_client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| upstream_error(&url, "forwarding to", e))?;

    let status = resp.status();
    record(state, model_id, Operation::Responses, false, status.as_u16(), started);

    if !status.is_success() {
        let bytes = resp.bytes().await.unwrap_or_default();
        return Ok(Response::builder()
            .status(status.as_u16())
            .body(axum::body::Body::from(bytes))
            .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()));
    }

    let chat: Value = resp
        .json()
        .await
        .map_err(|e| upstream_error(&url, "reading response from", e))?;
    let output_text = chat_message_content(&chat).unwrap_or_default();

    let envelope = serde_json::json!({
        "id": format!("resp_{}", uuid::Uuid::new_v4().simple()),
        "status": "completed",
        "output_text": output_text,
    });
    Ok(axum::Json(envelope).into_response())
}

/// Forwards a streaming `/api/v1/responses` request to the backend's
/// chat-completions endpoint and re-frames the `chat.completion.chunk` SSE
/// stream into the OpenAI Responses event subset: one `response.created`
/// event, one `response.output_text.delta` event per non-empty content
/// delta, and a closing `response.completed` event.
pub async fn forward_responses_sse(
    state: &AppState,
    model_id: String,
    mut body: Value,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let (instance, release) = state.cache.acquire(&model_id, RecipeOptions::default()).await?;

    let path = instance.adapter.path_for(Operation::Responses).ok_or_else(|| {
        Error::UnsupportedOperation(format!(
            "{} does not support {}",
            instance.recipe.as_str(),
            operation_name(Operation::Responses)
        ))
    })?;
    instance
        .adapter
        .transform_request_body(Operation::Responses, &mut body, &instance.recipe_options)?;
    let url = format!("{}{}", instance.backend_url, path);

    let cache = state.cache.clone();
    let client = state.http_client.clone();
    let response_id = format!("resp_{}", uuid::Uuid::new_v4().simple());
    let stats_model_id = model_id.clone();
    let state = state.clone();

    let stream = async_stream::stream! {
        let release = release;
        let mut guard = StreamGuard { model_id: model_id.clone(), operation: "responses", done: false };

        let resp = match client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                guard.mark_done();
                let err = upstream_error(&url, "forwarding to", e);
                yield Ok::<_, std::convert::Infallible>(Event::default().event("error").data(sse_error_frame(&err)));
                record(&state, &stats_model_id, Operation::Responses, true, 502, started);
                return;
            }
        };

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            guard.mark_done();
            let err = Error::UpstreamError { message, status, model_invalidated: false };
            yield Ok(Event::default().event("error").data(sse_error_frame(&err)));
            record(&state, &stats_model_id, Operation::Responses, true, status, started);
            return;
        }

        yield Ok(Event::default().event("response.created").data(
            serde_json::json!({"type": "response.created", "response": {"id": response_id, "status": "in_progress"}}).to_string(),
        ));

        let mut byte_stream = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        let mut broke = false;

        'outer: while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    broke = true;
                    let err = upstream_error(&url, "stream from", e);
                    yield Ok(Event::default().event("error").data(sse_error_frame(&err)));
                    break;
                }
            };
            buf.extend_from_slice(&chunk);

            while let Some(end) = find_frame_end(&buf) {
                let frame: Vec<u8> = buf.drain(..end).collect();
                let Some(data) = extract_data(&frame) else { continue };
                if data.trim() == "[DONE]" {
                    break 'outer;
                }
                if let Some(delta) = extract_chat_delta(&data) {
                    if !delta.is_empty() {
                        yield Ok(Event::default().event("response.output_text.delta").data(
                            serde_json::json!({"type": "response.output_text.delta", "delta": delta}).to_string(),
                        ));
                    }
                }
            }
        }

        guard.mark_done();
        if !broke {
            yield Ok(Event::default().event("response.completed").data(
                serde_json::json!({
                    "type": "response.completed",
                    "response": {"id": response_id, "status": "completed"},
                }).to_string(),
            ));
        }
        drop(release);
        if broke {
            tracing::warn!(model_id = %stats_model_id, "upstream connection broke mid-stream, tearing down instance");
            let _ = cache.unload(Some(&stats_model_id)).await;
        }
        record(&state, &stats_model_id, Operation::Responses, true, 200, started);
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}

/// Extracts `choices[0].message.content` from a unary chat-completions body.
fn chat_message_content(chat: &Value) -> Option<String> {
    chat.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

/// Extracts `choices[0].delta.content` from a `chat.completion.chunk` SSE
/// payload.
fn extract_chat_delta(data: &str) -> Option<String> {
    let value: Value = serde_json::from_str(data).ok()?;
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

fn record(state: &AppState, model_id: &str, op: Operation, streaming: bool, status: u16, started: Instant) {
    let duration_ms = started.elapsed().as_millis() as u64;
    TraceEvent::RequestForwarded {
        model_id: model_id.to_string(),
        operation: operation_name(op).to_string(),
        streaming,
        status,
        duration_ms,
    }
    .emit();
    state.record_forward(RequestStats {
        model_id: model_id.to_string(),
        operation: operation_name(op).to_string(),
        streaming,
        status,
        duration_ms,
    });
}

/// Finds the end of the next SSE frame (`\n\n` or `\r\n\r\n`), returning the
/// byte offset just past the separator.
fn find_frame_end(buf: &[u8]) -> Option<usize> {
    for i in 0..buf.len() {
        if buf[i..].starts_with(b"\r\n\r\n") {
            return Some(i + 4);
        }
        if buf[i..].starts_with(b"\n\n") {
            return Some(i + 2);
        }
    }
    None
}

/// Joins every `data:` line in an SSE frame (multi-line payloads are legal
/// per the SSE spec), trimming the one-space prefix convention.
fn extract_data(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    let lines: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(|l| l.strip_prefix(' ').unwrap_or(l))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
