mod common;

use common::{spawn, spawn_with_api_key, user_model};
use lmr_domain::model::Recipe;
use serde_json::json;

/// S1-style scenario: a cold load followed by a chat request brings the
/// model up and the health endpoint reflects it as loaded.
#[tokio::test]
async fn cold_load_then_chat_reports_model_loaded() {
    let server = spawn(vec![user_model("user.m1", Recipe::Llamacpp)]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/chat/completions", server.base_url))
        .json(&json!({
            "model": "user.m1",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let health: serde_json::Value = client
        .get(format!("{}/api/v1/health", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health["model_loaded"], json!(true));
    let loaded: Vec<&str> = health["all_models_loaded"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["model_name"].as_str().unwrap())
        .collect();
    assert_eq!(loaded, vec!["user.m1"]);
}

#[tokio::test]
async fn both_api_versions_route_chat_completions() {
    let server = spawn(vec![user_model("user.m1", Recipe::Llamacpp)]).await;
    let client = reqwest::Client::new();

    for version in ["v0", "v1"] {
        let resp = client
            .post(format!("{}/api/{version}/chat/completions", server.base_url))
            .json(&json!({"model": "user.m1", "messages": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "version {version}");
    }
}

#[tokio::test]
async fn unknown_model_returns_not_found() {
    let server = spawn(vec![]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/chat/completions", server.base_url))
        .json(&json!({"model": "user.missing", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "not_found");
}

#[tokio::test]
async fn missing_model_field_is_bad_request() {
    let server = spawn(vec![]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/chat/completions", server.base_url))
        .json(&json!({"messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

/// `FakeAdapter::path_for` has no mapping for the Responses operation (it
/// cannot emulate an SSE chat-completions stream to re-frame), so it should
/// surface as an unsupported-operation 400 rather than a panic or 500. The
/// real Completion-capable adapters (llamacpp/flm/ryzenai-llm) do map
/// Responses onto their chat-completions endpoint and re-frame the stream;
/// see `lmr_gateway::forward::forward_responses_sse` and its unit tests.
#[tokio::test]
async fn unsupported_operation_surfaces_as_bad_request() {
    let server = spawn(vec![user_model("user.m1", Recipe::Llamacpp)]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/responses", server.base_url))
        .json(&json!({"model": "user.m1", "input": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "unsupported_operation");
}

#[tokio::test]
async fn embeddings_and_reranking_forward_through() {
    let server = spawn(vec![user_model("user.m1", Recipe::Llamacpp)]).await;
    let client = reqwest::Client::new();

    let embed = client
        .post(format!("{}/api/v1/embeddings", server.base_url))
        .json(&json!({"model": "user.m1", "input": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(embed.status(), 200);

    let rerank = client
        .post(format!("{}/api/v1/reranking", server.base_url))
        .json(&json!({"model": "user.m1", "query": "q", "documents": ["a", "b"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(rerank.status(), 200);
}

#[tokio::test]
async fn models_list_and_get_reflect_registry() {
    let server = spawn(vec![user_model("user.m1", Recipe::Llamacpp)]).await;
    let client = reqwest::Client::new();

    let list: serde_json::Value = client
        .get(format!("{}/api/v1/models", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = list["data"].as_array().unwrap().iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"user.m1"));

    let got: serde_json::Value = client
        .get(format!("{}/api/v1/models/user.m1", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(got["id"], json!("user.m1"));
    assert_eq!(got["recipe"], json!("llamacpp"));

    let missing = client
        .get(format!("{}/api/v1/models/user.nope", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn live_and_health_need_no_auth_even_with_api_key() {
    // live/health sit in the public router, outside `require_api_token`.
    let server = spawn_with_api_key(vec![], Some("s3cret")).await;
    let client = reqwest::Client::new();

    let live = client.get(format!("{}/live", server.base_url)).send().await.unwrap();
    assert_eq!(live.status(), 200);

    let health = client.get(format!("{}/api/v1/health", server.base_url)).send().await.unwrap();
    assert_eq!(health.status(), 200);
}

#[tokio::test]
async fn protected_routes_reject_missing_or_wrong_token() {
    let server = spawn_with_api_key(vec![user_model("user.m1", Recipe::Llamacpp)], Some("s3cret")).await;
    let client = reqwest::Client::new();

    let no_token = client
        .get(format!("{}/api/v1/models", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(no_token.status(), 401);

    let wrong_token = client
        .get(format!("{}/api/v1/models", server.base_url))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_token.status(), 401);

    let right_token = client
        .get(format!("{}/api/v1/models", server.base_url))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(right_token.status(), 200);
}

#[tokio::test]
async fn stats_reflects_last_forwarded_request() {
    let server = spawn(vec![user_model("user.m1", Recipe::Llamacpp)]).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/v1/chat/completions", server.base_url))
        .json(&json!({"model": "user.m1", "messages": []}))
        .send()
        .await
        .unwrap();

    let stats: serde_json::Value = client
        .get(format!("{}/api/v1/stats", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["model"], json!("user.m1"));
    assert_eq!(stats["operation"], json!("chat_completion"));
    assert_eq!(stats["status"], json!(200));
}

#[tokio::test]
async fn system_info_lists_all_recipes() {
    let server = spawn(vec![]).await;
    let client = reqwest::Client::new();

    let info: serde_json::Value = client
        .get(format!("{}/api/v1/system-info", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["backends"].as_array().unwrap().len(), 6);
    assert!(info["os"].is_string());
}

// ── Lifecycle: pull / load / unload / delete ──────────────────────────

#[tokio::test]
async fn pull_rejects_gguf_checkpoint_missing_variant() {
    let server = spawn(vec![]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/pull", server.base_url))
        .json(&json!({
            "model_name": "user.needs-variant",
            "checkpoint": "org/model",
            "recipe": "llamacpp",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn pull_non_stream_registers_model() {
    let server = spawn(vec![]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/pull", server.base_url))
        .json(&json!({
            "model_name": "user.local",
            "checkpoint": "/dev/null",
            "recipe": "llamacpp",
            "local_import": true,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], json!("complete"));

    assert!(server.registry.get("user.local").is_ok());
}

/// S6-style scenario: SSE progress frames end with a single `complete`
/// event, and the model is queryable afterwards.
#[tokio::test]
async fn pull_stream_emits_progress_then_complete() {
    let server = spawn(vec![]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/pull", server.base_url))
        .json(&json!({
            "model_name": "user.streamed",
            "checkpoint": "/dev/null",
            "recipe": "llamacpp",
            "local_import": true,
            "stream": true,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body = resp.text().await.unwrap();
    let progress_count = body.matches("event: progress").count();
    assert!(progress_count >= 1, "expected at least one progress frame, got body: {body}");
    assert_eq!(body.matches("event: complete").count(), 1);

    let list: serde_json::Value = client
        .get(format!("{}/api/v1/models", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = list["data"].as_array().unwrap().iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"user.streamed"));
}

#[tokio::test]
async fn pull_requires_user_namespace() {
    let server = spawn(vec![]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/pull", server.base_url))
        .json(&json!({
            "model_name": "not-user-namespaced",
            "checkpoint": "org/model:Q4",
            "recipe": "llamacpp",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn load_then_unload_round_trip() {
    let server = spawn(vec![user_model("user.m1", Recipe::Llamacpp)]).await;
    let client = reqwest::Client::new();

    let load = client
        .post(format!("{}/api/v1/load", server.base_url))
        .json(&json!({"model_name": "user.m1", "ctx_size": 4096}))
        .send()
        .await
        .unwrap();
    assert_eq!(load.status(), 200);
    assert_eq!(server.cache.snapshot_all().len(), 1);

    let unload = client
        .post(format!("{}/api/v1/unload", server.base_url))
        .json(&json!({"model_name": "user.m1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unload.status(), 200);
    assert_eq!(server.cache.snapshot_all().len(), 0);
}

#[tokio::test]
async fn unload_with_no_body_evicts_everything() {
    let server = spawn(vec![
        user_model("user.m1", Recipe::Llamacpp),
        user_model("user.m2", Recipe::Whispercpp),
    ])
    .await;
    let client = reqwest::Client::new();

    server.cache.warm("user.m1", Default::default()).await.unwrap();
    server.cache.warm("user.m2", Default::default()).await.unwrap();
    assert_eq!(server.cache.snapshot_all().len(), 2);

    let resp = client.post(format!("{}/api/v1/unload", server.base_url)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(server.cache.snapshot_all().len(), 0);
}

// ── Media endpoints ────────────────────────────────────────────────────

#[tokio::test]
async fn audio_transcription_forwards_multipart_upload() {
    let server = spawn(vec![user_model("user.whisper", Recipe::Whispercpp)]).await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new()
        .text("model", "user.whisper")
        .part("file", reqwest::multipart::Part::bytes(vec![0u8; 16]).file_name("clip.wav"));

    let resp = client
        .post(format!("{}/api/v1/audio/transcriptions", server.base_url))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn audio_transcription_without_model_field_is_bad_request() {
    let server = spawn(vec![]).await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new()
        .part("file", reqwest::multipart::Part::bytes(vec![0u8; 4]).file_name("clip.wav"));

    let resp = client
        .post(format!("{}/api/v1/audio/transcriptions", server.base_url))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn audio_speech_non_chunked_forwards_unary() {
    let server = spawn(vec![user_model("user.kokoro", Recipe::Kokoro)]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/audio/speech", server.base_url))
        .json(&json!({"model": "user.kokoro", "input": "hello there"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn images_generations_forwards_unary() {
    let server = spawn(vec![user_model("user.sd", Recipe::SdCpp)]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/images/generations", server.base_url))
        .json(&json!({"model": "user.sd", "prompt": "a cat"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn delete_removes_registry_entry() {
    let server = spawn(vec![user_model("user.m1", Recipe::Llamacpp)]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/v1/delete", server.base_url))
        .json(&json!({"model_name": "user.m1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(server.registry.get("user.m1").is_err());
}
