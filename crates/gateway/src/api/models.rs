//! The router's own endpoints: catalog listing, health, stats, and the
//! system/liveness probes. Unlike `chat`/`media`, these never forward
//! anywhere; they assemble their response straight from the registry and
//! the load coordinator's snapshot.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use lmr_domain::model::Recipe;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    show_all: bool,
}

pub async fn list_models(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Json<Value> {
    let data: Vec<Value> = state
        .registry
        .list(q.show_all)
        .into_iter()
        .map(|m| {
            json!({
                "id": m.id,
                "object": "model",
                "checkpoint": m.checkpoint,
                "recipe": m.recipe.as_str(),
                "labels": m.labels,
                "size_gb": m.size_gb,
                "downloaded": m.downloaded,
                "suggested": m.suggested,
            })
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}

pub async fn get_model(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let m = state.registry.get(&id)?;
    Ok(Json(json!({
        "id": m.id,
        "object": "model",
        "checkpoint": m.checkpoint,
        "recipe": m.recipe.as_str(),
        "labels": m.labels,
        "size_gb": m.size_gb,
        "downloaded": m.downloaded,
        "suggested": m.suggested,
    })))
}

/// `recipe ∈ {flm, ryzenai-llm}`, or whispercpp pinned to the npu backend,
/// ties up the exclusive NPU device; everything else runs on cpu/gpu.
fn device_for(recipe: Recipe, whispercpp_backend: Option<&str>) -> &'static str {
    if recipe.is_npu_only() {
        "npu"
    } else if recipe == Recipe::Whispercpp && whispercpp_backend == Some("npu") {
        "npu"
    } else {
        "cpu"
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let loaded = state.cache.snapshot_all();

    let all_models_loaded: Vec<Value> = loaded
        .iter()
        .map(|info| {
            let checkpoint = state
                .registry
                .get(&info.model_id)
                .map(|m| m.checkpoint)
                .unwrap_or_default();
            json!({
                "model_name": info.model_id,
                "checkpoint": checkpoint,
                "last_use": info.last_use_epoch_ms,
                "type": info.model_type.as_str(),
                "device": device_for(info.recipe, info.recipe_options.whispercpp_backend.as_deref()),
                "recipe": info.recipe.as_str(),
                "recipe_options": info.recipe_options,
                "backend_url": format!("http://127.0.0.1:{}", info.port),
            })
        })
        .collect();

    let max_models = state.config.cache.max_loaded_models;

    Json(json!({
        "status": "ok",
        "model_loaded": !all_models_loaded.is_empty(),
        "all_models_loaded": all_models_loaded,
        "max_models": {
            "llm": max_models,
            "embedding": max_models,
            "reranking": max_models,
            "audio": max_models,
            "image": max_models,
        },
    }))
}

pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    match state.stats.lock().clone() {
        Some(s) => Json(json!({
            "model": s.model_id,
            "operation": s.operation,
            "streaming": s.streaming,
            "status": s.status,
            "duration_ms": s.duration_ms,
        })),
        None => Json(json!({"model": null, "operation": null, "streaming": null, "status": null, "duration_ms": null})),
    }
}

#[derive(Serialize)]
struct BackendStatus {
    recipe: &'static str,
    installed: bool,
}

pub async fn system_info(State(state): State<AppState>) -> Json<Value> {
    let cpu_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

    let backends: Vec<BackendStatus> = [
        Recipe::Llamacpp,
        Recipe::Flm,
        Recipe::RyzenaiLlm,
        Recipe::Whispercpp,
        Recipe::SdCpp,
        Recipe::Kokoro,
    ]
    .into_iter()
    .map(|recipe| BackendStatus {
        recipe: recipe.as_str(),
        installed: state.config.backend_paths.contains_key(recipe.as_str()),
    })
    .collect();

    Json(json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpu_count": cpu_count,
        "backends": backends,
    }))
}

pub async fn live() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
