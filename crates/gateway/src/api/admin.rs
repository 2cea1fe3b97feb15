//! Model lifecycle endpoints: pull (download weights, register), delete,
//! load (pre-warm), unload. The pull handler is the one place the gateway
//! itself performs a download rather than forwarding to a child; it treats
//! `checkpoint` as a direct URL, the same simplification
//! `lmr_adapters::install` makes for engine binaries.

use std::path::PathBuf;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use lmr_domain::error::Error;
use lmr_domain::model::{ImageDefaults, ModelInfo, Recipe, RecipeOptions};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    model_name: String,
    #[serde(default)]
    stream: bool,
    checkpoint: Option<String>,
    recipe: Option<String>,
    #[serde(default)]
    reasoning: bool,
    #[serde(default)]
    vision: bool,
    #[serde(default)]
    embedding: bool,
    #[serde(default)]
    reranking: bool,
    mmproj: Option<String>,
    #[serde(default)]
    local_import: bool,
}

fn parse_recipe(s: &str) -> Result<Recipe, Error> {
    match s {
        "llamacpp" => Ok(Recipe::Llamacpp),
        "flm" => Ok(Recipe::Flm),
        "ryzenai-llm" => Ok(Recipe::RyzenaiLlm),
        "whispercpp" => Ok(Recipe::Whispercpp),
        "sd-cpp" => Ok(Recipe::SdCpp),
        "kokoro" => Ok(Recipe::Kokoro),
        other => Err(Error::BadRequest(format!("unrecognized recipe \"{other}\""))),
    }
}

fn labels_for(req: &PullRequest) -> Vec<String> {
    let mut labels = Vec::new();
    if req.reasoning {
        labels.push("reasoning".to_string());
    }
    if req.vision {
        labels.push("vision".to_string());
    }
    if req.embedding {
        labels.push("embeddings".to_string());
    }
    if req.reranking {
        labels.push("reranking".to_string());
    }
    labels
}

fn model_dest(state_dir: &std::path::Path, model_name: &str) -> PathBuf {
    state_dir.join("models").join(model_name)
}

async fn download_to(url: &str, client: &reqwest::Client, dest: &PathBuf) -> Result<(), Error> {
    let parent = dest.parent().unwrap_or(dest);
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| Error::InstallFailed(format!("creating {}: {e}", parent.display())))?;

    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::InstallFailed(format!("downloading {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(Error::InstallFailed(format!("downloading {url}: HTTP {}", resp.status())));
    }
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| Error::InstallFailed(format!("reading download body from {url}: {e}")))?;

    let scratch = dest.with_extension("part");
    tokio::fs::write(&scratch, &bytes)
        .await
        .map_err(|e| Error::InstallFailed(format!("writing {}: {e}", scratch.display())))?;
    tokio::fs::rename(&scratch, dest)
        .await
        .map_err(|e| Error::InstallFailed(format!("installing {}: {e}", dest.display())))?;
    Ok(())
}

async fn register_pulled(state: &AppState, req: &PullRequest, checkpoint: String, recipe: Recipe) -> Result<(), Error> {
    let dest = model_dest(&state.config.cache.state_dir, &req.model_name);
    if !req.local_import {
        download_to(&checkpoint, &state.http_client, &dest).await?;
    }

    let mut paths = std::collections::HashMap::new();
    paths.insert("main".to_string(), dest);

    let image_defaults = matches!(recipe, Recipe::SdCpp).then(ImageDefaults::default);

    let info = ModelInfo {
        id: req.model_name.clone(),
        checkpoint,
        recipe,
        labels: labels_for(req),
        size_gb: 0.0,
        downloaded: true,
        suggested: false,
        mmproj: req.mmproj.clone(),
        image_defaults,
        paths,
    };
    state.registry.register_user(info).await
}

pub async fn pull(State(state): State<AppState>, Json(req): Json<PullRequest>) -> ApiResult<Response> {
    if !req.model_name.starts_with("user.") {
        return Err(Error::BadRequest(format!(
            "model_name must start with 'user.', got '{}'",
            req.model_name
        ))
        .into());
    }
    let checkpoint = req
        .checkpoint
        .clone()
        .ok_or_else(|| Error::BadRequest("missing required field `checkpoint`".into()))?;
    let recipe = parse_recipe(req.recipe.as_deref().unwrap_or("llamacpp"))?;
    if matches!(recipe, Recipe::Llamacpp) && !checkpoint.contains(':') && !req.local_import {
        return Err(Error::BadRequest(format!(
            "GGUF checkpoint \"{checkpoint}\" is missing a :variant suffix"
        ))
        .into());
    }

    if !req.stream {
        register_pulled(&state, &req, checkpoint, recipe).await?;
        return Ok(Json(json!({"model_name": req.model_name, "status": "complete"})).into_response());
    }

    let stream = async_stream::stream! {
        yield Ok::<_, std::convert::Infallible>(Event::default().event("progress").data(json!({"percent": 0}).to_string()));
        match register_pulled(&state, &req, checkpoint, recipe).await {
            Ok(()) => {
                yield Ok(Event::default().event("progress").data(json!({"percent": 100}).to_string()));
                yield Ok(Event::default().event("complete").data(json!({"model_name": req.model_name}).to_string()));
            }
            Err(e) => {
                yield Ok(Event::default().event("error").data(crate::error::sse_error_frame(&e)));
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    model_name: String,
}

pub async fn delete(State(state): State<AppState>, Json(req): Json<DeleteRequest>) -> ApiResult<Json<Value>> {
    state.registry.delete(&req.model_name).await?;
    let _ = state.cache.unload(Some(&req.model_name)).await;
    Ok(Json(json!({"model_name": req.model_name, "status": "deleted"})))
}

#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    model_name: String,
    #[serde(default)]
    save_options: bool,
    #[serde(default)]
    ctx_size: Option<u32>,
    #[serde(default)]
    llamacpp_backend: Option<String>,
    #[serde(default)]
    llamacpp_args: Option<String>,
    #[serde(default)]
    whispercpp_backend: Option<String>,
    #[serde(default)]
    sdcpp_backend: Option<String>,
    #[serde(default)]
    steps: Option<u32>,
    #[serde(default)]
    cfg_scale: Option<f32>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

impl From<LoadRequest> for RecipeOptions {
    fn from(r: LoadRequest) -> Self {
        RecipeOptions {
            ctx_size: r.ctx_size,
            llamacpp_backend: r.llamacpp_backend,
            llamacpp_args: r.llamacpp_args,
            whispercpp_backend: r.whispercpp_backend,
            sdcpp_backend: r.sdcpp_backend,
            steps: r.steps,
            cfg_scale: r.cfg_scale,
            width: r.width,
            height: r.height,
            save_options: r.save_options,
        }
    }
}

pub async fn load(State(state): State<AppState>, Json(req): Json<LoadRequest>) -> ApiResult<Json<Value>> {
    let model_name = req.model_name.clone();
    let options: RecipeOptions = req.into();
    state.cache.warm(&model_name, options).await?;
    Ok(Json(json!({"model_name": model_name, "status": "loaded"})))
}

#[derive(Debug, Deserialize, Default)]
pub struct UnloadRequest {
    model_name: Option<String>,
}

pub async fn unload(State(state): State<AppState>, body: Option<Json<UnloadRequest>>) -> ApiResult<Json<Value>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    state.cache.unload(req.model_name.as_deref()).await?;
    Ok(Json(json!({"status": "unloaded", "model_name": req.model_name})))
}
