//! Shared harness for gateway integration tests: boots the real router
//! (`lmr_gateway::api::router`) against a `LoadCoordinator` wired to
//! `FakeAdapter` instead of real engine binaries, bound to an ephemeral
//! port on loopback and driven over plain HTTP with `reqwest`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use lmr_adapters::{BackendAdapter, BackendKind, FakeAdapter};
use lmr_cache::LoadCoordinator;
use lmr_domain::config::Config;
use lmr_domain::model::{ModelInfo, Recipe};
use lmr_gateway::state::AppState;
use lmr_registry::ModelRegistry;
use sha2::Digest;

pub struct TestServer {
    pub base_url: String,
    pub cache: Arc<LoadCoordinator>,
    pub registry: Arc<ModelRegistry>,
    _state_dir: tempfile::TempDir,
}

fn kind_for(recipe: Recipe) -> BackendKind {
    match recipe {
        Recipe::Llamacpp => BackendKind::Llamacpp,
        Recipe::Flm => BackendKind::Flm,
        Recipe::RyzenaiLlm => BackendKind::RyzenaiLlm,
        Recipe::Whispercpp => BackendKind::Whispercpp,
        Recipe::SdCpp => BackendKind::SdCpp,
        Recipe::Kokoro => BackendKind::Kokoro,
    }
}

pub fn user_model(id: &str, recipe: Recipe) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        checkpoint: "org/model:Q4".to_string(),
        recipe,
        labels: vec![],
        size_gb: 0.1,
        downloaded: true,
        suggested: false,
        mmproj: None,
        image_defaults: None,
        paths: Default::default(),
    }
}

/// Boots a full router instance with no API key configured (auth disabled)
/// and the given models pre-registered under the `user.` namespace.
pub async fn spawn(models: Vec<ModelInfo>) -> TestServer {
    spawn_with_api_key(models, None).await
}

/// Like [`spawn`], but with an API bearer token configured, exercising the
/// `require_api_token` middleware the same way a real deployment would.
pub async fn spawn_with_api_key(models: Vec<ModelInfo>, api_key: Option<&str>) -> TestServer {
    let state_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.cache.state_dir = state_dir.path().to_path_buf();
    config.cache.max_loaded_models = -1;
    config.server.api_key = api_key.map(str::to_string);
    let config = Arc::new(config);

    let (user_models_path, recipe_options_path) = lmr_registry::default_paths(&config.cache.state_dir);
    let registry = Arc::new(
        ModelRegistry::load(user_models_path, recipe_options_path, config.cache.extra_models_dir.clone())
            .await
            .unwrap(),
    );
    for model in models {
        registry.register_user(model).await.unwrap();
    }

    let adapter_factory: lmr_cache::AdapterFactory = Arc::new(|recipe, _root: &std::path::Path| -> Arc<dyn BackendAdapter> {
        Arc::new(FakeAdapter::new(kind_for(recipe)))
    });
    let cache = LoadCoordinator::with_adapter_factory(
        registry.clone(),
        (*config).clone(),
        config.cache.state_dir.clone(),
        adapter_factory,
    );

    let http_client = reqwest::Client::builder().build().unwrap();
    let api_token_hash: Option<Arc<[u8]>> = config
        .server
        .api_key
        .as_ref()
        .map(|token| Arc::from(sha2::Sha256::digest(token.as_bytes()).to_vec().into_boxed_slice()));
    let state = AppState {
        config: config.clone(),
        registry: registry.clone(),
        cache: cache.clone(),
        http_client,
        api_token_hash,
        stats: Arc::new(parking_lot::Mutex::new(None)),
        started_at: Instant::now(),
    };

    let app = lmr_gateway::api::router(state.clone()).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        cache,
        registry,
        _state_dir: state_dir,
    }
}

#[allow(dead_code)]
pub fn state_dir_path(server: &TestServer) -> PathBuf {
    server._state_dir.path().to_path_buf()
}
