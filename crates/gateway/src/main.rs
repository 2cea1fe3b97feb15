use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use lmr_domain::config::{Config, ConfigSeverity};
use lmr_gateway::cli::{self, pid, Cli, Command, ConfigCommand};
use lmr_gateway::state::{AppState, RequestStats};
use lmr_gateway::api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => {
            init_tracing();
            let (config, _config_path) = cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Serve { host, port }) => {
            init_tracing();
            let (mut config, _config_path) = cli::load_config()?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(Arc::new(config)).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = cli::load_config()?;
            let passed = cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
        Some(Command::Load { model_name, ctx_size, save_options }) => {
            let (config, _) = cli::load_config()?;
            let (coordinator, _registry) = build_coordinator(Arc::new(config)).await?;
            coordinator
                .warm(&model_name, Command::load_options(ctx_size, save_options))
                .await?;
            println!("{model_name} loaded");
            Ok(())
        }
        Some(Command::Unload { model_name }) => {
            let (config, _) = cli::load_config()?;
            let (coordinator, _registry) = build_coordinator(Arc::new(config)).await?;
            coordinator.unload(model_name.as_deref()).await?;
            println!("{}", model_name.as_deref().unwrap_or("all models"));
            Ok(())
        }
        Some(Command::Pull { model_name, checkpoint, recipe }) => {
            let (config, _) = cli::load_config()?;
            let (_coordinator, registry) = build_coordinator(Arc::new(config)).await?;
            let recipe = match recipe.as_str() {
                "llamacpp" => lmr_domain::model::Recipe::Llamacpp,
                "flm" => lmr_domain::model::Recipe::Flm,
                "ryzenai-llm" => lmr_domain::model::Recipe::RyzenaiLlm,
                "whispercpp" => lmr_domain::model::Recipe::Whispercpp,
                "sd-cpp" => lmr_domain::model::Recipe::SdCpp,
                "kokoro" => lmr_domain::model::Recipe::Kokoro,
                other => anyhow::bail!("unrecognized recipe \"{other}\""),
            };
            let mut paths = std::collections::HashMap::new();
            paths.insert("main".to_string(), std::path::PathBuf::from(&checkpoint));
            registry
                .register_user(lmr_domain::model::ModelInfo {
                    id: model_name.clone(),
                    checkpoint,
                    recipe,
                    labels: vec![],
                    size_gb: 0.0,
                    downloaded: true,
                    suggested: false,
                    mmproj: None,
                    image_defaults: None,
                    paths,
                })
                .await?;
            println!("{model_name} registered");
            Ok(())
        }
        Some(Command::Delete { model_name }) => {
            let (config, _) = cli::load_config()?;
            let (_coordinator, registry) = build_coordinator(Arc::new(config)).await?;
            registry.delete(&model_name).await?;
            println!("{model_name} deleted");
            Ok(())
        }
        Some(Command::Version) => {
            println!("lemonade-router {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,lmr_gateway=debug")))
        .json()
        .init();
}

async fn build_coordinator(
    config: Arc<Config>,
) -> anyhow::Result<(Arc<lmr_cache::LoadCoordinator>, Arc<lmr_registry::ModelRegistry>)> {
    std::fs::create_dir_all(&config.cache.state_dir)
        .with_context(|| format!("creating state dir {}", config.cache.state_dir.display()))?;
    let (user_models_path, recipe_options_path) = lmr_registry::default_paths(&config.cache.state_dir);
    let registry = Arc::new(
        lmr_registry::ModelRegistry::load(user_models_path, recipe_options_path, config.cache.extra_models_dir.clone())
            .await
            .context("loading model registry")?,
    );
    let coordinator = lmr_cache::LoadCoordinator::new(registry.clone(), (*config).clone(), config.cache.state_dir.clone());
    Ok((coordinator, registry))
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("lemonade-router starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let (cache, registry) = build_coordinator(config.clone()).await?;

    let api_token_hash: Option<Arc<[u8]>> = config.server.api_key.as_ref().map(|token| {
        tracing::info!("API bearer-token auth enabled");
        Arc::from(Sha256::digest(token.as_bytes()).to_vec().into_boxed_slice())
    });
    if api_token_hash.is_none() {
        tracing::warn!("API bearer-token auth DISABLED — set server.api_key to enable");
    }

    let http_client = reqwest::Client::builder().build().context("building HTTP client")?;

    let state = AppState {
        config: config.clone(),
        registry,
        cache: cache.clone(),
        http_client,
        api_token_hash,
        stats: Arc::new(parking_lot::Mutex::new(None::<RequestStats>)),
        started_at: std::time::Instant::now(),
    };

    // ── Periodic reconciliation: reap instances whose process already
    // died outside an explicit eviction path. ────────────────────────
    {
        let cache = cache.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let reaped = cache.reap_dead().await;
                if !reaped.is_empty() {
                    tracing::info!(ids = ?reaped, "reaped dead instances");
                }
            }
        });
    }

    let pid_path = config.cache.state_dir.join("lemonade-router.pid");
    let pid_handle = pid::write_pid_file(&pid_path, config.server.port)?;

    let cors_layer = build_cors_layer(&config.server.cors);

    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "lemonade-router listening");

    axum::serve(listener, app).await.context("axum server error")?;

    pid::remove_pid_file(&pid_path, pid_handle);
    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins. Origins may
/// carry a trailing `:*` wildcard for the port segment, expanded into a
/// predicate matching any numeric port on that host. A literal `"*"`
/// allows all origins (incompatible with credentialed requests).
fn build_cors_layer(cors: &lmr_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
