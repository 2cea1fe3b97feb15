pub mod config;
pub mod doctor;
pub mod pid;

use clap::{Parser, Subcommand};
use lmr_domain::model::RecipeOptions;

/// lemonade-router — a local inference control plane.
#[derive(Debug, Parser)]
#[command(name = "lemonade-router", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the router server (default when no subcommand is given).
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Pre-warm a model without issuing an inference request.
    Load {
        model_name: String,
        #[arg(long)]
        ctx_size: Option<u32>,
        #[arg(long)]
        save_options: bool,
    },
    /// Evict a loaded model, or every loaded model if none is given.
    Unload {
        model_name: Option<String>,
    },
    /// Download a model's weights and register it.
    Pull {
        model_name: String,
        #[arg(long)]
        checkpoint: String,
        #[arg(long, default_value = "llamacpp")]
        recipe: String,
    },
    /// Remove a registered model and its on-disk weights.
    Delete {
        model_name: String,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

impl Command {
    pub fn load_options(ctx_size: Option<u32>, save_options: bool) -> RecipeOptions {
        RecipeOptions {
            ctx_size,
            save_options,
            ..Default::default()
        }
    }
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path named by `LEMONADE_CONFIG` (or
/// `config.toml` by default), then overlay recognized `LEMONADE_*`
/// environment variables. Shared by `serve`, `doctor`, and `config` so
/// the precedence logic lives in one place.
pub fn load_config() -> anyhow::Result<(lmr_domain::config::Config, String)> {
    let config_path = std::env::var("LEMONADE_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let mut config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        lmr_domain::config::Config::default()
    };

    apply_env_overrides(&mut config);
    Ok((config, config_path))
}

fn apply_env_overrides(config: &mut lmr_domain::config::Config) {
    if let Ok(v) = std::env::var("LEMONADE_HOST") {
        config.server.host = v;
    }
    if let Ok(v) = std::env::var("LEMONADE_PORT") {
        if let Ok(p) = v.parse() {
            config.server.port = p;
        }
    }
    if let Ok(v) = std::env::var("LEMONADE_LOG_LEVEL") {
        config.server.log_level = v;
    }
    if let Ok(v) = std::env::var("LEMONADE_CTX_SIZE") {
        if let Ok(n) = v.parse() {
            config.llamacpp.ctx_size = n;
        }
    }
    if let Ok(v) = std::env::var("LEMONADE_API_KEY") {
        config.server.api_key = Some(v);
    }
    if let Ok(v) = std::env::var("LEMONADE_MAX_LOADED_MODELS") {
        if let Ok(n) = v.parse() {
            config.cache.max_loaded_models = n;
        }
    }
    if let Ok(v) = std::env::var("LEMONADE_EXTRA_MODELS_DIR") {
        config.cache.extra_models_dir = Some(v.into());
    }
    if std::env::var("LEMONADE_NO_BROADCAST").is_ok() {
        config.server.no_broadcast = true;
    }
}
