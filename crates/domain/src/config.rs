use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub llamacpp: LlamacppConfig,
    #[serde(default)]
    pub whispercpp: WhispercppConfig,
    #[serde(default)]
    pub sdcpp: SdCppConfig,
    /// Per-recipe executable path overrides (recipe tag -> absolute path).
    #[serde(default)]
    pub backend_paths: HashMap<String, PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            llamacpp: LlamacppConfig::default(),
            whispercpp: WhispercppConfig::default(),
            sdcpp: SdCppConfig::default(),
            backend_paths: HashMap::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_log_level")]
    pub log_level: String,
    /// `None` disables bearer-token auth (dev mode).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Disable the LAN-discovery / multicast heartbeat some UIs expect.
    #[serde(default)]
    pub no_broadcast: bool,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            log_level: d_log_level(),
            api_key: None,
            no_broadcast: false,
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

fn d_port() -> u16 {
    8000
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_log_level() -> String {
    "info".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}

pub const LOG_LEVELS: &[&str] = &[
    "critical", "error", "warning", "info", "debug", "trace",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache / Load Coordinator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Capacity of each per-`ModelType` LRU slot. `-1` = unlimited.
    #[serde(default = "d_max_loaded_models")]
    pub max_loaded_models: i32,
    /// Extra directory scanned recursively for GGUF files.
    #[serde(default)]
    pub extra_models_dir: Option<PathBuf>,
    /// Root directory for persisted state (user models, recipe options,
    /// installed binaries, pidfile).
    #[serde(default = "d_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_loaded_models: d_max_loaded_models(),
            extra_models_dir: None,
            state_dir: d_state_dir(),
        }
    }
}

fn d_max_loaded_models() -> i32 {
    1
}
fn d_state_dir() -> PathBuf {
    dirs_home_cache().join("lemonade-router")
}

fn dirs_home_cache() -> PathBuf {
    std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))
        .unwrap_or_else(|| PathBuf::from(".cache"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-recipe process-wide defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlamacppConfig {
    #[serde(default = "d_ctx_size")]
    pub ctx_size: u32,
    #[serde(default = "d_llamacpp_backend")]
    pub llamacpp_backend: String,
    #[serde(default)]
    pub llamacpp_args: String,
}

impl Default for LlamacppConfig {
    fn default() -> Self {
        Self {
            ctx_size: d_ctx_size(),
            llamacpp_backend: d_llamacpp_backend(),
            llamacpp_args: String::new(),
        }
    }
}

fn d_ctx_size() -> u32 {
    4096
}
fn d_llamacpp_backend() -> String {
    "cpu".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhispercppConfig {
    #[serde(default = "d_whispercpp_backend")]
    pub whispercpp_backend: String,
}

impl Default for WhispercppConfig {
    fn default() -> Self {
        Self {
            whispercpp_backend: d_whispercpp_backend(),
        }
    }
}

fn d_whispercpp_backend() -> String {
    "cpu".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdCppConfig {
    #[serde(default = "d_sdcpp_backend")]
    pub sdcpp_backend: String,
    #[serde(default = "d_steps")]
    pub steps: u32,
    #[serde(default = "d_cfg_scale")]
    pub cfg_scale: f32,
    #[serde(default = "d_width_height")]
    pub width: u32,
    #[serde(default = "d_width_height")]
    pub height: u32,
}

impl Default for SdCppConfig {
    fn default() -> Self {
        Self {
            sdcpp_backend: d_sdcpp_backend(),
            steps: d_steps(),
            cfg_scale: d_cfg_scale(),
            width: d_width_height(),
            height: d_width_height(),
        }
    }
}

fn d_sdcpp_backend() -> String {
    "cpu".into()
}
fn d_steps() -> u32 {
    20
}
fn d_cfg_scale() -> f32 {
    7.0
}
fn d_width_height() -> u32 {
    512
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if !LOG_LEVELS.contains(&self.server.log_level.as_str()) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.log_level".into(),
                message: format!(
                    "unrecognized log_level \"{}\" (expected one of {LOG_LEVELS:?})",
                    self.server.log_level
                ),
            });
        }

        if self.cache.max_loaded_models == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "cache.max_loaded_models".into(),
                message: "max_loaded_models must be -1 (unlimited) or a positive integer".into(),
            });
        }

        if let Some(dir) = &self.cache.extra_models_dir {
            if !dir.exists() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "cache.extra_models_dir".into(),
                    message: format!("{} does not exist", dir.display()),
                });
            }
        }

        if !crate::model::LLAMACPP_BACKENDS.contains(&self.llamacpp.llamacpp_backend.as_str()) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llamacpp.llamacpp_backend".into(),
                message: format!(
                    "unrecognized llamacpp_backend \"{}\"",
                    self.llamacpp.llamacpp_backend
                ),
            });
        }

        if let Err(e) = crate::model::RecipeOptions::validate_llamacpp_args(&self.llamacpp.llamacpp_args)
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llamacpp.llamacpp_args".into(),
                message: e,
            });
        }

        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended)".into(),
            });
        }

        if self.server.api_key.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.api_key".into(),
                message: "no api_key configured; bearer-token auth is disabled".into(),
            });
        }

        errors
    }
}
