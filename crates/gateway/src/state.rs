use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use lmr_cache::LoadCoordinator;
use lmr_domain::config::Config;
use lmr_registry::ModelRegistry;

/// Counters for the last request the router forwarded, surfaced at
/// `GET /api/v1/stats`.
#[derive(Debug, Clone)]
pub struct RequestStats {
    pub model_id: String,
    pub operation: String,
    pub streaming: bool,
    pub status: u16,
    pub duration_ms: u64,
}

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, model registry, load coordinator
/// - **Outbound** — the shared client used to forward to backend children
/// - **Security** — the API bearer token hash (startup-computed)
/// - **Caches** — last-request stats surfaced at `/api/v1/stats`
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub registry: Arc<ModelRegistry>,
    pub cache: Arc<LoadCoordinator>,

    // ── Outbound ──────────────────────────────────────────────────────
    pub http_client: reqwest::Client,

    // ── Security (startup-computed) ──────────────────────────────────
    /// SHA-256 hash of the API bearer token. `None` = auth disabled.
    pub api_token_hash: Option<Arc<[u8]>>,

    // ── Caches ────────────────────────────────────────────────────────
    pub stats: Arc<Mutex<Option<RequestStats>>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn record_forward(&self, stats: RequestStats) {
        *self.stats.lock() = Some(stats);
    }
}
