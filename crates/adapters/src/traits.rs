use std::path::Path;
use std::sync::Arc;

use lmr_domain::capability::{Capability, Operation};
use lmr_domain::error::Result;
use lmr_domain::model::{ModelInfo, RecipeOptions};
use lmr_supervisor::{LogSink, SpawnSpec};

/// Tags a concrete adapter for match-based dispatch, so generic code (the
/// cache, the router) never needs to downcast or walk a vtable to find out
/// which recipe it is holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Llamacpp,
    Flm,
    RyzenaiLlm,
    Whispercpp,
    SdCpp,
    Kokoro,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Llamacpp => "llamacpp",
            BackendKind::Flm => "flm",
            BackendKind::RyzenaiLlm => "ryzenai-llm",
            BackendKind::Whispercpp => "whispercpp",
            BackendKind::SdCpp => "sd-cpp",
            BackendKind::Kokoro => "kokoro",
        }
    }
}

/// Result of `ensure_installed`. `upgraded` is true only when the on-disk
/// binary changed as a result of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub upgraded: bool,
    pub version: String,
}

/// Per-backend-family adapter: installs the engine binary, builds its spawn
/// spec, and maps logical operations onto the child's own HTTP paths.
#[async_trait::async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> &'static [Capability];

    /// Idempotent. Downloads and installs the pinned engine version if the
    /// on-disk copy is missing or stale; never leaves the install directory
    /// half-extracted on failure.
    async fn ensure_installed(&self) -> Result<InstallOutcome>;

    /// Path the caller polls (on `http://127.0.0.1:<port>`) to decide
    /// readiness.
    fn readiness_path(&self) -> &'static str;

    /// Build the command line, environment, and working directory for the
    /// child. May perform auxiliary downloads (e.g. multimodal projectors)
    /// before returning.
    fn build_spawn(
        &self,
        model: &ModelInfo,
        options: &RecipeOptions,
        port: u16,
        log_sink: &Arc<dyn LogSink>,
    ) -> Result<SpawnSpec>;

    /// Logical-operation -> child-side path. `None` means the adapter does
    /// not support the operation at all (caller returns `UnsupportedOperation`).
    fn path_for(&self, op: Operation) -> Option<&'static str>;

    /// Mutate a request body in place before it is forwarded to the child.
    /// Most adapters are a no-op here; `sd-cpp` uses it to embed sampling
    /// parameters the engine only accepts inline in the prompt.
    fn transform_request_body(
        &self,
        _op: Operation,
        _body: &mut serde_json::Value,
        _options: &RecipeOptions,
    ) -> Result<()> {
        Ok(())
    }

    /// Whether the install that just completed (`upgraded == true`)
    /// invalidates every other loaded instance of this recipe, forcing the
    /// Load Coordinator to evict them before proceeding.
    fn invalidates_family_on_upgrade(&self) -> bool {
        false
    }

    /// NPU-family adapters override this to enforce a minimum driver
    /// version before spawning; default is "no precondition".
    fn check_preconditions(&self) -> Result<()> {
        Ok(())
    }
}

/// Where an adapter keeps its installed binary and version marker.
pub fn version_file(install_dir: &Path) -> std::path::PathBuf {
    install_dir.join("version.txt")
}
