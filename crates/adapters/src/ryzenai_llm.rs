use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use lmr_domain::capability::{Capability, Operation};
use lmr_domain::error::{Error, Result};
use lmr_domain::model::{ModelInfo, RecipeOptions};
use lmr_supervisor::{LogSink, SpawnSpec};

use crate::install::{self, PinnedRelease};
use crate::npu;
use crate::traits::{BackendAdapter, BackendKind, InstallOutcome};

const CAPABILITIES: &[Capability] = &[Capability::Completion];

const MIN_DRIVER_VERSION: &str = "1.3.0";

const PINNED: PinnedRelease = PinnedRelease {
    version: "1.4.0",
    url_template: "https://github.com/amd/RyzenAI-SW/releases/download/v{version}/ryzenai-llm-server-linux.tar.gz",
    binary_name: "ryzenai-llm-server",
};

/// AMD RyzenAI-SW NPU LLM engine.
pub struct RyzenaiLlmAdapter {
    pub install_dir: PathBuf,
}

impl RyzenaiLlmAdapter {
    pub fn new(install_dir: PathBuf) -> Self {
        Self { install_dir }
    }
}

#[async_trait::async_trait]
impl BackendAdapter for RyzenaiLlmAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::RyzenaiLlm
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    async fn ensure_installed(&self) -> Result<InstallOutcome> {
        install::ensure_installed(&self.install_dir, &PINNED).await
    }

    fn readiness_path(&self) -> &'static str {
        "/health"
    }

    fn check_preconditions(&self) -> Result<()> {
        npu::check_driver_version(MIN_DRIVER_VERSION)
    }

    fn build_spawn(
        &self,
        model: &ModelInfo,
        options: &RecipeOptions,
        port: u16,
        _log_sink: &Arc<dyn LogSink>,
    ) -> Result<SpawnSpec> {
        let model_path = model
            .resolved_path("main")
            .ok_or_else(|| Error::BadRequest(format!("model {} has no main path", model.id)))?;

        let args = vec![
            "--model".to_string(),
            model_path.display().to_string(),
            "--port".to_string(),
            port.to_string(),
            "--ctx-size".to_string(),
            options.ctx_size.unwrap_or(4096).to_string(),
        ];

        Ok(SpawnSpec {
            exe: self.install_dir.join(PINNED.binary_name),
            args,
            env: HashMap::new(),
            working_dir: Some(self.install_dir.clone()),
        })
    }

    fn path_for(&self, op: Operation) -> Option<&'static str> {
        match op {
            Operation::ChatCompletion => Some("/v1/chat/completions"),
            Operation::Completion => Some("/v1/completions"),
            // ryzenai-llm-server has no native Responses endpoint; the
            // gateway re-frames the chat-completions stream into Responses
            // events.
            Operation::Responses => Some("/v1/chat/completions"),
            _ => None,
        }
    }

    fn invalidates_family_on_upgrade(&self) -> bool {
        true
    }
}
