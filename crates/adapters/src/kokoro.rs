use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use lmr_domain::capability::{Capability, Operation};
use lmr_domain::error::{Error, Result};
use lmr_domain::model::{ModelInfo, RecipeOptions};
use lmr_supervisor::{LogSink, SpawnSpec};

use crate::install::{self, PinnedRelease};
use crate::traits::{BackendAdapter, BackendKind, InstallOutcome};

const CAPABILITIES: &[Capability] = &[Capability::SpeechSynthesis];

const PINNED: PinnedRelease = PinnedRelease {
    version: "0.2.0",
    url_template: "https://github.com/remsky/Kokoro-FastAPI/releases/download/v{version}/kokoro-server-linux.tar.gz",
    binary_name: "kokoro-server",
};

pub struct KokoroAdapter {
    pub install_dir: PathBuf,
}

impl KokoroAdapter {
    pub fn new(install_dir: PathBuf) -> Self {
        Self { install_dir }
    }
}

#[async_trait::async_trait]
impl BackendAdapter for KokoroAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Kokoro
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

    fn build_spawn(
        &self,
        model: &ModelInfo,
        _options: &RecipeOptions,
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
            Operation::AudioSpeech => Some("/v1/audio/speech"),
            _ => None,
        }
    }
}
