use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use lmr_domain::capability::{Capability, Operation};
use lmr_domain::error::{Error, Result};
use lmr_domain::model::{ModelInfo, RecipeOptions, WHISPERCPP_BACKENDS};
use lmr_supervisor::{LogSink, SpawnSpec};

use crate::install::{self, PinnedRelease};
use crate::traits::{BackendAdapter, BackendKind, InstallOutcome};

const CAPABILITIES: &[Capability] = &[Capability::AudioTranscription];

const PINNED: PinnedRelease = PinnedRelease {
    version: "v1.7.2",
    url_template: "https://github.com/ggml-org/whisper.cpp/releases/download/{version}/whisper-server-linux.tar.gz",
    binary_name: "whisper-server",
};

pub struct WhispercppAdapter {
    pub install_dir: PathBuf,
}

impl WhispercppAdapter {
    pub fn new(install_dir: PathBuf) -> Self {
        Self { install_dir }
    }
}

#[async_trait::async_trait]
impl BackendAdapter for WhispercppAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Whispercpp
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    async fn ensure_installed(&self) -> Result<InstallOutcome> {
        install::ensure_installed(&self.install_dir, &PINNED).await
    }

    fn readiness_path(&self) -> &'static str {
        "/"
    }

    fn check_preconditions(&self) -> Result<()> {
        Ok(())
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

        let backend = options.whispercpp_backend.as_deref().unwrap_or("cpu");
        if !WHISPERCPP_BACKENDS.contains(&backend) {
            return Err(Error::BadRequest(format!("unknown whispercpp_backend {backend}")));
        }

        let args = vec![
            "--model".to_string(),
            model_path.display().to_string(),
            "--port".to_string(),
            port.to_string(),
        ];

        let mut env = HashMap::new();
        env.insert("LEMONADE_WHISPERCPP_BACKEND".to_string(), backend.to_string());

        Ok(SpawnSpec {
            exe: self.install_dir.join(PINNED.binary_name),
            args,
            env,
            working_dir: Some(self.install_dir.clone()),
        })
    }

    fn path_for(&self, op: Operation) -> Option<&'static str> {
        match op {
            Operation::AudioTranscriptions => Some("/inference"),
            _ => None,
        }
    }
}
