use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use lmr_domain::capability::{Capability, Operation};
use lmr_domain::error::{Error, Result};
use lmr_domain::model::{ModelInfo, RecipeOptions, LLAMACPP_BACKENDS};
use lmr_supervisor::{LogSink, SpawnSpec};

use crate::install::{self, PinnedRelease};
use crate::traits::{BackendAdapter, BackendKind, InstallOutcome};

const CAPABILITIES: &[Capability] = &[
    Capability::Completion,
    Capability::Embeddings,
    Capability::Reranking,
];

const PINNED: PinnedRelease = PinnedRelease {
    version: "b4500",
    url_template: "https://github.com/ggml-org/llama.cpp/releases/download/{version}/llama-server-linux.tar.gz",
    binary_name: "llama-server",
};

/// Wraps a llama.cpp-family GGUF server (chat, completions, embeddings,
/// reranking all served by the same binary).
pub struct LlamacppAdapter {
    pub install_dir: PathBuf,
}

impl LlamacppAdapter {
    pub fn new(install_dir: PathBuf) -> Self {
        Self { install_dir }
    }
}

#[async_trait::async_trait]
impl BackendAdapter for LlamacppAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Llamacpp
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
        options: &RecipeOptions,
        port: u16,
        _log_sink: &Arc<dyn LogSink>,
    ) -> Result<SpawnSpec> {
        let model_path = model
            .resolved_path("main")
            .ok_or_else(|| Error::BadRequest(format!("model {} has no main path", model.id)))?;

        let backend = options.llamacpp_backend.as_deref().unwrap_or("cpu");
        if !LLAMACPP_BACKENDS.contains(&backend) {
            return Err(Error::BadRequest(format!("unknown llamacpp_backend {backend}")));
        }

        let mut args = vec![
            "-m".to_string(),
            model_path.display().to_string(),
            "--port".to_string(),
            port.to_string(),
            "--ctx-size".to_string(),
            options.ctx_size.unwrap_or(4096).to_string(),
            "-ngl".to_string(),
            if backend == "cpu" { "0".to_string() } else { "999".to_string() },
        ];

        if let Some(mmproj) = model.resolved_path("mmproj") {
            args.push("--mmproj".to_string());
            args.push(mmproj.display().to_string());
        }

        if let Some(extra) = &options.llamacpp_args {
            args.extend(extra.split_whitespace().map(str::to_string));
        }

        let mut env = HashMap::new();
        env.insert("LEMONADE_LLAMACPP_BACKEND".to_string(), backend.to_string());
        if cfg!(unix) {
            env.insert(
                "LD_LIBRARY_PATH".to_string(),
                self.install_dir.join("lib").display().to_string(),
            );
        }

        Ok(SpawnSpec {
            exe: self.install_dir.join(PINNED.binary_name),
            args,
            env,
            working_dir: Some(self.install_dir.clone()),
        })
    }

    fn path_for(&self, op: Operation) -> Option<&'static str> {
        match op {
            Operation::ChatCompletion => Some("/v1/chat/completions"),
            Operation::Completion => Some("/v1/completions"),
            // llama-server has no native Responses endpoint; the gateway
            // re-frames this same chat-completions stream into the
            // Responses event subset (see forward::forward_responses_sse).
            Operation::Responses => Some("/v1/chat/completions"),
            Operation::Embeddings => Some("/v1/embeddings"),
            Operation::Reranking => Some("/v1/rerank"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_routes_to_the_same_endpoint_as_chat_completions() {
        let adapter = LlamacppAdapter::new(PathBuf::from("/tmp/llamacpp"));
        assert_eq!(
            adapter.path_for(Operation::Responses),
            adapter.path_for(Operation::ChatCompletion),
        );
    }

    #[test]
    fn audio_transcriptions_is_unsupported() {
        let adapter = LlamacppAdapter::new(PathBuf::from("/tmp/llamacpp"));
        assert_eq!(adapter.path_for(Operation::AudioTranscriptions), None);
    }
}
