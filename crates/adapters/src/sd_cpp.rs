use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use lmr_domain::capability::{Capability, Operation};
use lmr_domain::error::{Error, Result};
use lmr_domain::model::{ModelInfo, RecipeOptions};
use lmr_supervisor::{LogSink, SpawnSpec};

use crate::install::{self, PinnedRelease};
use crate::traits::{BackendAdapter, BackendKind, InstallOutcome};

const CAPABILITIES: &[Capability] = &[Capability::ImageGeneration];

/// Engine versions at or above this require sampling parameters to be
/// embedded inline in the prompt rather than passed as separate JSON
/// fields; below it the engine's own request schema carries them.
const INLINE_EXTRA_ARGS_SINCE: &str = "0.3.0";

const PINNED: PinnedRelease = PinnedRelease {
    version: "0.3.1",
    url_template: "https://github.com/leejet/stable-diffusion.cpp/releases/download/{version}/sd-server-linux.tar.gz",
    binary_name: "sd-server",
};

pub struct SdCppAdapter {
    pub install_dir: PathBuf,
}

impl SdCppAdapter {
    pub fn new(install_dir: PathBuf) -> Self {
        Self { install_dir }
    }

    fn requires_inline_extra_args(&self) -> bool {
        PINNED.version >= INLINE_EXTRA_ARGS_SINCE
    }
}

#[async_trait::async_trait]
impl BackendAdapter for SdCppAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::SdCpp
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

        let mut args = vec![
            "--model".to_string(),
            model_path.display().to_string(),
            "--port".to_string(),
            port.to_string(),
        ];
        if let Some(vae) = model.resolved_path("vae") {
            args.push("--vae".to_string());
            args.push(vae.display().to_string());
        }

        Ok(SpawnSpec {
            exe: self.install_dir.join(PINNED.binary_name),
            args,
            env: HashMap::new(),
            working_dir: Some(self.install_dir.clone()),
        })
    }

    fn path_for(&self, op: Operation) -> Option<&'static str> {
        match op {
            Operation::ImagesGenerations => Some("/sdapi/v1/txt2img"),
            _ => None,
        }
    }

    fn transform_request_body(
        &self,
        op: Operation,
        body: &mut serde_json::Value,
        options: &RecipeOptions,
    ) -> Result<()> {
        if op != Operation::ImagesGenerations || !self.requires_inline_extra_args() {
            return Ok(());
        }

        let extra = serde_json::json!({
            "steps": options.steps,
            "cfg_scale": options.cfg_scale,
            "seed": -1,
            "sample_method": "euler_a",
            "scheduler": "discrete",
        });
        let tag = format!("<sd_cpp_extra_args>{extra}</sd_cpp_extra_args>");

        let Some(obj) = body.as_object_mut() else {
            return Err(Error::BadRequest("image request body must be a JSON object".into()));
        };
        let prompt = obj
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        obj.insert("prompt".to_string(), serde_json::Value::String(format!("{prompt}{tag}")));
        Ok(())
    }
}
