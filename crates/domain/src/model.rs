use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The backend family a model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recipe {
    Llamacpp,
    Flm,
    RyzenaiLlm,
    Whispercpp,
    SdCpp,
    Kokoro,
}

impl Recipe {
    /// Whether this recipe, by itself (ignoring per-instance options such
    /// as `whispercpp_backend`), always ties up the NPU device.
    pub fn is_npu_only(self) -> bool {
        matches!(self, Recipe::Flm | Recipe::RyzenaiLlm)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Recipe::Llamacpp => "llamacpp",
            Recipe::Flm => "flm",
            Recipe::RyzenaiLlm => "ryzenai-llm",
            Recipe::Whispercpp => "whispercpp",
            Recipe::SdCpp => "sd-cpp",
            Recipe::Kokoro => "kokoro",
        }
    }
}

/// Optional multimodal projector / image-default hints carried on a
/// [`ModelInfo`] when relevant to its recipe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageDefaults {
    pub steps: Option<u32>,
    pub cfg_scale: Option<f32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// A catalog entry produced by the Model Registry. Immutable per read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Stable name used in the API `model` field. Carries a `user.` prefix
    /// for user-registered entries, an `extra.` prefix for directory-scanned
    /// ones.
    pub id: String,
    /// Upstream identifier. For GGUF models the form is `repo:variant`.
    pub checkpoint: String,
    pub recipe: Recipe,
    /// Tags: `reasoning`, `vision`, `embeddings`, `reranking`, `audio`,
    /// `image`, plus cosmetic tags.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub size_gb: f64,
    #[serde(default)]
    pub downloaded: bool,
    #[serde(default)]
    pub suggested: bool,
    /// Reference to a multimodal projector file, when applicable.
    #[serde(default)]
    pub mmproj: Option<String>,
    #[serde(default)]
    pub image_defaults: Option<ImageDefaults>,
    /// Per-role on-disk paths (`main`, `text_encoder`, `vae`, `mmproj`, ...).
    /// Roles are an open string set; unknown roles resolve to `None`.
    #[serde(default)]
    pub paths: HashMap<String, PathBuf>,
}

impl ModelInfo {
    pub fn resolved_path(&self, role: &str) -> Option<&PathBuf> {
        self.paths.get(role)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Derive the [`ModelType`] slot this model belongs to. See spec §3 for
    /// the exact precedence order; `embeddings` beats `reranking` beats
    /// `audio`/whispercpp beats `image`/sd-cpp beats `kokoro`, everything
    /// else falls through to `llm`.
    pub fn model_type(&self) -> ModelType {
        if self.has_label("embeddings") {
            ModelType::Embedding
        } else if self.has_label("reranking") {
            ModelType::Reranking
        } else if self.has_label("audio") || self.recipe == Recipe::Whispercpp {
            ModelType::Audio
        } else if self.has_label("image") || self.recipe == Recipe::SdCpp {
            ModelType::Image
        } else if self.recipe == Recipe::Kokoro {
            ModelType::Tts
        } else {
            ModelType::Llm
        }
    }

    /// Whether loading this model ties up the exclusive NPU device,
    /// accounting for the `whispercpp` + `npu` backend-option special case.
    pub fn uses_npu(&self, effective_options: &RecipeOptions) -> bool {
        if self.recipe.is_npu_only() {
            return true;
        }
        if self.recipe == Recipe::Whispercpp {
            return effective_options.whispercpp_backend.as_deref() == Some("npu");
        }
        false
    }
}

/// One of the per-model-type LRU slots in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Llm,
    Embedding,
    Reranking,
    Audio,
    Image,
    Tts,
}

impl ModelType {
    pub const ALL: [ModelType; 6] = [
        ModelType::Llm,
        ModelType::Embedding,
        ModelType::Reranking,
        ModelType::Audio,
        ModelType::Image,
        ModelType::Tts,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::Llm => "llm",
            ModelType::Embedding => "embedding",
            ModelType::Reranking => "reranking",
            ModelType::Audio => "audio",
            ModelType::Image => "image",
            ModelType::Tts => "tts",
        }
    }
}

/// Recognized per-recipe option keys and their effective values, after
/// precedence resolution (request > stored per-model > process config >
/// adapter default).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecipeOptions {
    // llamacpp / flm / ryzenai-llm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llamacpp_backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llamacpp_args: Option<String>,

    // whispercpp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whispercpp_backend: Option<String>,

    // sd-cpp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdcpp_backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    /// Pseudo-option: persist the effective values used for this load back
    /// to the per-model options store. Never itself persisted.
    #[serde(default, skip_serializing)]
    pub save_options: bool,
}

/// Command-line flags the router itself manages and that user-supplied
/// `llamacpp_args` must never collide with.
pub const LLAMACPP_RESERVED_FLAGS: &[&str] = &["-m", "--port", "--ctx-size", "-ngl"];

/// Recognized `llamacpp_backend` / `sdcpp_backend` values.
pub const LLAMACPP_BACKENDS: &[&str] = &["vulkan", "rocm", "metal", "cpu"];

/// Recognized `whispercpp_backend` values.
pub const WHISPERCPP_BACKENDS: &[&str] = &["cpu", "npu"];

impl RecipeOptions {
    /// Recognized keys for a given recipe. Unknown keys in a request must
    /// be rejected with `BadRequest` by the caller.
    pub fn recognized_keys(recipe: Recipe) -> &'static [&'static str] {
        match recipe {
            Recipe::Llamacpp => &["ctx_size", "llamacpp_backend", "llamacpp_args", "save_options"],
            Recipe::Flm | Recipe::RyzenaiLlm => &["ctx_size", "save_options"],
            Recipe::Whispercpp => &["whispercpp_backend", "save_options"],
            Recipe::SdCpp => &[
                "sdcpp_backend",
                "steps",
                "cfg_scale",
                "width",
                "height",
                "save_options",
            ],
            Recipe::Kokoro => &["save_options"],
        }
    }

    /// Validate that `llamacpp_args` does not contain router-managed flags.
    pub fn validate_llamacpp_args(args: &str) -> Result<(), String> {
        for reserved in LLAMACPP_RESERVED_FLAGS {
            if args.split_whitespace().any(|tok| tok == *reserved) {
                return Err(format!(
                    "llamacpp_args may not contain router-managed flag {reserved}"
                ));
            }
        }
        Ok(())
    }

    /// `width`/`height` must be a positive multiple of 64 for sd-cpp.
    pub fn validate_sdcpp_dimension(name: &str, value: u32) -> Result<(), String> {
        if value == 0 || value % 64 != 0 {
            return Err(format!("{name} must be a positive multiple of 64, got {value}"));
        }
        Ok(())
    }
}

/// Read-only snapshot of a `LoadedInstance`, serializable for the stats and
/// health endpoints. The live struct (owning the supervisor handle and the
/// adapter) lives in `lmr-cache`, which is above `lmr-domain` in the crate
/// graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedInstanceInfo {
    pub model_id: String,
    pub model_type: ModelType,
    pub recipe: Recipe,
    pub pid: u32,
    pub port: u16,
    pub last_use_epoch_ms: i64,
    pub inflight: u32,
    pub recipe_options: RecipeOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(recipe: Recipe, labels: &[&str]) -> ModelInfo {
        ModelInfo {
            id: "m1".into(),
            checkpoint: "org/model:Q4".into(),
            recipe,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            size_gb: 1.0,
            downloaded: true,
            suggested: false,
            mmproj: None,
            image_defaults: None,
            paths: HashMap::new(),
        }
    }

    #[test]
    fn embeddings_label_wins_over_everything() {
        let m = info(Recipe::Whispercpp, &["embeddings", "audio"]);
        assert_eq!(m.model_type(), ModelType::Embedding);
    }

    #[test]
    fn reranking_label_beats_audio_and_image() {
        let m = info(Recipe::SdCpp, &["reranking", "image"]);
        assert_eq!(m.model_type(), ModelType::Reranking);
    }

    #[test]
    fn whispercpp_recipe_implies_audio_without_label() {
        let m = info(Recipe::Whispercpp, &[]);
        assert_eq!(m.model_type(), ModelType::Audio);
    }

    #[test]
    fn sd_cpp_recipe_implies_image_without_label() {
        let m = info(Recipe::SdCpp, &[]);
        assert_eq!(m.model_type(), ModelType::Image);
    }

    #[test]
    fn kokoro_recipe_is_tts() {
        let m = info(Recipe::Kokoro, &[]);
        assert_eq!(m.model_type(), ModelType::Tts);
    }

    #[test]
    fn plain_llamacpp_is_llm() {
        let m = info(Recipe::Llamacpp, &["reasoning"]);
        assert_eq!(m.model_type(), ModelType::Llm);
    }

    #[test]
    fn vision_and_embeddings_overlap_resolves_to_embedding() {
        // Author's best-reconstruction precedence (see DESIGN.md open
        // question): embeddings beats every other label.
        let m = info(Recipe::Llamacpp, &["vision", "embeddings"]);
        assert_eq!(m.model_type(), ModelType::Embedding);
    }

    #[test]
    fn flm_and_ryzenai_always_use_npu() {
        let opts = RecipeOptions::default();
        assert!(info(Recipe::Flm, &[]).uses_npu(&opts));
        assert!(info(Recipe::RyzenaiLlm, &[]).uses_npu(&opts));
    }

    #[test]
    fn whispercpp_uses_npu_only_with_npu_backend_option() {
        let cpu_opts = RecipeOptions {
            whispercpp_backend: Some("cpu".into()),
            ..Default::default()
        };
        let npu_opts = RecipeOptions {
            whispercpp_backend: Some("npu".into()),
            ..Default::default()
        };
        let m = info(Recipe::Whispercpp, &[]);
        assert!(!m.uses_npu(&cpu_opts));
        assert!(m.uses_npu(&npu_opts));
    }

    #[test]
    fn llamacpp_never_uses_npu() {
        let opts = RecipeOptions::default();
        assert!(!info(Recipe::Llamacpp, &[]).uses_npu(&opts));
    }

    #[test]
    fn llamacpp_args_rejects_reserved_flags() {
        assert!(RecipeOptions::validate_llamacpp_args("--port 9090").is_err());
        assert!(RecipeOptions::validate_llamacpp_args("-m /path/model.gguf").is_err());
        assert!(RecipeOptions::validate_llamacpp_args("--ctx-size 2048").is_err());
        assert!(RecipeOptions::validate_llamacpp_args("-ngl 32").is_err());
        assert!(RecipeOptions::validate_llamacpp_args("--temp 0.7").is_ok());
    }

    #[test]
    fn sdcpp_dimension_must_be_multiple_of_64() {
        assert!(RecipeOptions::validate_sdcpp_dimension("width", 512).is_ok());
        assert!(RecipeOptions::validate_sdcpp_dimension("width", 500).is_err());
        assert!(RecipeOptions::validate_sdcpp_dimension("width", 0).is_err());
    }
}
