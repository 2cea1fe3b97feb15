use std::collections::HashMap;

use lmr_domain::model::{ImageDefaults, ModelInfo, Recipe};

/// The suggested/built-in catalog, compiled directly into the binary as
/// Rust literals rather than shipped as a data file that could drift from
/// the code that reads it. None of these are `downloaded` until a `pull`
/// actually fetches their weights.
pub fn builtin_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo {
            id: "Llama-3.1-8B-Instruct-GGUF".to_string(),
            checkpoint: "meta-llama/Llama-3.1-8B-Instruct:Q4_K_M".to_string(),
            recipe: Recipe::Llamacpp,
            labels: vec!["reasoning".to_string()],
            size_gb: 4.9,
            downloaded: false,
            suggested: true,
            mmproj: None,
            image_defaults: None,
            paths: HashMap::new(),
        },
        ModelInfo {
            id: "Qwen2-VL-7B-Instruct-GGUF".to_string(),
            checkpoint: "Qwen/Qwen2-VL-7B-Instruct:Q4_K_M".to_string(),
            recipe: Recipe::Llamacpp,
            labels: vec!["vision".to_string()],
            size_gb: 5.4,
            downloaded: false,
            suggested: true,
            mmproj: Some("mmproj-Qwen2-VL-7B-Instruct-f16.gguf".to_string()),
            image_defaults: None,
            paths: HashMap::new(),
        },
        ModelInfo {
            id: "bge-large-en-v1.5-GGUF".to_string(),
            checkpoint: "BAAI/bge-large-en-v1.5:F16".to_string(),
            recipe: Recipe::Llamacpp,
            labels: vec!["embeddings".to_string()],
            size_gb: 0.7,
            downloaded: false,
            suggested: true,
            mmproj: None,
            image_defaults: None,
            paths: HashMap::new(),
        },
        ModelInfo {
            id: "bge-reranker-v2-m3-GGUF".to_string(),
            checkpoint: "BAAI/bge-reranker-v2-m3:F16".to_string(),
            recipe: Recipe::Llamacpp,
            labels: vec!["reranking".to_string()],
            size_gb: 1.1,
            downloaded: false,
            suggested: true,
            mmproj: None,
            image_defaults: None,
            paths: HashMap::new(),
        },
        ModelInfo {
            id: "Llama-3.1-8B-Instruct-FLM".to_string(),
            checkpoint: "meta-llama/Llama-3.1-8B-Instruct:NPU".to_string(),
            recipe: Recipe::Flm,
            labels: vec!["reasoning".to_string()],
            size_gb: 5.2,
            downloaded: false,
            suggested: true,
            mmproj: None,
            image_defaults: None,
            paths: HashMap::new(),
        },
        ModelInfo {
            id: "whisper-large-v3-turbo-GGUF".to_string(),
            checkpoint: "openai/whisper-large-v3-turbo:Q5_0".to_string(),
            recipe: Recipe::Whispercpp,
            labels: vec!["audio".to_string()],
            size_gb: 1.6,
            downloaded: false,
            suggested: true,
            mmproj: None,
            image_defaults: None,
            paths: HashMap::new(),
        },
        ModelInfo {
            id: "stable-diffusion-3.5-medium-GGUF".to_string(),
            checkpoint: "stabilityai/stable-diffusion-3.5-medium:Q8_0".to_string(),
            recipe: Recipe::SdCpp,
            labels: vec!["image".to_string()],
            size_gb: 5.1,
            downloaded: false,
            suggested: true,
            mmproj: None,
            image_defaults: Some(ImageDefaults {
                steps: Some(30),
                cfg_scale: Some(4.5),
                width: Some(1024),
                height: Some(1024),
            }),
            paths: HashMap::new(),
        },
        ModelInfo {
            id: "kokoro-82M".to_string(),
            checkpoint: "hexgrad/Kokoro-82M:F32".to_string(),
            recipe: Recipe::Kokoro,
            labels: vec![],
            size_gb: 0.3,
            downloaded: false,
            suggested: true,
            mmproj: None,
            image_defaults: None,
            paths: HashMap::new(),
        },
    ]
}
