use std::collections::HashMap;
use std::path::Path;

use lmr_domain::model::{ModelInfo, Recipe};

/// Recursively scans `dir` for `.gguf` files and produces one `ModelInfo`
/// per file, `extra.`-prefixed, recipe always `llamacpp`. Labels are
/// inferred from the filename:
/// - contains "embed" -> `embeddings`
/// - contains "rerank" -> `reranking`
/// - contains "vision"/"vl"/"llava" -> `vision`
/// - otherwise -> `reasoning` (the implicit llamacpp default)
pub fn scan_directory(dir: &Path) -> Vec<ModelInfo> {
    let mut found = Vec::new();

    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("gguf") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let size_gb = std::fs::metadata(path)
            .map(|m| m.len() as f64 / 1024.0 / 1024.0 / 1024.0)
            .unwrap_or(0.0);

        let mut paths = HashMap::new();
        paths.insert("main".to_string(), path.to_path_buf());

        found.push(ModelInfo {
            id: format!("extra.{stem}"),
            checkpoint: stem.to_string(),
            recipe: Recipe::Llamacpp,
            labels: vec![label_for(stem).to_string()],
            size_gb,
            downloaded: true,
            suggested: false,
            mmproj: None,
            image_defaults: None,
            paths,
        });
    }

    found
}

fn label_for(stem: &str) -> &'static str {
    let lower = stem.to_lowercase();
    if lower.contains("embed") {
        "embeddings"
    } else if lower.contains("rerank") {
        "reranking"
    } else if lower.contains("vision") || lower.contains("vl") || lower.contains("llava") {
        "vision"
    } else {
        "reasoning"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_filename_gets_embeddings_label() {
        assert_eq!(label_for("bge-embed-model"), "embeddings");
    }

    #[test]
    fn rerank_filename_gets_reranking_label() {
        assert_eq!(label_for("bge-rerank-v2"), "reranking");
    }

    #[test]
    fn vl_filename_gets_vision_label() {
        assert_eq!(label_for("qwen2-vl-7b"), "vision");
        assert_eq!(label_for("llava-1.6-7b"), "vision");
    }

    #[test]
    fn plain_filename_gets_reasoning_label() {
        assert_eq!(label_for("llama-3.1-8b-instruct"), "reasoning");
    }

    #[test]
    fn scan_finds_gguf_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("my-embed-model.gguf"), b"fake").unwrap();
        std::fs::write(dir.path().join("not-a-model.txt"), b"fake").unwrap();

        let found = scan_directory(dir.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "extra.my-embed-model");
        assert!(found[0].has_label("embeddings"));
        assert!(found[0].downloaded);
    }
}
