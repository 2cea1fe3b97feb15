use std::collections::HashMap;

use lmr_domain::model::{ModelInfo, Recipe, RecipeOptions};
use lmr_registry::{default_paths, ModelRegistry};

fn user_model(id: &str) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        checkpoint: "org/model:Q4".to_string(),
        recipe: Recipe::Llamacpp,
        labels: vec!["reasoning".to_string()],
        size_gb: 1.2,
        downloaded: true,
        suggested: false,
        mmproj: None,
        image_defaults: None,
        paths: HashMap::new(),
    }
}

#[tokio::test]
async fn register_user_model_persists_and_is_visible() {
    let dir = tempfile::tempdir().unwrap();
    let (user_path, opts_path) = default_paths(dir.path());
    let registry = ModelRegistry::load(user_path.clone(), opts_path, None).await.unwrap();

    registry.register_user(user_model("user.my-model")).await.unwrap();

    let fetched = registry.get("user.my-model").unwrap();
    assert_eq!(fetched.id, "user.my-model");
    assert!(user_path.exists());

    // A second registry instance loading the same files sees the entry.
    let (user_path2, opts_path2) = default_paths(dir.path());
    let reopened = ModelRegistry::load(user_path2, opts_path2, None).await.unwrap();
    assert!(reopened.get("user.my-model").is_ok());
}

#[tokio::test]
async fn register_user_model_rejects_bad_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let (user_path, opts_path) = default_paths(dir.path());
    let registry = ModelRegistry::load(user_path, opts_path, None).await.unwrap();

    let result = registry.register_user(user_model("not-prefixed")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn list_filters_undownloaded_unless_show_all() {
    let dir = tempfile::tempdir().unwrap();
    let (user_path, opts_path) = default_paths(dir.path());
    let registry = ModelRegistry::load(user_path, opts_path, None).await.unwrap();

    let downloaded_only = registry.list(false);
    let all = registry.list(true);
    assert!(all.len() >= downloaded_only.len());
    assert!(downloaded_only.iter().all(|m| m.downloaded));
}

#[tokio::test]
async fn user_entry_overrides_builtin_with_same_id() {
    let dir = tempfile::tempdir().unwrap();
    let (user_path, opts_path) = default_paths(dir.path());
    let registry = ModelRegistry::load(user_path, opts_path, None).await.unwrap();

    let builtin_id = lmr_registry::builtin_models()[0].id.clone();
    let mut override_model = user_model(&builtin_id);
    override_model.size_gb = 999.0;

    // Not a `user.`-prefixed id, so direct registration is rejected; this
    // asserts the precedence rule is about *source*, not just presence.
    let result = registry.register_user(override_model).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn delete_removes_user_entry() {
    let dir = tempfile::tempdir().unwrap();
    let (user_path, opts_path) = default_paths(dir.path());
    let registry = ModelRegistry::load(user_path, opts_path, None).await.unwrap();

    registry.register_user(user_model("user.to-delete")).await.unwrap();
    registry.delete("user.to-delete").await.unwrap();
    assert!(registry.get("user.to-delete").is_err());
}

#[tokio::test]
async fn recipe_options_roundtrip_through_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let (user_path, opts_path) = default_paths(dir.path());
    let registry = ModelRegistry::load(user_path.clone(), opts_path.clone(), None).await.unwrap();

    let opts = RecipeOptions {
        ctx_size: Some(8192),
        ..Default::default()
    };
    registry.set_recipe_options("user.some-model", opts.clone()).await.unwrap();

    let reopened = ModelRegistry::load(user_path, opts_path, None).await.unwrap();
    assert_eq!(reopened.get_recipe_options("user.some-model").ctx_size, Some(8192));
}
