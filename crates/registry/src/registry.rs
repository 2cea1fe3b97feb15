use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use lmr_domain::error::{Error, Result};
use lmr_domain::model::{ModelInfo, RecipeOptions};

use crate::atomic::{read_json_or_default, write_json_atomic};
use crate::builtins::builtin_models;
use crate::scan::scan_directory;

struct State {
    user: HashMap<String, ModelInfo>,
    recipe_options: HashMap<String, RecipeOptions>,
}

/// Produces `ModelInfo` records on demand from three sources merged by
/// precedence (user beats extra-directory-scan beats built-in), and owns
/// the two small mutable files backing user registration and per-model
/// recipe options.
pub struct ModelRegistry {
    user_models_path: PathBuf,
    recipe_options_path: PathBuf,
    extra_models_dir: Option<PathBuf>,
    state: RwLock<State>,
}

impl ModelRegistry {
    pub async fn load(
        user_models_path: PathBuf,
        recipe_options_path: PathBuf,
        extra_models_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let user: HashMap<String, ModelInfo> = read_json_or_default(&user_models_path).await?;
        let recipe_options: HashMap<String, RecipeOptions> =
            read_json_or_default(&recipe_options_path).await?;

        Ok(Self {
            user_models_path,
            recipe_options_path,
            extra_models_dir,
            state: RwLock::new(State { user, recipe_options }),
        })
    }

    /// All known models, user entries winning ties against an
    /// extra-directory scan, which in turn wins against the built-in list.
    /// Filtered to `downloaded == true` unless `show_all`.
    pub fn list(&self, show_all: bool) -> Vec<ModelInfo> {
        let mut merged: HashMap<String, ModelInfo> = HashMap::new();

        for m in builtin_models() {
            merged.insert(m.id.clone(), m);
        }
        if let Some(dir) = &self.extra_models_dir {
            for m in scan_directory(dir) {
                merged.insert(m.id.clone(), m);
            }
        }
        for m in self.state.read().user.values() {
            merged.insert(m.id.clone(), m.clone());
        }

        let mut out: Vec<ModelInfo> = merged
            .into_values()
            .filter(|m| show_all || m.downloaded)
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn get(&self, id: &str) -> Result<ModelInfo> {
        if let Some(m) = self.state.read().user.get(id) {
            return Ok(m.clone());
        }
        if let Some(dir) = &self.extra_models_dir {
            if let Some(m) = scan_directory(dir).into_iter().find(|m| m.id == id) {
                return Ok(m);
            }
        }
        builtin_models()
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::NotFound(format!("model {id}")))
    }

    /// Persists `info` into the user list. Rejects ids that do not carry
    /// the `user.` prefix reserved for this source.
    pub async fn register_user(&self, info: ModelInfo) -> Result<()> {
        if !info.id.starts_with("user.") {
            return Err(Error::BadRequest(format!(
                "user-registered model id must start with 'user.', got '{}'",
                info.id
            )));
        }
        {
            let mut state = self.state.write();
            state.user.insert(info.id.clone(), info);
        }
        self.persist_user().await
    }

    /// Removes the registry entry (if it is a `user.` entry) and best-effort
    /// deletes any on-disk files the model points at.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let info = self.get(id)?;

        if id.starts_with("user.") {
            let removed = {
                let mut state = self.state.write();
                state.user.remove(id)
            };
            if removed.is_none() {
                return Err(Error::NotFound(format!("model {id}")));
            }
            self.persist_user().await?;
        }

        for path in info.paths.values() {
            if path.exists() {
                let _ = tokio::fs::remove_file(path).await;
            }
        }
        Ok(())
    }

    pub fn get_recipe_options(&self, id: &str) -> RecipeOptions {
        self.state
            .read()
            .recipe_options
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set_recipe_options(&self, id: &str, options: RecipeOptions) -> Result<()> {
        {
            let mut state = self.state.write();
            state.recipe_options.insert(id.to_string(), options);
        }
        self.persist_recipe_options().await
    }

    async fn persist_user(&self) -> Result<()> {
        let snapshot = self.state.read().user.clone();
        write_json_atomic(&self.user_models_path, &snapshot).await
    }

    async fn persist_recipe_options(&self) -> Result<()> {
        let snapshot = self.state.read().recipe_options.clone();
        write_json_atomic(&self.recipe_options_path, &snapshot).await
    }
}

pub fn default_paths(data_dir: &Path) -> (PathBuf, PathBuf) {
    (
        data_dir.join("user_models.json"),
        data_dir.join("recipe_options.json"),
    )
}
