pub mod fake;
pub mod flm;
pub mod install;
pub mod kokoro;
pub mod llamacpp;
pub mod npu;
pub mod ryzenai_llm;
pub mod sd_cpp;
pub mod traits;
pub mod whispercpp;

pub use fake::FakeAdapter;
pub use flm::FlmAdapter;
pub use kokoro::KokoroAdapter;
pub use llamacpp::LlamacppAdapter;
pub use ryzenai_llm::RyzenaiLlmAdapter;
pub use sd_cpp::SdCppAdapter;
pub use traits::{BackendAdapter, BackendKind, InstallOutcome};
pub use whispercpp::WhispercppAdapter;

use std::path::Path;
use std::sync::Arc;

use lmr_domain::model::Recipe;

/// Construct the concrete adapter for a recipe, rooted under `install_root`
/// (each recipe gets its own subdirectory, e.g. `<install_root>/llamacpp`).
pub fn adapter_for(recipe: Recipe, install_root: &Path) -> Arc<dyn BackendAdapter> {
    let dir = install_root.join(recipe.as_str());
    match recipe {
        Recipe::Llamacpp => Arc::new(LlamacppAdapter::new(dir)),
        Recipe::Flm => Arc::new(FlmAdapter::new(dir)),
        Recipe::RyzenaiLlm => Arc::new(RyzenaiLlmAdapter::new(dir)),
        Recipe::Whispercpp => Arc::new(WhispercppAdapter::new(dir)),
        Recipe::SdCpp => Arc::new(SdCppAdapter::new(dir)),
        Recipe::Kokoro => Arc::new(KokoroAdapter::new(dir)),
    }
}
