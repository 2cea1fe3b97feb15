//! Domain types shared across the router's crates: model catalog types,
//! the error enum, configuration, and structured trace events.

pub mod capability;
pub mod config;
pub mod error;
pub mod model;
pub mod trace;

pub use capability::{Capability, Operation};
pub use config::Config;
pub use error::{Error, Result};
pub use model::{ImageDefaults, LoadedInstanceInfo, ModelInfo, ModelType, Recipe, RecipeOptions};
pub use trace::TraceEvent;
