//! The Load Coordinator: owns every running backend instance, enforces
//! per-model-type capacity and NPU exclusivity, and serializes concurrent
//! loads of the same model.

pub mod cache;
pub mod instance;
pub mod port;

pub use cache::{AdapterFactory, LoadCoordinator, Timing};
pub use instance::{LoadedInstance, Release};
pub use port::choose_free_port;
