pub mod output;
pub mod process;

pub use output::OutputBuffer;
pub use process::{start, LogSink, NullSink, ProcessHandle, ProcessState, SpawnSpec, GRACEFUL_STOP_TIMEOUT};
