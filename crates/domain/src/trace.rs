use serde::Serialize;

/// Structured trace events emitted across the router's crates. Attached to
/// a `tracing::info!`/`warn!` line as a JSON-encoded `trace_event` field so
/// operators can filter the log stream by event kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ModelLoaded {
        model_id: String,
        recipe: String,
        port: u16,
        pid: u32,
        duration_ms: u64,
    },
    ModelEvicted {
        model_id: String,
        recipe: String,
        reason: String,
    },
    LoadFailed {
        model_id: String,
        recipe: String,
        reason: String,
        attempt: u32,
    },
    RequestForwarded {
        model_id: String,
        operation: String,
        streaming: bool,
        status: u16,
        duration_ms: u64,
    },
    Cancelled {
        model_id: String,
        operation: String,
    },
    ProcessStarted {
        model_id: String,
        pid: u32,
        port: u16,
    },
    ProcessStopped {
        model_id: String,
        pid: u32,
        graceful: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "lmr_event");
    }
}
