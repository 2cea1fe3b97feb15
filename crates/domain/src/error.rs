/// Error kinds shared across the router's crates.
///
/// Each variant corresponds to one of the error kinds named in the
/// router's error-handling design: malformed requests, missing models,
/// capacity exhaustion, install/spawn/load failures, and upstream
/// cancellation conditions.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("capacity busy: {0}")]
    CapacityBusy(String),

    #[error("load failed: {0}")]
    LoadFailed(String),

    #[error("install failed: {0}")]
    InstallFailed(String),

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("upstream error: {message}")]
    UpstreamError {
        message: String,
        status: u16,
        model_invalidated: bool,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The `type` string surfaced in the `{error:{message, type, code?}}`
    /// envelope. Stable across error message wording changes.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "bad_request",
            Error::NotFound(_) => "not_found",
            Error::UnsupportedOperation(_) => "unsupported_operation",
            Error::PreconditionFailed(_) => "precondition_failed",
            Error::CapacityBusy(_) => "capacity_busy",
            Error::LoadFailed(_) => "load_failed",
            Error::InstallFailed(_) => "install_failed",
            Error::SpawnFailed(_) => "spawn_failed",
            Error::UpstreamError { .. } => "upstream_error",
            Error::Cancelled => "cancelled",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Config(_) => "config_error",
        }
    }

    /// HTTP status code this error maps to at the gateway boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::NotFound(_) => 404,
            Error::UnsupportedOperation(_) => 400,
            Error::PreconditionFailed(_) => 412,
            Error::CapacityBusy(_) => 503,
            Error::LoadFailed(_) => 502,
            Error::InstallFailed(_) => 502,
            Error::SpawnFailed(_) => 500,
            Error::UpstreamError { status, .. } => *status,
            Error::Cancelled => 499,
            Error::Io(_) | Error::Json(_) | Error::Config(_) => 500,
        }
    }

    /// Whether the error reports that the child signalled its backend
    /// invalidated the currently loaded model (see Backend Adapter
    /// "upgrade invalidates all loaded models of that family").
    pub fn model_invalidated(&self) -> bool {
        matches!(
            self,
            Error::UpstreamError {
                model_invalidated: true,
                ..
            }
        )
    }
}
