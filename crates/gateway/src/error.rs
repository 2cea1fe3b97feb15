//! Maps the workspace's typed `Error` onto the `{error:{message,type,code?}}`
//! HTTP envelope. Kept in the gateway crate, not `lmr-domain`, since the
//! shape is an HTTP-boundary concern; lower crates only need `status_code()`
//! and `type_tag()`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use lmr_domain::error::Error;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": {
                "message": err.to_string(),
                "type": err.type_tag(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// An `event: error` SSE frame carrying the same envelope shape, for errors
/// surfaced mid-stream rather than as the initial response.
pub fn sse_error_frame(err: &Error) -> String {
    json!({
        "error": {
            "message": err.to_string(),
            "type": err.type_tag(),
        }
    })
    .to_string()
}

pub type ApiResult<T> = Result<T, ApiError>;
