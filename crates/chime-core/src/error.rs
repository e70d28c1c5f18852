use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Error that can be rendered as the `{"error": {...}}` envelope.
pub trait ApiError: std::error::Error {
    fn status(&self) -> StatusCode;
    fn kind(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: u16,
    kind: &'a str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

/// Render any [`ApiError`] as `{"error": {"code", "kind", "message"}}` with a
/// matching status.
pub fn error_response<E: ApiError + ?Sized>(err: &E) -> Response {
    let status = err.status();
    let body = ErrorEnvelope {
        error: ErrorBody {
            code: status.as_u16(),
            kind: err.kind(),
            message: err.to_string(),
        },
    };
    (status, Json(body)).into_response()
}
