use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ResultEnvelope<T> {
    result: T,
}

/// Successful response wrapped as `{"result": ...}` with status 200.
#[derive(Debug)]
pub struct ApiResult<T>(pub T);

impl<T: Serialize> IntoResponse for ApiResult<T> {
    fn into_response(self) -> Response {
        Json(ResultEnvelope { result: self.0 }).into_response()
    }
}
