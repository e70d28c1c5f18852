use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use chime_core::error::{ApiError, error_response};

/// Code recorded on a failed event when the callback never produced an HTTP
/// status (transport failure or a request that could not be built).
pub const REQUEST_FAILED_CODE: i32 = 501;

/// Scheduler service error variants.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerServiceError {
    #[error("slug is required")]
    MissingSlug,
    #[error("invalid slug: {0}")]
    InvalidSlug(String),
    #[error("run_at or run_in is required")]
    MissingRunAt,
    #[error("request with an href is required")]
    MissingRequest,
    #[error("no fields to update")]
    MissingUpdates,
    #[error("invalid recurring: {0}")]
    InvalidRecurrence(String),
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("event not found")]
    EventNotFound,
    #[error("dispatch queue unavailable: {0}")]
    StructureUnavailable(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl SchedulerServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingSlug => "MISSING_SLUG",
            Self::InvalidSlug(_) => "INVALID_SLUG",
            Self::MissingRunAt => "MISSING_RUN_AT",
            Self::MissingRequest => "MISSING_REQUEST",
            Self::MissingUpdates => "MISSING_UPDATES",
            Self::InvalidRecurrence(_) => "INVALID_RECURRENCE",
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::InvalidQuery(_) => "INVALID_QUERY",
            Self::EventNotFound => "EVENT_NOT_FOUND",
            Self::StructureUnavailable(_) => "STRUCTURE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StructureUnavailable(_))
    }
}

impl ApiError for SchedulerServiceError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingSlug
            | Self::InvalidSlug(_)
            | Self::MissingRunAt
            | Self::MissingRequest
            | Self::MissingUpdates
            | Self::InvalidRecurrence(_)
            | Self::InvalidJson(_)
            | Self::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Self::EventNotFound => StatusCode::NOT_FOUND,
            Self::StructureUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        SchedulerServiceError::kind(self)
    }
}

impl IntoResponse for SchedulerServiceError {
    fn into_response(self) -> Response {
        // 4xx are expected client errors and already visible in the TraceLayer span.
        match &self {
            Self::Internal(e) => {
                tracing::error!(error = ?e, kind = "INTERNAL", "internal error");
            }
            Self::StructureUnavailable(reason) => {
                tracing::error!(error = %reason, kind = "STRUCTURE_UNAVAILABLE", "queue unavailable");
            }
            _ => {}
        }
        error_response(&self)
    }
}

/// Failure of a single callback attempt.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("invalid callback request: {0}")]
    InvalidRequest(String),
    #[error("callback transport error: {0}")]
    Transport(String),
    #[error("callback returned status {code}")]
    Status { code: u16, body: String },
}

impl CallbackError {
    /// Code stored on the event when this error is terminal.
    pub fn code(&self) -> i32 {
        match self {
            Self::Status { code, .. } => i32::from(*code),
            Self::InvalidRequest(_) | Self::Transport(_) => REQUEST_FAILED_CODE,
        }
    }

    /// Payload stored on the event when this error is terminal.
    pub fn payload(&self) -> String {
        match self {
            Self::Status { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}
