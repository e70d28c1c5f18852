use axum::{
    body::Bytes,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chime_core::response::ApiResult;
use chime_domain::recurrence::Recurring;
use chime_domain::request::CallbackRequest;

use crate::domain::repository::{DispatchQueue, EventRepository};
use crate::domain::types::{Event, EventFilter};
use crate::error::SchedulerServiceError;
use crate::state::AppState;
use crate::usecase::scheduler::EventInput;

#[derive(Debug, Deserialize)]
pub struct EventPath {
    pub slug: String,
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub slug: String,
    pub key: String,
    pub request: CallbackRequest,
    #[serde(serialize_with = "chime_core::serde::to_epoch_ms")]
    pub run_at: DateTime<Utc>,
    pub recurring: Recurring,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_response: Option<String>,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            slug: event.slug,
            key: event.key,
            request: event.request,
            run_at: event.run_at,
            recurring: event.recurring,
            failed: event.failed,
            failed_code: event.failed_code,
            failed_response: event.failed_response,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

fn parse_input(body: &Bytes) -> Result<EventInput, SchedulerServiceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(EventInput::default());
    }
    serde_json::from_slice(body).map_err(|e| SchedulerServiceError::InvalidJson(e.to_string()))
}

// ── GET /readyz ──────────────────────────────────────────────────────────────

pub async fn readyz<R, Q>(State(state): State<AppState<R, Q>>) -> Result<StatusCode, SchedulerServiceError>
where
    R: EventRepository,
    Q: DispatchQueue,
{
    state.scheduler.dispatcher.queue_handle().ping().await?;
    Ok(StatusCode::OK)
}

// ── POST /{slug}/{key} ───────────────────────────────────────────────────────

pub async fn add_event<R, Q>(
    State(state): State<AppState<R, Q>>,
    Path(path): Path<EventPath>,
    body: Bytes,
) -> Result<ApiResult<EventResponse>, SchedulerServiceError>
where
    R: EventRepository,
    Q: DispatchQueue,
{
    let input = parse_input(&body)?;
    let event = state.scheduler.add(&path.slug, &path.key, &input).await?;
    Ok(ApiResult(event.into()))
}

// ── PUT /{slug}/{key} ────────────────────────────────────────────────────────

pub async fn update_event<R, Q>(
    State(state): State<AppState<R, Q>>,
    Path(path): Path<EventPath>,
    body: Bytes,
) -> Result<ApiResult<EventResponse>, SchedulerServiceError>
where
    R: EventRepository,
    Q: DispatchQueue,
{
    let input = parse_input(&body)?;
    let event = state.scheduler.update(&path.slug, &path.key, &input).await?;
    Ok(ApiResult(event.into()))
}

// ── DELETE /{slug}/{key} ─────────────────────────────────────────────────────

pub async fn delete_event<R, Q>(
    State(state): State<AppState<R, Q>>,
    Path(path): Path<EventPath>,
) -> Result<ApiResult<DeleteResponse>, SchedulerServiceError>
where
    R: EventRepository,
    Q: DispatchQueue,
{
    let deleted = state.scheduler.del(&path.slug, &path.key).await?;
    Ok(ApiResult(DeleteResponse { deleted }))
}

// ── GET /{slug}/{key} ────────────────────────────────────────────────────────

pub async fn get_event<R, Q>(
    State(state): State<AppState<R, Q>>,
    Path(path): Path<EventPath>,
) -> Result<ApiResult<EventResponse>, SchedulerServiceError>
where
    R: EventRepository,
    Q: DispatchQueue,
{
    let event = state
        .scheduler
        .get(&path.slug, &path.key)
        .await?
        .ok_or(SchedulerServiceError::EventNotFound)?;
    Ok(ApiResult(event.into()))
}

// ── GET /list ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub slug: Option<String>,
    /// Epoch milliseconds, inclusive.
    pub before: Option<i64>,
    /// Epoch milliseconds, inclusive.
    pub after: Option<i64>,
    #[serde(default)]
    pub failed: bool,
}

fn query_instant(name: &str, ms: Option<i64>) -> Result<Option<DateTime<Utc>>, SchedulerServiceError> {
    ms.map(|ms| {
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| SchedulerServiceError::InvalidQuery(format!("{name} is out of range")))
    })
    .transpose()
}

impl ListQuery {
    fn into_filter(self) -> Result<EventFilter, SchedulerServiceError> {
        Ok(EventFilter {
            before: query_instant("before", self.before)?,
            after: query_instant("after", self.after)?,
            slug: self.slug,
            failed: self.failed,
        })
    }
}

pub async fn list_events<R, Q>(
    State(state): State<AppState<R, Q>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<ApiResult<Vec<EventResponse>>, SchedulerServiceError>
where
    R: EventRepository,
    Q: DispatchQueue,
{
    let Query(query) = query.map_err(|e| SchedulerServiceError::InvalidQuery(e.body_text()))?;
    let events = state.scheduler.list(&query.into_filter()?).await?;
    Ok(ApiResult(events.into_iter().map(EventResponse::from).collect()))
}
