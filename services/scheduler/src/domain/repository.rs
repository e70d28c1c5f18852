use std::future::Future;
use std::time::Duration;

use chime_domain::request::CallbackRequest;

use crate::domain::types::{CallbackResponse, DispatchEntry, Event, EventChanges, EventFilter};
use crate::error::{CallbackError, SchedulerServiceError};

// Ports return `Send` futures so generic loops over them can be spawned.

/// Durable event store, unique on `(slug, key)`.
pub trait EventRepository: Clone + Send + Sync + 'static {
    fn find_one(
        &self,
        slug: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<Event>, SchedulerServiceError>> + Send;

    /// Events matching `filter`, ordered by `run_at` ascending.
    fn find_range(
        &self,
        filter: &EventFilter,
    ) -> impl Future<Output = Result<Vec<Event>, SchedulerServiceError>> + Send;

    /// Merge `changes` over the stored record for `event`'s identity (or over
    /// `event` itself when nothing is stored) and return the stored result.
    fn upsert(
        &self,
        event: &Event,
        changes: &EventChanges,
    ) -> impl Future<Output = Result<Event, SchedulerServiceError>> + Send;

    /// Merge `changes` over the stored record only. `None` when no record
    /// exists; nothing is written then.
    fn update(
        &self,
        event: &Event,
        changes: &EventChanges,
    ) -> impl Future<Output = Result<Option<Event>, SchedulerServiceError>> + Send;

    /// Delete a record. Returns `true` if one existed.
    fn remove(
        &self,
        slug: &str,
        key: &str,
    ) -> impl Future<Output = Result<bool, SchedulerServiceError>> + Send;
}

/// Ordered delay set plus FIFO ready list, keyed by event hash.
///
/// Connection-class failures surface as
/// [`SchedulerServiceError::StructureUnavailable`].
pub trait DispatchQueue: Clone + Send + Sync + 'static {
    /// Replace any existing entries for the given hashes in one atomic step.
    fn schedule(
        &self,
        entries: &[DispatchEntry],
    ) -> impl Future<Output = Result<(), SchedulerServiceError>> + Send;

    fn unschedule(
        &self,
        hashes: &[String],
    ) -> impl Future<Output = Result<(), SchedulerServiceError>> + Send;

    /// Drop every entry of the ordered set.
    fn clear(&self) -> impl Future<Output = Result<(), SchedulerServiceError>> + Send;

    /// Atomically move the lowest-scored entry with score `<= now_ms` to the
    /// ready list. Returns the moved hash.
    fn promote_due(
        &self,
        now_ms: i64,
    ) -> impl Future<Output = Result<Option<String>, SchedulerServiceError>> + Send;

    /// Blocking pop from the ready list, giving up after `timeout`.
    fn pop_ready(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<String>, SchedulerServiceError>> + Send;

    fn ping(&self) -> impl Future<Output = Result<(), SchedulerServiceError>> + Send;
}

/// Outbound executor for event callbacks. A non-2xx status is an error.
pub trait CallbackClient: Clone + Send + Sync + 'static {
    fn execute(
        &self,
        request: &CallbackRequest,
    ) -> impl Future<Output = Result<CallbackResponse, CallbackError>> + Send;
}
