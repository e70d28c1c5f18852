use chrono::{DateTime, TimeDelta, Utc};

use chime_domain::key::EventKey;
use chime_domain::recurrence::Recurring;
use chime_domain::request::{CallbackRequest, RequestChanges};

/// Slugs that collide with fixed routes.
pub const RESERVED_SLUGS: &[&str] = &["list", "healthz", "readyz"];

/// A scheduled callback, identified by `(slug, key)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub slug: String,
    pub key: String,
    pub request: CallbackRequest,
    /// Next due instant. Past values mean overdue.
    pub run_at: DateTime<Utc>,
    pub recurring: Recurring,
    pub failed: bool,
    pub failed_code: Option<i32>,
    pub failed_response: Option<String>,
}

impl Event {
    pub fn new(
        slug: impl Into<String>,
        key: impl Into<String>,
        request: CallbackRequest,
        run_at: DateTime<Utc>,
        recurring: Recurring,
    ) -> Self {
        Self {
            slug: slug.into(),
            key: key.into(),
            request,
            run_at,
            recurring,
            failed: false,
            failed_code: None,
            failed_response: None,
        }
    }

    pub fn event_key(&self) -> EventKey {
        EventKey::new(self.slug.clone(), self.key.clone())
    }

    pub fn hash(&self, delimiter: &str) -> String {
        self.event_key().hash(delimiter)
    }

    /// Whether the event belongs in the dispatch structure for a horizon
    /// ending at `horizon_end`. Overdue events are inside.
    pub fn is_due_by(&self, horizon_end: DateTime<Utc>) -> bool {
        !self.failed && self.run_at <= horizon_end
    }

    pub fn apply(&mut self, changes: &EventChanges) {
        match &changes.request {
            Some(RequestUpdate::Replace(request)) => self.request = request.clone(),
            Some(RequestUpdate::Merge(partial)) => self.request.merge(partial),
            None => {}
        }
        if let Some(run_at) = changes.run_at {
            self.run_at = run_at;
        }
        if let Some(recurring) = changes.recurring {
            self.recurring = recurring;
        }
        if let Some(failed) = changes.failed {
            self.failed = failed;
        }
        if let Some(code) = changes.failed_code {
            self.failed_code = code;
        }
        if let Some(response) = &changes.failed_response {
            self.failed_response.clone_from(response);
        }
    }
}

/// How a change set touches the stored request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestUpdate {
    Replace(CallbackRequest),
    Merge(RequestChanges),
}

/// Partial update of an [`Event`]. `None` leaves the stored field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventChanges {
    pub request: Option<RequestUpdate>,
    pub run_at: Option<DateTime<Utc>>,
    pub recurring: Option<Recurring>,
    pub failed: Option<bool>,
    pub failed_code: Option<Option<i32>>,
    pub failed_response: Option<Option<String>>,
}

impl EventChanges {
    pub fn is_empty(&self) -> bool {
        self.request.is_none()
            && self.run_at.is_none()
            && self.recurring.is_none()
            && self.failed.is_none()
            && self.failed_code.is_none()
            && self.failed_response.is_none()
    }

    /// Every mutable field of `event`, replacing whatever is stored.
    pub fn full(event: &Event) -> Self {
        Self {
            request: Some(RequestUpdate::Replace(event.request.clone())),
            run_at: Some(event.run_at),
            recurring: Some(event.recurring),
            failed: Some(event.failed),
            failed_code: Some(event.failed_code),
            failed_response: Some(event.failed_response.clone()),
        }
    }

    pub fn reschedule(run_at: DateTime<Utc>) -> Self {
        Self {
            run_at: Some(run_at),
            ..Default::default()
        }
    }

    pub fn failure(code: i32, response: String) -> Self {
        Self {
            failed: Some(true),
            failed_code: Some(Some(code)),
            failed_response: Some(Some(response)),
            ..Default::default()
        }
    }
}

/// Range query over stored events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub slug: Option<String>,
    /// Inclusive upper bound on `run_at`.
    pub before: Option<DateTime<Utc>>,
    /// Inclusive lower bound on `run_at`.
    pub after: Option<DateTime<Utc>>,
    /// Select failed events instead of pending ones.
    pub failed: bool,
}

impl EventFilter {
    /// Pending events due within `horizon` of `now`.
    pub fn horizon(now: DateTime<Utc>, horizon: TimeDelta) -> Self {
        Self {
            before: Some(now.checked_add_signed(horizon).unwrap_or(DateTime::<Utc>::MAX_UTC)),
            ..Default::default()
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        event.failed == self.failed
            && self.slug.as_ref().is_none_or(|slug| &event.slug == slug)
            && self.before.is_none_or(|before| event.run_at <= before)
            && self.after.is_none_or(|after| event.run_at >= after)
    }
}

/// Member of the ordered dispatch set: event hash scored by due epoch millis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEntry {
    pub hash: String,
    pub score: i64,
}

/// Successful callback response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResponse {
    pub status: u16,
    pub body: String,
}
