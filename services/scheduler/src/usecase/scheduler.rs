use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use chime_domain::key::EventKey;
use chime_domain::recurrence::Recurring;
use chime_domain::request::{CallbackRequest, DEFAULT_METHOD, RequestChanges};

use crate::domain::repository::{DispatchQueue, EventRepository};
use crate::domain::types::{Event, EventChanges, EventFilter, RequestUpdate};
use crate::error::SchedulerServiceError;
use crate::usecase::dispatcher::Dispatcher;
use crate::usecase::event::{EventService, Recurred};
use crate::usecase::outcome::Outcome;
use crate::usecase::sleep_or_shutdown;

/// Body of an add or update call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventInput {
    /// Absolute due time, epoch milliseconds.
    pub run_at: Option<i64>,
    /// Relative due time, seconds from now. Ignored when `run_at` is set.
    pub run_in: Option<f64>,
    pub request: Option<RequestChanges>,
    pub recurring: Option<Recurring>,
}

impl EventInput {
    fn resolve_run_at(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, SchedulerServiceError> {
        if let Some(ms) = self.run_at {
            return DateTime::from_timestamp_millis(ms)
                .map(Some)
                .ok_or_else(|| SchedulerServiceError::InvalidJson(format!("run_at {ms} is out of range")));
        }
        let Some(secs) = self.run_in else {
            return Ok(None);
        };
        let out_of_range = || SchedulerServiceError::InvalidJson(format!("run_in {secs} is out of range"));
        if !secs.is_finite() {
            return Err(out_of_range());
        }
        let offset = TimeDelta::try_milliseconds((secs * 1000.0).round() as i64).ok_or_else(out_of_range)?;
        now.checked_add_signed(offset).map(Some).ok_or_else(out_of_range)
    }

    fn validated_recurring(&self) -> Result<Option<Recurring>, SchedulerServiceError> {
        match self.recurring {
            Some(Recurring::Every(rule)) if rule.is_empty() => Err(SchedulerServiceError::InvalidRecurrence(
                "at least one unit must be non-zero".to_owned(),
            )),
            other => Ok(other),
        }
    }

    fn full_request(&self) -> Result<CallbackRequest, SchedulerServiceError> {
        let Some(partial) = &self.request else {
            return Err(SchedulerServiceError::MissingRequest);
        };
        let request = CallbackRequest {
            href: partial.href.clone().unwrap_or_default(),
            method: partial.method.clone().unwrap_or_else(|| DEFAULT_METHOD.to_owned()),
            headers: partial.headers.clone().unwrap_or_default(),
            body: partial.body.clone().unwrap_or_default(),
        };
        if !request.has_href() {
            return Err(SchedulerServiceError::MissingRequest);
        }
        Ok(request)
    }

    /// Changes for an update. A new `run_at` re-arms a failed event.
    fn changes(&self, now: DateTime<Utc>) -> Result<EventChanges, SchedulerServiceError> {
        let mut changes = EventChanges {
            request: self
                .request
                .clone()
                .filter(|request| !request.is_empty())
                .map(RequestUpdate::Merge),
            run_at: self.resolve_run_at(now)?,
            recurring: self.validated_recurring()?,
            ..Default::default()
        };
        if changes.run_at.is_some() {
            changes.failed = Some(false);
            changes.failed_code = Some(None);
            changes.failed_response = Some(None);
        }
        if changes.is_empty() {
            return Err(SchedulerServiceError::MissingUpdates);
        }
        Ok(changes)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Width of the dispatch horizon; also the resync period.
    pub horizon: TimeDelta,
    pub resync_backoff: Duration,
    /// Zone for calendar recurrence units.
    pub zone: Tz,
    pub retain_failed: bool,
    pub upsert: bool,
}

impl SchedulerOptions {
    fn interval(&self) -> Duration {
        self.horizon.to_std().unwrap_or(Duration::from_secs(1))
    }
}

/// Orchestrates the public event API, worker outcomes and the periodic
/// resync of the dispatch structure from the store.
#[derive(Clone)]
pub struct Scheduler<R: EventRepository, Q: DispatchQueue> {
    pub events: EventService<R>,
    pub dispatcher: Dispatcher<Q>,
    pub options: SchedulerOptions,
}

impl<R: EventRepository, Q: DispatchQueue> Scheduler<R, Q> {
    fn horizon_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.options.horizon)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Queue the event if it is due within the horizon, otherwise make sure
    /// the dispatch structure does not hold it.
    async fn sync_dispatch(&self, event: &Event) -> Result<(), SchedulerServiceError> {
        if event.is_due_by(self.horizon_end(Utc::now())) {
            self.dispatcher.queue(std::slice::from_ref(event)).await
        } else {
            self.dispatcher.dequeue(std::slice::from_ref(event)).await
        }
    }

    /// Create or replace the event. Replacing clears failure markers.
    pub async fn add(&self, slug: &str, key: &str, input: &EventInput) -> Result<Event, SchedulerServiceError> {
        self.events.validate_slug(slug)?;
        let run_at = input
            .resolve_run_at(Utc::now())?
            .ok_or(SchedulerServiceError::MissingRunAt)?;
        let request = input.full_request()?;
        let recurring = input.validated_recurring()?.unwrap_or_default();

        let mut event = Event::new(slug, key, request, run_at, recurring);
        self.events.save(&mut event, None).await?;
        self.sync_dispatch(&event).await?;
        info!(%slug, %key, run_at = %event.run_at, "event added");
        Ok(event)
    }

    /// Apply a partial update. A missing event is created when upsert is
    /// enabled, otherwise reported as not found.
    pub async fn update(&self, slug: &str, key: &str, input: &EventInput) -> Result<Event, SchedulerServiceError> {
        self.events.validate_slug(slug)?;
        let changes = input.changes(Utc::now())?;

        let Some(mut event) = self.events.fetch(slug, key).await? else {
            if self.options.upsert {
                return self.add(slug, key, input).await;
            }
            return Err(SchedulerServiceError::EventNotFound);
        };
        self.events.save(&mut event, Some(changes)).await?;
        self.sync_dispatch(&event).await?;
        info!(%slug, %key, run_at = %event.run_at, "event updated");
        Ok(event)
    }

    /// Remove the event from the dispatch structure and the store. Returns
    /// whether a stored record existed.
    pub async fn del(&self, slug: &str, key: &str) -> Result<bool, SchedulerServiceError> {
        self.events.validate_slug(slug)?;
        self.dispatcher
            .dequeue_keys(&[EventKey::new(slug, key)])
            .await?;
        let deleted = self.events.delete(slug, key).await?;
        if deleted {
            info!(%slug, %key, "event deleted");
        }
        Ok(deleted)
    }

    pub async fn get(&self, slug: &str, key: &str) -> Result<Option<Event>, SchedulerServiceError> {
        self.events.fetch(slug, key).await
    }

    pub async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, SchedulerServiceError> {
        self.events.list(filter).await
    }

    async fn on_done(&self, executed: Event) -> Result<(), SchedulerServiceError> {
        let Some(mut current) = self.events.fetch(&executed.slug, &executed.key).await? else {
            debug!(slug = %executed.slug, key = %executed.key, "event removed while in flight");
            return Ok(());
        };
        if current.run_at != executed.run_at || current.failed {
            debug!(slug = %current.slug, key = %current.key, "event rescheduled while in flight");
            return Ok(());
        }
        match self.events.recur(&mut current, &self.options.zone).await? {
            Recurred::Rescheduled => {
                self.sync_dispatch(&current).await?;
                debug!(slug = %current.slug, key = %current.key, run_at = %current.run_at, "event recurred");
            }
            Recurred::Destroyed => {
                debug!(slug = %current.slug, key = %current.key, "one-shot event completed");
            }
            Recurred::Removed => {
                debug!(slug = %current.slug, key = %current.key, "event removed while in flight");
            }
        }
        Ok(())
    }

    async fn on_failed(&self, event: Event) -> Result<(), SchedulerServiceError> {
        if !self.options.retain_failed {
            self.events.destroy(&event).await?;
        }
        Ok(())
    }

    /// Apply one worker or dispatcher report.
    pub async fn handle_outcome(&self, outcome: Outcome) {
        match outcome {
            Outcome::Done { event, response } => {
                debug!(slug = %event.slug, key = %event.key, status = response.status, "event executed");
                if let Err(error) = self.on_done(event).await {
                    error!(error = %error, "failed to finalize executed event");
                }
            }
            Outcome::Failed { event, attempt, error } => {
                warn!(slug = %event.slug, key = %event.key, attempt, code = error.code(), error = %error, "event failed");
                if let Err(error) = self.on_failed(event).await {
                    error!(error = %error, "failed to finalize failed event");
                }
            }
            Outcome::Retry { event, attempt, error } => {
                warn!(slug = %event.slug, key = %event.key, attempt, error = %error, "event retry");
            }
            Outcome::WorkerError { worker, error } => {
                error!(%worker, error = %error, "worker error");
            }
            Outcome::DispatcherError { error } => {
                error!(error = %error, "dispatcher error");
            }
            Outcome::Disconnected { reason } => {
                error!(%reason, "dispatch queue disconnected");
            }
            Outcome::Reconnected => info!("dispatch queue reconnected"),
            Outcome::Promoted { hash } => debug!(%hash, "event promoted"),
            Outcome::Paused => info!("dispatch paused"),
            Outcome::Started => info!("dispatch started"),
        }
    }

    /// Outcome loop. Runs until `shutdown` broadcasts `true` or every sender
    /// is gone.
    pub async fn run_outcomes(self, mut outcomes: mpsc::Receiver<Outcome>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                outcome = outcomes.recv() => match outcome {
                    Some(outcome) => self.handle_outcome(outcome).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("outcome loop stopped");
    }

    /// Reload every pending event due within the horizon into the dispatch
    /// structure. Returns how many were queued.
    pub async fn resync_once(&self) -> Result<usize, SchedulerServiceError> {
        let due = self
            .events
            .list(&EventFilter::horizon(Utc::now(), self.options.horizon))
            .await?;
        self.dispatcher.flush_jobs().await?;
        self.dispatcher.queue(&due).await?;
        Ok(due.len())
    }

    /// Resync loop: every interval, or after a short backoff when a cycle
    /// fails.
    pub async fn run_resync(self, mut shutdown: watch::Receiver<bool>) {
        info!("resync loop started");
        loop {
            let delay = match self.resync_once().await {
                Ok(count) => {
                    debug!(count, "dispatch structure resynced");
                    self.options.interval()
                }
                Err(error) => {
                    error!(error = %error, "resync failed");
                    self.options.resync_backoff
                }
            };
            if sleep_or_shutdown(&mut shutdown, delay).await {
                break;
            }
        }
        info!("resync loop stopped");
    }
}
