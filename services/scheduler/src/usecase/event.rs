use anyhow::anyhow;
use chrono_tz::Tz;

use chime_domain::key::EventKey;

use crate::domain::repository::EventRepository;
use crate::domain::types::{Event, EventChanges, EventFilter, RESERVED_SLUGS};
use crate::error::SchedulerServiceError;

/// What [`EventService::recur`] did with an executed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurred {
    Rescheduled,
    Destroyed,
    /// The record was deleted before the new `run_at` could be stored.
    Removed,
}

/// Persistence operations on events. Every operation validates the slug
/// before touching the store.
#[derive(Clone)]
pub struct EventService<R: EventRepository> {
    pub repo: R,
    pub delimiter: String,
}

impl<R: EventRepository> EventService<R> {
    pub fn new(repo: R, delimiter: impl Into<String>) -> Self {
        Self {
            repo,
            delimiter: delimiter.into(),
        }
    }

    pub fn validate_slug(&self, slug: &str) -> Result<(), SchedulerServiceError> {
        if slug.is_empty() {
            return Err(SchedulerServiceError::MissingSlug);
        }
        if slug.contains(self.delimiter.as_str()) {
            return Err(SchedulerServiceError::InvalidSlug(format!(
                "{slug:?} contains the reserved delimiter {:?}",
                self.delimiter
            )));
        }
        if RESERVED_SLUGS.contains(&slug) {
            return Err(SchedulerServiceError::InvalidSlug(format!(
                "{slug:?} is reserved"
            )));
        }
        Ok(())
    }

    pub fn hash_of(&self, event: &Event) -> String {
        event.hash(&self.delimiter)
    }

    pub fn key_from_hash(&self, hash: &str) -> EventKey {
        EventKey::from_hash(hash, &self.delimiter)
    }

    pub async fn fetch(&self, slug: &str, key: &str) -> Result<Option<Event>, SchedulerServiceError> {
        self.validate_slug(slug)?;
        self.repo.find_one(slug, key).await
    }

    pub async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, SchedulerServiceError> {
        if let Some(slug) = &filter.slug {
            self.validate_slug(slug)?;
        }
        self.repo.find_range(filter).await
    }

    /// Persist `changes` (or every mutable field when `None`) and refresh
    /// `event` with the stored record.
    pub async fn save(
        &self,
        event: &mut Event,
        changes: Option<EventChanges>,
    ) -> Result<(), SchedulerServiceError> {
        self.validate_slug(&event.slug)?;
        let changes = match changes {
            Some(changes) if changes.is_empty() => {
                return Err(SchedulerServiceError::MissingUpdates);
            }
            Some(changes) => changes,
            None => EventChanges::full(event),
        };
        *event = self.repo.upsert(event, &changes).await?;
        Ok(())
    }

    /// Persist `changes` onto the stored record only, refreshing `event`.
    /// Returns `false`, writing nothing, when the record no longer exists.
    pub async fn amend(&self, event: &mut Event, changes: EventChanges) -> Result<bool, SchedulerServiceError> {
        self.validate_slug(&event.slug)?;
        if changes.is_empty() {
            return Err(SchedulerServiceError::MissingUpdates);
        }
        match self.repo.update(event, &changes).await? {
            Some(stored) => {
                *event = stored;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn destroy(&self, event: &Event) -> Result<bool, SchedulerServiceError> {
        self.delete(&event.slug, &event.key).await
    }

    /// Remove by identity. Returns whether a record existed.
    pub async fn delete(&self, slug: &str, key: &str) -> Result<bool, SchedulerServiceError> {
        self.validate_slug(slug)?;
        self.repo.remove(slug, key).await
    }

    /// Record a terminal callback failure on the event. Returns `false` when
    /// the event was deleted in the meantime.
    pub async fn fail(
        &self,
        event: &mut Event,
        payload: String,
        code: i32,
    ) -> Result<bool, SchedulerServiceError> {
        self.amend(event, EventChanges::failure(code, payload)).await
    }

    /// Advance a recurring event to its next occurrence and persist the new
    /// `run_at`; a one-shot event is destroyed instead.
    pub async fn recur(&self, event: &mut Event, zone: &Tz) -> Result<Recurred, SchedulerServiceError> {
        let Some(rule) = event.recurring.rule() else {
            self.destroy(event).await?;
            return Ok(Recurred::Destroyed);
        };
        let next = rule.advance(event.run_at, zone).ok_or_else(|| {
            anyhow!(
                "recurrence of {} overflows after {}",
                event.event_key(),
                event.run_at
            )
        })?;
        if !self.amend(event, EventChanges::reschedule(next)).await? {
            return Ok(Recurred::Removed);
        }
        Ok(Recurred::Rescheduled)
    }
}
