use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use chime_domain::key::EventKey;

use crate::domain::repository::DispatchQueue;
use crate::domain::types::{DispatchEntry, Event};
use crate::error::SchedulerServiceError;
use crate::usecase::outcome::{Outcome, OutcomeSender};
use crate::usecase::sleep_or_shutdown;

/// Owns the pending to ready transition of the dispatch structure.
///
/// Clones share the pause switch, so `pause`/`start` on any handle affect the
/// running loop.
#[derive(Clone)]
pub struct Dispatcher<Q: DispatchQueue> {
    queue: Q,
    delimiter: String,
    running: Arc<watch::Sender<bool>>,
    outcomes: OutcomeSender,
    backoff: Duration,
}

impl<Q: DispatchQueue> Dispatcher<Q> {
    pub fn new(
        queue: Q,
        delimiter: impl Into<String>,
        outcomes: OutcomeSender,
        backoff: Duration,
    ) -> Self {
        let (running, _) = watch::channel(true);
        Self {
            queue,
            delimiter: delimiter.into(),
            running: Arc::new(running),
            outcomes,
            backoff,
        }
    }

    pub fn queue_handle(&self) -> &Q {
        &self.queue
    }

    /// Insert the events into the ordered set, replacing stale entries for
    /// the same hashes. Scores never precede the moment of queueing.
    pub async fn queue(&self, events: &[Event]) -> Result<(), SchedulerServiceError> {
        if events.is_empty() {
            return Ok(());
        }
        let now_ms = Utc::now().timestamp_millis();
        let entries: Vec<DispatchEntry> = events
            .iter()
            .map(|event| DispatchEntry {
                hash: event.hash(&self.delimiter),
                score: event.run_at.timestamp_millis().max(now_ms),
            })
            .collect();
        self.queue.schedule(&entries).await?;
        debug!(count = entries.len(), "queued events");
        Ok(())
    }

    pub async fn dequeue(&self, events: &[Event]) -> Result<(), SchedulerServiceError> {
        let keys: Vec<EventKey> = events.iter().map(Event::event_key).collect();
        self.dequeue_keys(&keys).await
    }

    pub async fn dequeue_keys(&self, keys: &[EventKey]) -> Result<(), SchedulerServiceError> {
        if keys.is_empty() {
            return Ok(());
        }
        let hashes: Vec<String> = keys.iter().map(|key| key.hash(&self.delimiter)).collect();
        self.queue.unschedule(&hashes).await
    }

    /// Clear the whole ordered set ahead of a full reload.
    pub async fn flush_jobs(&self) -> Result<(), SchedulerServiceError> {
        self.queue.clear().await
    }

    pub fn pause(&self) {
        if self.running.send_replace(false) {
            info!("dispatcher paused");
            self.outcomes.notify(Outcome::Paused);
        }
    }

    pub fn start(&self) {
        if !self.running.send_replace(true) {
            info!("dispatcher started");
            self.outcomes.notify(Outcome::Started);
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Promote one due entry. Returns `true` when an entry moved and the loop
    /// should try again without waiting.
    async fn step(&self, connected: &mut bool) -> bool {
        if !*connected {
            return match self.queue.ping().await {
                Ok(()) => {
                    *connected = true;
                    info!("dispatch queue reconnected");
                    self.outcomes.notify(Outcome::Reconnected);
                    true
                }
                Err(_) => false,
            };
        }

        match self.queue.promote_due(Utc::now().timestamp_millis()).await {
            Ok(Some(hash)) => {
                debug!(%hash, "promoted to ready queue");
                self.outcomes.notify(Outcome::Promoted { hash });
                true
            }
            Ok(None) => false,
            Err(SchedulerServiceError::StructureUnavailable(reason)) => {
                *connected = false;
                warn!(%reason, "dispatch queue disconnected");
                self.outcomes.notify(Outcome::Disconnected { reason });
                false
            }
            Err(error) => {
                error!(error = %error, "dispatch failed");
                self.outcomes.notify(Outcome::DispatcherError { error });
                false
            }
        }
    }

    /// Dispatch loop. Runs until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("dispatch loop started");
        let mut running = self.running.subscribe();
        let mut connected = true;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let paused = !*running.borrow_and_update();
            if paused {
                tokio::select! {
                    changed = running.changed() => if changed.is_err() { break },
                    changed = shutdown.changed() => if changed.is_err() { break },
                }
                continue;
            }

            if self.step(&mut connected).await {
                continue;
            }
            if sleep_or_shutdown(&mut shutdown, self.backoff).await {
                break;
            }
        }

        info!("dispatch loop stopped");
    }
}
