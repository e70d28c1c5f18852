use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::domain::repository::{CallbackClient, DispatchQueue, EventRepository};
use crate::domain::types::Event;
use crate::error::{CallbackError, SchedulerServiceError};
use crate::usecase::event::EventService;
use crate::usecase::outcome::{Outcome, OutcomeSender};
use crate::usecase::sleep_or_shutdown;

/// Per-job execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Executing(u32),
    Retrying(u32),
    Done,
    Failed,
    /// Shutdown arrived during a retry delay. The event stays pending and
    /// the next resync queues it again.
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Attempts per job, including the first.
    pub retries: u32,
    pub retry_delay: Duration,
    /// Upper bound of one blocking pop on the ready list.
    pub pop_timeout: Duration,
    /// Delay after an infrastructure error while fetching jobs.
    pub error_backoff: Duration,
}

/// Drains the ready list and executes callbacks, one job at a time.
pub struct Worker<R, Q, C>
where
    R: EventRepository,
    Q: DispatchQueue,
    C: CallbackClient,
{
    pub name: String,
    pub events: EventService<R>,
    pub queue: Q,
    pub client: C,
    pub outcomes: OutcomeSender,
    pub options: WorkerOptions,
}

impl<R, Q, C> Worker<R, Q, C>
where
    R: EventRepository,
    Q: DispatchQueue,
    C: CallbackClient,
{
    /// Claim the next ready hash and resolve its event. `Ok(None)` when the
    /// pop timed out or the event is gone or already failed.
    pub async fn get_job(&self) -> Result<Option<Event>, SchedulerServiceError> {
        let Some(hash) = self.queue.pop_ready(self.options.pop_timeout).await? else {
            return Ok(None);
        };
        let key = self.events.key_from_hash(&hash);
        match self.events.fetch(&key.slug, &key.key).await? {
            None => {
                debug!(worker = %self.name, %hash, "event removed before execution");
                Ok(None)
            }
            Some(event) if event.failed => {
                debug!(worker = %self.name, %hash, "event already failed");
                Ok(None)
            }
            Some(event) => Ok(Some(event)),
        }
    }

    /// Run the job to a terminal state, retrying failed attempts. A retry
    /// delay is cut short by `shutdown`.
    pub async fn execute(&self, mut event: Event, shutdown: &mut watch::Receiver<bool>) -> JobState {
        let mut state = JobState::Executing(1);
        loop {
            state = match state {
                JobState::Executing(attempt) => match self.client.execute(&event.request).await {
                    Ok(response) => {
                        debug!(worker = %self.name, slug = %event.slug, key = %event.key, status = response.status, "callback succeeded");
                        self.outcomes.send(Outcome::Done { event: event.clone(), response }).await;
                        JobState::Done
                    }
                    Err(error) if attempt >= self.options.retries => {
                        self.fail(&mut event, attempt, error).await;
                        JobState::Failed
                    }
                    Err(error) => {
                        warn!(worker = %self.name, slug = %event.slug, key = %event.key, attempt, error = %error, "callback failed, retrying");
                        self.outcomes
                            .send(Outcome::Retry { event: event.clone(), attempt, error })
                            .await;
                        JobState::Retrying(attempt)
                    }
                },
                JobState::Retrying(attempt) => {
                    if sleep_or_shutdown(shutdown, self.options.retry_delay).await {
                        info!(worker = %self.name, slug = %event.slug, key = %event.key, attempt, "retry interrupted by shutdown");
                        JobState::Interrupted
                    } else {
                        JobState::Executing(attempt + 1)
                    }
                }
                JobState::Done | JobState::Failed | JobState::Interrupted => return state,
            };
        }
    }

    async fn fail(&self, event: &mut Event, attempt: u32, error: CallbackError) {
        match self.events.fail(event, error.payload(), error.code()).await {
            Ok(false) => {
                debug!(worker = %self.name, slug = %event.slug, key = %event.key, "event removed while in flight, failure not recorded");
            }
            Ok(true) => {
                self.outcomes
                    .send(Outcome::Failed { event: event.clone(), attempt, error })
                    .await;
            }
            Err(store_error) => {
                error!(worker = %self.name, slug = %event.slug, key = %event.key, error = %store_error, "could not record failure");
                self.outcomes
                    .send(Outcome::WorkerError { worker: self.name.clone(), error: store_error })
                    .await;
            }
        }
    }

    /// Worker loop. Runs until `shutdown` broadcasts `true`. An in-flight
    /// callback is finished first; remaining retries are dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.name, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.get_job().await {
                Ok(Some(event)) => {
                    self.execute(event, &mut shutdown).await;
                }
                Ok(None) => {}
                Err(error) => {
                    error!(worker = %self.name, error = %error, "failed to fetch job");
                    self.outcomes
                        .send(Outcome::WorkerError { worker: self.name.clone(), error })
                        .await;
                    if sleep_or_shutdown(&mut shutdown, self.options.error_backoff).await {
                        break;
                    }
                }
            }
        }
        info!(worker = %self.name, "worker stopped");
    }
}
