use tokio::sync::mpsc::{self, error::TrySendError};

use crate::domain::types::{CallbackResponse, Event};
use crate::error::{CallbackError, SchedulerServiceError};

/// Capacity of the outcome channel between workers/dispatcher and the scheduler.
pub const OUTCOME_CHANNEL_CAPACITY: usize = 1024;

/// Report from a worker or the dispatcher to the scheduler.
#[derive(Debug)]
pub enum Outcome {
    /// Callback succeeded; the event must be recurred or destroyed.
    Done {
        event: Event,
        response: CallbackResponse,
    },
    /// Attempt failed and will be retried.
    Retry {
        event: Event,
        attempt: u32,
        error: CallbackError,
    },
    /// Retries exhausted; failure markers are already persisted.
    Failed {
        event: Event,
        attempt: u32,
        error: CallbackError,
    },
    WorkerError {
        worker: String,
        error: SchedulerServiceError,
    },
    Promoted {
        hash: String,
    },
    DispatcherError {
        error: SchedulerServiceError,
    },
    Disconnected {
        reason: String,
    },
    Reconnected,
    Paused,
    Started,
}

impl Outcome {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Done { .. } => "done",
            Self::Retry { .. } => "retry",
            Self::Failed { .. } => "failed",
            Self::WorkerError { .. } => "worker_error",
            Self::Promoted { .. } => "promoted",
            Self::DispatcherError { .. } => "dispatcher_error",
            Self::Disconnected { .. } => "disconnected",
            Self::Reconnected => "reconnected",
            Self::Paused => "paused",
            Self::Started => "started",
        }
    }
}

#[derive(Clone)]
pub struct OutcomeSender {
    tx: mpsc::Sender<Outcome>,
}

pub fn outcome_channel(capacity: usize) -> (OutcomeSender, mpsc::Receiver<Outcome>) {
    let (tx, rx) = mpsc::channel(capacity);
    (OutcomeSender { tx }, rx)
}

impl OutcomeSender {
    /// Deliver an outcome, waiting for channel capacity. Used for outcomes
    /// that require store bookkeeping.
    pub async fn send(&self, outcome: Outcome) {
        if let Err(e) = self.tx.send(outcome).await {
            tracing::debug!(outcome = e.0.name(), "outcome receiver closed");
        }
    }

    /// Deliver an informational notice without waiting; dropped when full.
    pub fn notify(&self, outcome: Outcome) {
        match self.tx.try_send(outcome) {
            Ok(()) => {}
            Err(TrySendError::Full(outcome)) => {
                tracing::debug!(outcome = outcome.name(), "outcome channel full, notice dropped");
            }
            Err(TrySendError::Closed(outcome)) => {
                tracing::debug!(outcome = outcome.name(), "outcome receiver closed");
            }
        }
    }
}
