//! Progress channel between a running crawl and its observer.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::models::Price;

/// Events emitted during a crawl run, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Run started with this many entries
    RunStarted {
        total: usize,
        observed_at: DateTime<Utc>,
    },
    /// Entry is about to be fetched
    EntryStarted { index: usize, link: String },
    /// Observation stored
    EntryFinished {
        index: usize,
        link: String,
        stock_amount: Option<i64>,
        price: Option<Price>,
        snapshot: bool,
    },
    /// Entry could not be fetched; the run continues
    EntryFailed {
        index: usize,
        link: String,
        reason: String,
    },
    /// Link already visited earlier in this run; not fetched again
    EntrySkipped { index: usize, link: String },
    /// Snapshot capture failed; the observation is stored without one
    SnapshotSkipped { link: String, reason: String },
    /// Every entry was attempted
    RunCompleted { succeeded: usize, failed: usize },
    /// Stopped between entries on request
    RunCancelled {
        succeeded: usize,
        failed: usize,
        remaining: usize,
    },
    /// Unrecoverable failure
    RunAborted { reason: String },
}

impl ProgressEvent {
    /// Failures and skips, logged at warn level.
    pub fn is_problem(&self) -> bool {
        matches!(
            self,
            Self::EntryFailed { .. } | Self::SnapshotSkipped { .. } | Self::RunAborted { .. }
        )
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunStarted { total, observed_at } => {
                write!(f, "run started: {} entries at {}", total, observed_at.to_rfc3339())
            }
            Self::EntryStarted { link, .. } => write!(f, "entry started {}", link),
            Self::EntryFinished { link, .. } => write!(f, "entry finished {}", link),
            Self::EntryFailed { link, reason, .. } => {
                write!(f, "entry failed {}: {}", link, reason)
            }
            Self::EntrySkipped { link, .. } => {
                write!(f, "entry skipped {}: already visited in this run", link)
            }
            Self::SnapshotSkipped { link, reason } => {
                write!(f, "snapshot skipped {}: {}", link, reason)
            }
            Self::RunCompleted { succeeded, failed } => {
                write!(f, "run completed: {} succeeded, {} failed", succeeded, failed)
            }
            Self::RunCancelled {
                succeeded,
                failed,
                remaining,
            } => write!(
                f,
                "run cancelled: {} succeeded, {} failed, {} not attempted",
                succeeded, failed, remaining
            ),
            Self::RunAborted { reason } => write!(f, "run aborted: {}", reason),
        }
    }
}

/// Outcome of a non-blocking or timed receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    Event(ProgressEvent),
    /// Nothing available yet; the run is still going
    Empty,
    /// The coordinator is gone and every event has been received
    Closed,
}

/// Create a connected sender/receiver pair.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx }, ProgressReceiver { rx })
}

/// Producer half, owned by the coordinator.
#[derive(Debug)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    /// Queue an event. Never blocks; an observer that went away does not
    /// affect the run.
    pub fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Consumer half, owned by the observer.
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressReceiver {
    /// Take the next event if one is queued.
    pub fn try_next(&mut self) -> Poll {
        match self.rx.try_recv() {
            Ok(event) => Poll::Event(event),
            Err(TryRecvError::Empty) => Poll::Empty,
            Err(TryRecvError::Disconnected) => Poll::Closed,
        }
    }

    /// Wait up to `timeout` for the next event.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Poll {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => Poll::Event(event),
            Ok(None) => Poll::Closed,
            Err(_) => Poll::Empty,
        }
    }

    /// Wait for the next event; `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }
}
