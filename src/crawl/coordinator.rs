//! Crawl coordinator.
//!
//! Walks the catalog strictly one entry at a time:
//! fetch -> extract -> resolve identity -> (snapshot) -> append observation.
//! Per-entry failures are reported and skipped; only store failures and a
//! lost browser session abort the run.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::progress::{self, ProgressEvent, ProgressReceiver, ProgressSender};
use super::CancelFlag;
use crate::catalog::{Catalog, CatalogEntry};
use crate::extract::FieldExtractor;
use crate::models::{MetadataPolicy, NewObservation};
use crate::repository::{Store, StoreError};
use crate::scrapers::{FetchError, PageFetcher, Politeness};
use crate::snapshot::{CaptureError, SnapshotCapturer};

/// Errors that end a run early.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Fetcher unusable: {0}")]
    Fetch(#[source] FetchError),

    #[error("Snapshot session unusable: {0}")]
    Capture(#[source] CaptureError),
}

/// Lifecycle of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Running,
    Completed,
    Aborted,
    Cancelled,
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Outcome of a run that was not aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub state: CrawlState,
    /// Timestamp shared by every observation of the run.
    pub observed_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    /// Entries not attempted because the run was cancelled.
    pub remaining: usize,
    /// Entries skipped because their link was already visited in this run.
    pub duplicates: usize,
    pub snapshots: usize,
}

/// Drives one crawl run over a catalog.
pub struct CrawlCoordinator {
    db_path: PathBuf,
    fetcher: Box<dyn PageFetcher>,
    capturer: Option<Box<dyn SnapshotCapturer>>,
    extractor: Box<dyn FieldExtractor>,
    politeness: Politeness,
    policy: MetadataPolicy,
    run_timestamp: Option<DateTime<Utc>>,
    cancel: CancelFlag,
    progress: Option<ProgressSender>,
    state: CrawlState,
}

impl CrawlCoordinator {
    pub fn new(
        db_path: &Path,
        fetcher: Box<dyn PageFetcher>,
        extractor: Box<dyn FieldExtractor>,
    ) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            fetcher,
            capturer: None,
            extractor,
            politeness: Politeness::new(Duration::ZERO),
            policy: MetadataPolicy::default(),
            run_timestamp: None,
            cancel: CancelFlag::new(),
            progress: None,
            state: CrawlState::Idle,
        }
    }

    /// Capture a snapshot for every stored observation.
    pub fn with_capturer(mut self, capturer: Box<dyn SnapshotCapturer>) -> Self {
        self.capturer = Some(capturer);
        self
    }

    /// Minimum gap between the end of one fetch and the start of the next.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.politeness = Politeness::new(delay);
        self
    }

    pub fn with_metadata_policy(mut self, policy: MetadataPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use a fixed run timestamp instead of the wall clock at start.
    pub fn with_run_timestamp(mut self, observed_at: DateTime<Utc>) -> Self {
        self.run_timestamp = Some(observed_at);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    /// Run on a separate task. Events arrive on the returned receiver; it
    /// reports [`super::Poll::Closed`] once the run has ended.
    pub fn spawn(
        self,
        catalog: Catalog,
    ) -> (JoinHandle<Result<RunSummary, CrawlError>>, ProgressReceiver) {
        let (tx, rx) = progress::channel();
        let coordinator = self.with_progress(tx);
        let handle = tokio::spawn(async move { coordinator.run(&catalog).await });
        (handle, rx)
    }

    /// Crawl every catalog entry once.
    ///
    /// The store and any browser session are acquired here and released
    /// before returning, whatever the outcome.
    pub async fn run(mut self, catalog: &Catalog) -> Result<RunSummary, CrawlError> {
        let entries = catalog.entries();
        let observed_at = self
            .run_timestamp
            .unwrap_or_else(|| Utc::now().trunc_subsecs(0));

        self.transition(CrawlState::Running);
        self.emit(ProgressEvent::RunStarted {
            total: entries.len(),
            observed_at,
        });

        let mut store = match Store::open(&self.db_path) {
            Ok(store) => store,
            Err(e) => return Err(self.abort(e.into())),
        };

        let outcome = self.visit_all(&mut store, &entries, observed_at).await;
        self.release_sessions().await;
        let closed = store.close();

        let summary = match (outcome, closed) {
            (Ok(summary), Ok(())) => summary,
            (Err(e), _) => return Err(self.abort(e)),
            (Ok(_), Err(e)) => return Err(self.abort(e.into())),
        };

        self.transition(summary.state);
        match summary.state {
            CrawlState::Cancelled => self.emit(ProgressEvent::RunCancelled {
                succeeded: summary.succeeded,
                failed: summary.failed,
                remaining: summary.remaining,
            }),
            _ => self.emit(ProgressEvent::RunCompleted {
                succeeded: summary.succeeded,
                failed: summary.failed,
            }),
        }

        Ok(summary)
    }

    async fn visit_all(
        &mut self,
        store: &mut Store,
        entries: &[CatalogEntry],
        observed_at: DateTime<Utc>,
    ) -> Result<RunSummary, CrawlError> {
        self.fetcher.open().await.map_err(CrawlError::Fetch)?;
        if let Some(capturer) = self.capturer.as_mut() {
            capturer.open().await.map_err(CrawlError::Capture)?;
        }

        let mut summary = RunSummary {
            state: CrawlState::Completed,
            observed_at,
            succeeded: 0,
            failed: 0,
            remaining: 0,
            duplicates: 0,
            snapshots: 0,
        };
        // One observation per product per run, even if the catalog lists it twice
        let mut visited: HashSet<&str> = HashSet::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested, stopping before {}", entry.link);
                summary.state = CrawlState::Cancelled;
                summary.remaining = entries.len() - index;
                break;
            }

            if !visited.insert(entry.link.as_str()) {
                summary.duplicates += 1;
                self.emit(ProgressEvent::EntrySkipped {
                    index,
                    link: entry.link.clone(),
                });
                continue;
            }

            self.emit(ProgressEvent::EntryStarted {
                index,
                link: entry.link.clone(),
            });

            self.politeness.wait().await;
            let fetched = self.fetcher.fetch(&entry.link).await;
            self.politeness.mark_finished();

            let body = match fetched {
                Ok(body) => body,
                Err(e) if e.is_fatal() => return Err(CrawlError::Fetch(e)),
                Err(e) => {
                    summary.failed += 1;
                    self.emit(ProgressEvent::EntryFailed {
                        index,
                        link: entry.link.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let fields = self.extractor.extract(&body);
            debug!(
                "Extracted from {}: stock={:?} price={:?}",
                entry.link, fields.stock_amount, fields.price
            );

            let product_id = store.resolve(entry, self.policy, observed_at)?;
            let snapshot = self.capture(&entry.link).await?;
            if snapshot.is_some() {
                summary.snapshots += 1;
            }

            let has_snapshot = snapshot.is_some();
            store.append_observation(&NewObservation {
                product_id,
                observed_at,
                stock_amount: fields.stock_amount,
                price: fields.price,
                snapshot,
            })?;

            summary.succeeded += 1;
            self.emit(ProgressEvent::EntryFinished {
                index,
                link: entry.link.clone(),
                stock_amount: fields.stock_amount,
                price: fields.price,
                snapshot: has_snapshot,
            });
        }

        Ok(summary)
    }

    /// Snapshot of `link`, or `None` if capture is disabled or failed for
    /// this page only.
    async fn capture(&mut self, link: &str) -> Result<Option<Vec<u8>>, CrawlError> {
        let Some(capturer) = self.capturer.as_mut() else {
            return Ok(None);
        };

        match capturer.capture(link).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_fatal() => Err(CrawlError::Capture(e)),
            Err(e) => {
                self.emit(ProgressEvent::SnapshotSkipped {
                    link: link.to_string(),
                    reason: e.to_string(),
                });
                Ok(None)
            }
        }
    }

    async fn release_sessions(&mut self) {
        self.fetcher.close().await;
        if let Some(capturer) = self.capturer.as_mut() {
            capturer.close().await;
        }
    }

    fn abort(&mut self, error: CrawlError) -> CrawlError {
        self.transition(CrawlState::Aborted);
        self.emit(ProgressEvent::RunAborted {
            reason: error.to_string(),
        });
        error
    }

    fn transition(&mut self, next: CrawlState) {
        debug!("Crawl state: {} -> {}", self.state, next);
        self.state = next;
    }

    fn emit(&self, event: ProgressEvent) {
        if event.is_problem() {
            warn!("{}", event);
        } else {
            info!("{}", event);
        }
        if let Some(sender) = &self.progress {
            sender.send(event);
        }
    }
}
