//! Crawl runs: the coordinator that drives fetch, extract, resolve and
//! append for every catalog entry, and the channel it reports progress on.

mod coordinator;
mod progress;

pub use coordinator::{CrawlCoordinator, CrawlError, CrawlState, RunSummary};
pub use progress::{channel, Poll, ProgressEvent, ProgressReceiver, ProgressSender};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation request checked between catalog entries. A fetch in flight
/// is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
