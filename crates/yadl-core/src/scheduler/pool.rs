//! Worker pool: bounded parallel fetches with serialized result delivery.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::control::CancelFlag;
use crate::fetch::{AudioFetcher, FetchError, FetchRequest, Fetched, ProgressHook};
use crate::ledger::ItemId;
use crate::progress::ProgressTracker;

/// What one attempt produced.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    /// The item's audio file is on disk.
    Completed { path: PathBuf },
    /// The source was a playlist; these entries become child items.
    Expanded { entries: Vec<String> },
    /// The attempt failed; the retry policy decides what happens next.
    Failed(FetchError),
    /// The attempt was cut short by batch cancellation.
    Cancelled,
}

/// Result of one attempt, delivered to the controller one at a time.
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub item: ItemId,
    pub outcome: ItemOutcome,
    /// Bytes transferred during this attempt (also already reported to the
    /// progress tracker as deltas).
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Bounded pool of fetch workers.
///
/// The pool never decides anything about items; it runs the collaborator
/// under the per-item timeout and converts the result into an
/// [`ItemResult`]. Capacity enforcement is cooperative: the controller
/// checks [`WorkerPool::has_capacity`] before spawning.
pub struct WorkerPool {
    fetcher: Arc<dyn AudioFetcher>,
    tracker: Arc<ProgressTracker>,
    cancel: CancelFlag,
    /// When false, in-flight attempts finish even after cancellation; the
    /// fetcher then gets a token that never fires.
    abort_in_flight: bool,
    item_timeout: Option<Duration>,
    concurrency: usize,
    tasks: JoinSet<ItemResult>,
}

impl WorkerPool {
    pub fn new(
        fetcher: Arc<dyn AudioFetcher>,
        tracker: Arc<ProgressTracker>,
        cancel: CancelFlag,
        abort_in_flight: bool,
        item_timeout: Option<Duration>,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            tracker,
            cancel,
            abort_in_flight,
            item_timeout,
            concurrency: concurrency.max(1),
            tasks: JoinSet::new(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.tasks.len() < self.concurrency
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Start one attempt. A playlist reference occupies one slot like any
    /// other item until its expansion result comes back.
    pub fn spawn(&mut self, item: ItemId, request: FetchRequest) {
        let fetcher = Arc::clone(&self.fetcher);
        let tracker = Arc::clone(&self.tracker);
        let cancel = if self.abort_in_flight {
            self.cancel.clone()
        } else {
            CancelFlag::new()
        };
        let item_timeout = self.item_timeout;

        self.tasks.spawn(async move {
            let bytes = Arc::new(AtomicU64::new(0));
            let hook: ProgressHook = {
                let bytes = Arc::clone(&bytes);
                Arc::new(move |delta: u64| {
                    bytes.fetch_add(delta, Ordering::Relaxed);
                    tracker.report_bytes(delta);
                })
            };

            let started = Instant::now();
            let fut = fetcher.fetch(request, hook, cancel);
            let result = match item_timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    // A timed-out attempt is a transient failure.
                    Err(_) => Err(FetchError::Timeout),
                },
                None => fut.await,
            };

            // Only an attempt the fetcher itself aborted counts as
            // cancelled; a real failure after cancellation keeps its
            // classification and its attempt.
            let outcome = match result {
                Ok(Fetched::Audio { path, .. }) => ItemOutcome::Completed { path },
                Ok(Fetched::Playlist { entries }) => ItemOutcome::Expanded { entries },
                Err(FetchError::Cancelled) => ItemOutcome::Cancelled,
                Err(e) => ItemOutcome::Failed(e),
            };

            ItemResult {
                item,
                outcome,
                bytes: bytes.load(Ordering::Relaxed),
                elapsed: started.elapsed(),
            }
        });
    }

    /// Wait for the next finished attempt. Results come back in completion
    /// order, one at a time. Returns None once the pool is idle.
    pub async fn next_result(&mut self) -> Option<ItemResult> {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => return Some(result),
                Err(e) => {
                    // A panicked worker loses its item for this run; the
                    // ledger still holds it InProgress and reconciliation
                    // recovers it on the next load.
                    tracing::error!("fetch worker task failed: {}", e);
                }
            }
        }
        None
    }
}
