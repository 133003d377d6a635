//! Top-level batch driver.
//!
//! Owns the run: loads or creates the ledger, feeds pending items to the
//! worker pool, applies the retry policy to failures, and persists the
//! ledger after every state transition. The controller is the single
//! writer of batch state; workers only read their request and report
//! progress. Results are handled one at a time, and the ledger write for
//! item N is durable before item N+1's result is touched, so a crash
//! leaves at most one item ambiguous — exactly the one the
//! InProgress→Pending reconciliation recovers on the next load.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::YadlConfig;
use crate::control::CancelFlag;
use crate::error::RunError;
use crate::fetch::{AudioFetcher, FetchError, FetchRequest};
use crate::ledger::{
    check_drift, BatchJob, ConfigSnapshot, ItemFailure, ItemId, ItemKind, ItemState, LedgerError,
    LedgerStore, StateCounts,
};
use crate::progress::ProgressTracker;
use crate::retry::{classify, FailureClass, RetryDecision, RetryPolicy};
use crate::scheduler::{DispatchQueue, ItemOutcome, ItemResult, WorkerPool};
use crate::source_list::{batch_id, SourceList};

/// How a run ended. Individual item failures never abort a batch; an
/// `Aborted` run was cancelled and can be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Aborted,
}

/// An item that ended `Failed`, for the end-of-run report.
#[derive(Debug, Clone)]
pub struct FailedItem {
    pub source: String,
    pub line: Option<u32>,
    pub failure: ItemFailure,
}

/// End-of-run summary.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub outcome: RunOutcome,
    pub counts: StateCounts,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
    pub failed: Vec<FailedItem>,
}

/// Drives one batch from ledger load to terminal summary.
pub struct BatchController {
    store: LedgerStore,
    fetcher: Arc<dyn AudioFetcher>,
    config: YadlConfig,
    policy: RetryPolicy,
    cancel: CancelFlag,
    tracker: Arc<ProgressTracker>,
}

impl BatchController {
    pub fn new(
        store: LedgerStore,
        fetcher: Arc<dyn AudioFetcher>,
        config: YadlConfig,
    ) -> Result<Self, RunError> {
        config.validate()?;
        let policy = RetryPolicy::from_config(&config.retry.clone().unwrap_or_default());
        Ok(Self {
            store,
            fetcher,
            config,
            policy,
            cancel: CancelFlag::new(),
            tracker: Arc::new(ProgressTracker::new()),
        })
    }

    /// Token the caller (e.g. a Ctrl-C handler) uses to cancel the batch.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Progress source for a display task.
    pub fn tracker(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.tracker)
    }

    /// Load the ledger for this input, or create one.
    ///
    /// With `resume` set, an existing ledger is reconciled
    /// (InProgress→Pending) and checked against the current input for
    /// drift; a missing one is created fresh. Without `resume`, an
    /// existing ledger is refused so a half-finished batch is never
    /// silently restarted.
    pub fn prepare(
        &self,
        source_path: &Path,
        list: &SourceList,
        resume: bool,
    ) -> Result<BatchJob, RunError> {
        let id = batch_id(source_path);
        if resume {
            match self.store.load(&id) {
                Ok(mut job) => {
                    check_drift(&job, &list.sources)?;
                    job.reconcile();
                    self.store.persist(&mut job)?;
                    tracing::info!(batch = %job.id, "resuming existing batch");
                    return Ok(job);
                }
                Err(LedgerError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let snapshot = ConfigSnapshot::capture(&self.config);
        let mut job = BatchJob::new(id, source_path, &list.sources, snapshot);
        self.store.create(&mut job)?;
        tracing::info!(batch = %job.id, items = job.items.len(), "created batch ledger");
        Ok(job)
    }

    /// Process the batch to a terminal state.
    pub async fn run(&self, job: &mut BatchJob) -> Result<BatchSummary, RunError> {
        let started = Instant::now();
        for item in &job.items {
            self.tracker.report_state(item.id, item.state);
        }

        let mut queue = DispatchQueue::from_items(job.dispatchable());
        let item_timeout = (self.config.item_timeout_secs > 0)
            .then(|| Duration::from_secs(self.config.item_timeout_secs));
        let mut pool = WorkerPool::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.tracker),
            self.cancel.clone(),
            self.config.abort_in_flight_on_cancel,
            item_timeout,
            self.config.max_concurrent_items,
        );

        loop {
            if !self.cancel.is_cancelled() {
                queue.promote_due(Instant::now());
                while pool.has_capacity() {
                    let Some(id) = queue.pop_ready() else { break };
                    // An id can go stale in the queue (e.g. its parent
                    // settled it); skip anything no longer runnable.
                    if !job.item(id).map(|i| i.is_dispatchable()).unwrap_or(false) {
                        continue;
                    }
                    // A crash-reconciled item may already have consumed its
                    // last attempt at dispatch; it gets no further run.
                    if job.item(id).map(|i| i.attempts).unwrap_or(0) >= self.policy.max_attempts {
                        self.fail_exhausted(job, id)?;
                        continue;
                    }
                    job.begin_attempt(id);
                    self.store.persist(job)?;
                    self.tracker.report_state(id, ItemState::InProgress);
                    let request = self.request_for(job, id);
                    pool.spawn(id, request);
                }
            }

            if pool.is_idle() {
                if self.cancel.is_cancelled() || queue.is_empty() {
                    break;
                }
                match queue.next_deadline() {
                    Some(deadline) => {
                        self.sleep_until(deadline).await;
                        continue;
                    }
                    // Ready items were all consumed above; nothing left.
                    None => break,
                }
            }

            let Some(result) = pool.next_result().await else {
                continue;
            };
            self.handle_result(job, &mut queue, result);
            self.store.persist(job)?;
        }

        let outcome = if job.is_complete() {
            RunOutcome::Completed
        } else {
            RunOutcome::Aborted
        };
        let snapshot = self.tracker.snapshot();
        let summary = BatchSummary {
            outcome,
            counts: job.counts(),
            bytes_transferred: snapshot.bytes_transferred,
            elapsed: started.elapsed(),
            failed: job
                .failed_items()
                .into_iter()
                .map(|i| FailedItem {
                    source: i.source.clone(),
                    line: i.line,
                    failure: i.last_error.clone().unwrap_or(ItemFailure {
                        class: FailureClass::Permanent,
                        message: "unknown failure".to_string(),
                    }),
                })
                .collect(),
        };
        tracing::info!(
            batch = %job.id,
            ?outcome,
            succeeded = summary.counts.succeeded,
            failed = summary.counts.failed,
            "batch run finished"
        );
        Ok(summary)
    }

    /// Sleep until a backoff deadline, waking early on cancellation.
    async fn sleep_until(&self, deadline: Instant) {
        loop {
            let now = Instant::now();
            if now >= deadline || self.cancel.is_cancelled() {
                return;
            }
            let nap = (deadline - now).min(Duration::from_millis(100));
            tokio::time::sleep(nap).await;
        }
    }

    fn request_for(&self, job: &BatchJob, id: ItemId) -> FetchRequest {
        let item = job.item(id).expect("dispatched item exists");
        FetchRequest {
            source: item.source.clone(),
            format: job.config.format,
            quality: job.config.quality.clone(),
            output_dir: job.config.output_dir.clone(),
            allow_playlist: job.config.expand_playlists && item.is_top_level(),
        }
    }

    fn handle_result(&self, job: &mut BatchJob, queue: &mut DispatchQueue, result: ItemResult) {
        let ItemResult {
            item,
            outcome,
            bytes,
            elapsed,
        } = result;
        match outcome {
            ItemOutcome::Completed { path } => {
                tracing::info!(item, bytes, elapsed_ms = elapsed.as_millis() as u64, "item done");
                job.record_success(item, path);
                self.tracker.report_state(item, ItemState::Succeeded);
                self.settle_parent_of(job, item);
            }
            ItemOutcome::Expanded { entries } => {
                if entries.is_empty() {
                    tracing::warn!(item, "playlist expanded to nothing; skipping");
                    job.record_skipped(item);
                    self.tracker.report_state(item, ItemState::Skipped);
                } else {
                    let children = job.expand(item, &entries);
                    tracing::info!(item, entries = children.len(), "playlist expanded");
                    self.tracker.report_state(item, ItemState::Pending);
                    for child in children {
                        self.tracker.report_state(child, ItemState::Pending);
                        queue.push_back(child);
                    }
                }
            }
            ItemOutcome::Failed(err) => self.handle_failure(job, queue, item, err),
            ItemOutcome::Cancelled => {
                job.record_cancelled(item);
                self.tracker.report_state(item, ItemState::Pending);
            }
        }
    }

    fn handle_failure(
        &self,
        job: &mut BatchJob,
        queue: &mut DispatchQueue,
        item: ItemId,
        err: FetchError,
    ) {
        let class = classify(&err);
        let server_hint = match &err {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        };
        if class == FailureClass::RateLimited {
            // Throttling hands the attempt back; it has its own budget.
            job.rollback_attempt_rate_limited(item);
        }
        let (attempts, rate_limit_hits) = job
            .item(item)
            .map(|i| (i.attempts, i.rate_limit_hits))
            .unwrap_or((0, 0));
        let failure = ItemFailure {
            class,
            message: err.to_string(),
        };

        match self.policy.decide(attempts, rate_limit_hits, class, server_hint) {
            RetryDecision::RetryNow => {
                tracing::debug!(item, attempts, "retrying now: {}", failure.message);
                job.record_retryable(item, failure);
                self.tracker.report_state(item, ItemState::Pending);
                queue.push_front(item);
            }
            RetryDecision::RetryAfter(delay) => {
                tracing::debug!(
                    item,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying later: {}",
                    failure.message
                );
                job.record_retryable(item, failure);
                self.tracker.report_state(item, ItemState::Pending);
                queue.push_delayed(item, delay);
            }
            RetryDecision::GiveUp => {
                tracing::warn!(item, attempts, "giving up: {}", failure.message);
                job.record_failure(item, failure);
                self.tracker.report_state(item, ItemState::Failed);
                self.settle_parent_of(job, item);
            }
        }
    }

    /// Retire an item whose transient budget is already spent (an
    /// interrupted run counts its dispatched attempt even though the
    /// result never came back).
    fn fail_exhausted(&self, job: &mut BatchJob, item: ItemId) -> Result<(), RunError> {
        let failure = job
            .item(item)
            .and_then(|i| i.last_error.clone())
            .unwrap_or(ItemFailure {
                class: FailureClass::Transient,
                message: "attempt budget exhausted by an interrupted run".to_string(),
            });
        tracing::warn!(item, "attempt budget exhausted; not dispatching again");
        job.record_failure(item, failure);
        self.store.persist(job)?;
        self.tracker.report_state(item, ItemState::Failed);
        self.settle_parent_of(job, item);
        Ok(())
    }

    /// When a playlist child reached a terminal state, check whether its
    /// parent can settle.
    fn settle_parent_of(&self, job: &mut BatchJob, item: ItemId) {
        let Some(ItemKind::PlaylistChild { parent }) = job.item(item).map(|i| i.kind) else {
            return;
        };
        if job.settle_parent(parent) {
            if let Some(p) = job.item(parent) {
                self.tracker.report_state(parent, p.state);
            }
        }
    }
}

#[cfg(test)]
mod tests;
