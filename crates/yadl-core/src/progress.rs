//! Thread-safe progress aggregation for a running batch.
//!
//! Workers report byte deltas and state changes concurrently; the CLI pulls
//! consistent snapshots on an interval. All accumulation happens under one
//! internal mutex scoped to the counters alone, never held across I/O.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ledger::{ItemId, ItemState, StateCounts};

/// Sliding window used for throughput smoothing.
const SPEED_WINDOW: Duration = Duration::from_secs(10);

/// Point-in-time view of batch progress. Ephemeral, never persisted;
/// derived entirely from reported item states and live byte counters.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub counts: StateCounts,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
    /// Throughput over the trailing window, bytes/sec.
    pub smoothed_bytes_per_sec: f64,
    /// Whole-run average throughput, bytes/sec.
    pub overall_bytes_per_sec: f64,
    /// Estimated time remaining; None when unknowable (no completed item
    /// yet to size the estimate, or speed is zero).
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    /// Fraction of items in a terminal state, in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        let total = self.counts.total();
        if total == 0 {
            return 1.0;
        }
        let done = self.counts.succeeded + self.counts.failed + self.counts.skipped;
        done as f64 / total as f64
    }
}

#[derive(Debug)]
struct Inner {
    started: Instant,
    states: HashMap<ItemId, ItemState>,
    bytes_transferred: u64,
    window: VecDeque<(Instant, u64)>,
}

impl Inner {
    fn prune_window(&mut self, now: Instant) {
        while let Some((t, _)) = self.window.front() {
            if now.duration_since(*t) > SPEED_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn smoothed_rate(&self, now: Instant) -> f64 {
        let Some((oldest, _)) = self.window.front() else {
            return 0.0;
        };
        let span = now.duration_since(*oldest).as_secs_f64();
        let bytes: u64 = self.window.iter().map(|(_, b)| b).sum();
        if span <= 0.0 {
            // Window too narrow to smooth over; treat it as one second.
            return bytes as f64;
        }
        bytes as f64 / span
    }
}

/// Concurrency-safe accumulator behind `report`/`snapshot`.
#[derive(Debug)]
pub struct ProgressTracker {
    inner: Mutex<Inner>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                started: Instant::now(),
                states: HashMap::new(),
                bytes_transferred: 0,
                window: VecDeque::new(),
            }),
        }
    }

    /// Record transferred bytes. Called concurrently from worker tasks.
    pub fn report_bytes(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("progress lock");
        inner.bytes_transferred += delta;
        inner.window.push_back((now, delta));
        inner.prune_window(now);
    }

    /// Record an item's new state.
    pub fn report_state(&self, item: ItemId, state: ItemState) {
        let mut inner = self.inner.lock().expect("progress lock");
        inner.states.insert(item, state);
    }

    /// Consistent snapshot of everything reported so far.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("progress lock");
        inner.prune_window(now);

        let mut counts = StateCounts::default();
        for state in inner.states.values() {
            match state {
                ItemState::Pending => counts.pending += 1,
                ItemState::InProgress => counts.in_progress += 1,
                ItemState::Succeeded => counts.succeeded += 1,
                ItemState::Failed => counts.failed += 1,
                ItemState::Skipped => counts.skipped += 1,
            }
        }

        let elapsed = now.duration_since(inner.started);
        let overall = if elapsed.as_secs_f64() > 0.0 {
            inner.bytes_transferred as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let smoothed = inner.smoothed_rate(now);

        ProgressSnapshot {
            counts,
            bytes_transferred: inner.bytes_transferred,
            elapsed,
            smoothed_bytes_per_sec: smoothed,
            overall_bytes_per_sec: overall,
            eta: estimate_eta(&counts, inner.bytes_transferred, smoothed),
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Remaining-bytes estimate divided by smoothed speed. Total size is never
/// known up front, so remaining bytes are estimated as the mean bytes per
/// finished item times the number of unfinished items.
fn estimate_eta(counts: &StateCounts, bytes: u64, smoothed_rate: f64) -> Option<Duration> {
    let finished = counts.succeeded;
    let unfinished = counts.pending + counts.in_progress;
    if unfinished == 0 {
        return Some(Duration::ZERO);
    }
    if finished == 0 || smoothed_rate <= 0.0 || bytes == 0 {
        return None;
    }
    let mean_bytes = bytes as f64 / finished as f64;
    let remaining = mean_bytes * unfinished as f64;
    Some(Duration::from_secs_f64(remaining / smoothed_rate))
}
