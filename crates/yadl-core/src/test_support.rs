//! Scripted fetch collaborator for tests.
//!
//! Each source can be given a queue of outcomes, consumed one per attempt;
//! unscripted sources succeed. The fetcher also records per-source attempt
//! counts and the highest concurrency it observed, so scheduler and
//! controller tests can assert on both.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::control::CancelFlag;
use crate::fetch::{AudioFetcher, FetchError, FetchRequest, Fetched, ProgressHook};

const DEFAULT_BYTES: u64 = 1024;

/// One scripted attempt outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed { bytes: u64 },
    Expand(Vec<String>),
    Fail(FetchError),
}

pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    attempts: Mutex<HashMap<String, u32>>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    saw_fired_cancel: AtomicBool,
    work_delay: Duration,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::with_work_delay(Duration::ZERO)
    }

    pub fn with_work_delay(work_delay: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            saw_fired_cancel: AtomicBool::new(false),
            work_delay,
        }
    }

    /// Queue outcomes for a source, consumed one per attempt.
    pub fn script(&self, source: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(source.to_string(), steps.into());
    }

    pub fn attempts_for(&self, source: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(source)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Whether any attempt observed its cancel token already fired.
    pub fn saw_fired_cancel(&self) -> bool {
        self.saw_fired_cancel.load(Ordering::SeqCst)
    }

    fn next_step(&self, source: &str) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(source)
            .and_then(|q| q.pop_front())
            .unwrap_or(Step::Succeed {
                bytes: DEFAULT_BYTES,
            })
    }
}

/// Decrements the concurrency gauge even when the attempt future is
/// dropped by a timeout.
struct SlotGuard<'a>(&'a AtomicUsize);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        req: FetchRequest,
        progress: ProgressHook,
        cancel: CancelFlag,
    ) -> Result<Fetched, FetchError> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(req.source.clone())
            .or_insert(0) += 1;
        if cancel.is_cancelled() {
            self.saw_fired_cancel.store(true, Ordering::SeqCst);
        }

        let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);
        let _slot = SlotGuard(&self.concurrent);

        if !self.work_delay.is_zero() {
            tokio::time::sleep(self.work_delay).await;
        }

        match self.next_step(&req.source) {
            Step::Succeed { bytes } => {
                progress(bytes);
                let name: String = req
                    .source
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                    .collect();
                let path = req
                    .output_dir
                    .join(format!("{}.{}", name, req.format.as_str()));
                Ok(Fetched::Audio { path, bytes })
            }
            Step::Expand(entries) => Ok(Fetched::Playlist { entries }),
            Step::Fail(err) => Err(err),
        }
    }
}
