//! Types persisted in a batch ledger.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{AudioFormat, YadlConfig};
use crate::retry::FailureClass;
use crate::source_list::SourceLine;

use super::store::unix_timestamp;

/// Item identifier, unique within one batch. Ids are allocated sequentially
/// and never reused; items are appended (playlist expansion) but never
/// removed, so an id stays valid for the life of the ledger.
pub type ItemId = u64;

/// Processing state of one item.
///
/// `InProgress` is transient: it exists in a persisted ledger only between
/// dispatch and the durable write of that item's result. Reconciliation on
/// load turns any leftover `InProgress` back into `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl ItemState {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemState::Pending => "pending",
            ItemState::InProgress => "in_progress",
            ItemState::Succeeded => "succeeded",
            ItemState::Failed => "failed",
            ItemState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemState::Succeeded | ItemState::Failed | ItemState::Skipped
        )
    }
}

/// What an item's source reference is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ItemKind {
    /// A plain video reference (or a playlist run without expansion).
    Single,
    /// A reference that expanded into children.
    PlaylistParent,
    /// One entry produced by expanding a playlist.
    PlaylistChild { parent: ItemId },
}

/// Last classified failure recorded on an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    pub class: FailureClass,
    pub message: String,
}

/// One source reference and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobItem {
    pub id: ItemId,
    /// Original reference exactly as given.
    pub source: String,
    /// Input file line the reference came from; None for expanded children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub kind: ItemKind,
    pub state: ItemState,
    /// Attempts consumed against the transient retry budget.
    pub attempts: u32,
    /// Rate-limited failures; tracked separately so throttling does not
    /// burn the transient budget.
    #[serde(default)]
    pub rate_limit_hits: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ItemFailure>,
    /// Final audio file, set exactly once on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Children created by playlist expansion, in playlist order. Non-empty
    /// only for a `PlaylistParent`; such a parent is never dispatched again.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ItemId>,
}

impl JobItem {
    fn new(id: ItemId, source: String, line: Option<u32>, kind: ItemKind) -> Self {
        Self {
            id,
            source,
            line,
            kind,
            state: ItemState::Pending,
            attempts: 0,
            rate_limit_hits: 0,
            last_error: None,
            output_path: None,
            children: Vec::new(),
        }
    }

    /// Pending and actually runnable: an expanded parent waits on its
    /// children and is settled, not dispatched.
    pub fn is_dispatchable(&self) -> bool {
        self.state == ItemState::Pending && self.children.is_empty()
    }

    pub fn is_top_level(&self) -> bool {
        !matches!(self.kind, ItemKind::PlaylistChild { .. })
    }
}

/// Configuration frozen into the batch at creation. A resumed run always
/// uses these values, never the current config file, so already-completed
/// items and remaining items get the same treatment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub format: AudioFormat,
    pub quality: String,
    pub output_dir: PathBuf,
    pub expand_playlists: bool,
}

impl ConfigSnapshot {
    pub fn capture(cfg: &YadlConfig) -> Self {
        Self {
            format: cfg.audio_format,
            quality: cfg.audio_quality.clone(),
            output_dir: cfg.resolved_output_dir(),
            expand_playlists: cfg.expand_playlists,
        }
    }
}

/// Per-state item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.succeeded + self.failed + self.skipped
    }
}

/// Durable record of one batch: every item and its state, plus the frozen
/// configuration. Mutated only by the batch controller (single writer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub source_path: PathBuf,
    pub items: Vec<JobItem>,
    next_item_id: ItemId,
    pub created_at: i64,
    pub updated_at: i64,
    pub config: ConfigSnapshot,
}

impl BatchJob {
    pub fn new(
        id: String,
        source_path: impl Into<PathBuf>,
        sources: &[SourceLine],
        config: ConfigSnapshot,
    ) -> Self {
        let now = unix_timestamp();
        let mut job = Self {
            id,
            source_path: source_path.into(),
            items: Vec::with_capacity(sources.len()),
            next_item_id: 0,
            created_at: now,
            updated_at: now,
            config,
        };
        for s in sources {
            let id = job.alloc_id();
            job.items
                .push(JobItem::new(id, s.url.clone(), Some(s.line), ItemKind::Single));
        }
        job
    }

    fn alloc_id(&mut self) -> ItemId {
        let id = self.next_item_id;
        self.next_item_id += 1;
        id
    }

    pub fn item(&self, id: ItemId) -> Option<&JobItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut JobItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// Ids of items that can be handed to the worker pool right now, in
    /// input order.
    pub fn dispatchable(&self) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|i| i.is_dispatchable())
            .map(|i| i.id)
            .collect()
    }

    /// Top-level source references in input order (drift comparison).
    pub fn top_level_sources(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|i| i.is_top_level())
            .map(|i| i.source.as_str())
            .collect()
    }

    /// Crash-recovery rule: any `InProgress` left behind by an interrupted
    /// run becomes `Pending` again. Also settles expanded parents whose
    /// children all reached a terminal state before the crash. Returns the
    /// number of items reset.
    pub fn reconcile(&mut self) -> usize {
        let mut reset = 0;
        for item in &mut self.items {
            if item.state == ItemState::InProgress {
                item.state = ItemState::Pending;
                reset += 1;
            }
        }
        let parents: Vec<ItemId> = self
            .items
            .iter()
            .filter(|i| !i.children.is_empty() && !i.state.is_terminal())
            .map(|i| i.id)
            .collect();
        for id in parents {
            self.settle_parent(id);
        }
        if reset > 0 {
            tracing::info!(batch = %self.id, reset, "reconciled interrupted items to pending");
        }
        reset
    }

    /// Mark an item as dispatched; counts one attempt against the
    /// transient budget.
    pub fn begin_attempt(&mut self, id: ItemId) {
        if let Some(item) = self.item_mut(id) {
            item.state = ItemState::InProgress;
            item.attempts += 1;
        }
    }

    /// A rate-limited failure hands the attempt back: the transient budget
    /// is untouched and the separate rate-limit counter advances.
    pub fn rollback_attempt_rate_limited(&mut self, id: ItemId) {
        if let Some(item) = self.item_mut(id) {
            item.attempts = item.attempts.saturating_sub(1);
            item.rate_limit_hits += 1;
        }
    }

    /// Record success. `output_path` is written exactly once; a second
    /// success for the same item is a bug upstream and is ignored.
    pub fn record_success(&mut self, id: ItemId, path: PathBuf) {
        if let Some(item) = self.item_mut(id) {
            if item.state == ItemState::Succeeded {
                tracing::warn!(item = id, "duplicate success result dropped");
                return;
            }
            item.state = ItemState::Succeeded;
            item.last_error = None;
            if item.output_path.is_none() {
                item.output_path = Some(path);
            }
        }
    }

    /// Mark an item skipped (e.g. a playlist that expanded to nothing).
    pub fn record_skipped(&mut self, id: ItemId) {
        if let Some(item) = self.item_mut(id) {
            item.state = ItemState::Skipped;
        }
    }

    pub fn record_failure(&mut self, id: ItemId, failure: ItemFailure) {
        if let Some(item) = self.item_mut(id) {
            item.state = ItemState::Failed;
            item.last_error = Some(failure);
        }
    }

    /// Put an item back in the queue for another attempt, remembering what
    /// went wrong last time.
    pub fn record_retryable(&mut self, id: ItemId, failure: ItemFailure) {
        if let Some(item) = self.item_mut(id) {
            item.state = ItemState::Pending;
            item.last_error = Some(failure);
        }
    }

    /// An item whose attempt was cancelled mid-flight stays pending for a
    /// future resume; the interrupted attempt is handed back.
    pub fn record_cancelled(&mut self, id: ItemId) {
        if let Some(item) = self.item_mut(id) {
            item.state = ItemState::Pending;
            item.attempts = item.attempts.saturating_sub(1);
        }
    }

    /// Expand a playlist reference into child items. The parent is re-tagged
    /// and goes back to `Pending`; with children present it is never
    /// dispatched again, only settled once they all terminate.
    pub fn expand(&mut self, parent_id: ItemId, entries: &[String]) -> Vec<ItemId> {
        let mut child_ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = self.alloc_id();
            child_ids.push(id);
            self.items.push(JobItem::new(
                id,
                entry.clone(),
                None,
                ItemKind::PlaylistChild { parent: parent_id },
            ));
        }
        if let Some(parent) = self.item_mut(parent_id) {
            parent.kind = ItemKind::PlaylistParent;
            parent.state = ItemState::Pending;
            parent.children = child_ids.clone();
        }
        child_ids
    }

    /// If every child of an expanded parent is terminal, derive the parent's
    /// terminal state: `Succeeded` when all children succeeded or were
    /// skipped, `Failed` otherwise. Returns true if the parent settled.
    pub fn settle_parent(&mut self, parent_id: ItemId) -> bool {
        let Some(parent) = self.item(parent_id) else {
            return false;
        };
        if parent.children.is_empty() || parent.state.is_terminal() {
            return false;
        }
        let children = parent.children.clone();
        let mut all_terminal = true;
        let mut any_failed = false;
        for child_id in children {
            match self.item(child_id).map(|c| c.state) {
                Some(state) if state.is_terminal() => {
                    if state == ItemState::Failed {
                        any_failed = true;
                    }
                }
                _ => {
                    all_terminal = false;
                    break;
                }
            }
        }
        if !all_terminal {
            return false;
        }
        let parent = self.item_mut(parent_id).expect("parent exists");
        if any_failed {
            parent.state = ItemState::Failed;
            if parent.last_error.is_none() {
                parent.last_error = Some(ItemFailure {
                    class: FailureClass::Permanent,
                    message: "one or more playlist entries failed".to_string(),
                });
            }
        } else {
            parent.state = ItemState::Succeeded;
            parent.last_error = None;
        }
        true
    }

    pub fn counts(&self) -> StateCounts {
        let mut c = StateCounts::default();
        for item in &self.items {
            match item.state {
                ItemState::Pending => c.pending += 1,
                ItemState::InProgress => c.in_progress += 1,
                ItemState::Succeeded => c.succeeded += 1,
                ItemState::Failed => c.failed += 1,
                ItemState::Skipped => c.skipped += 1,
            }
        }
        c
    }

    /// All items terminal: nothing pending, nothing in flight.
    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|i| i.state.is_terminal())
    }

    /// Items that ended `Failed`, for the end-of-run report.
    pub fn failed_items(&self) -> Vec<&JobItem> {
        self.items
            .iter()
            .filter(|i| i.state == ItemState::Failed)
            .collect()
    }

    pub(super) fn touch(&mut self, now: i64) {
        self.updated_at = now;
    }
}
