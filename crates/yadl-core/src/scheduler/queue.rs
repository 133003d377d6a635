//! Dispatch queue: ready items in order, delayed items by deadline.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::time::{Duration, Instant};

use crate::ledger::ItemId;

/// Queue of items waiting for a worker slot. Ready items keep FIFO order
/// (input order for a fresh batch); items under a retry backoff sit in a
/// min-heap keyed by their not-before deadline.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    ready: VecDeque<ItemId>,
    delayed: BinaryHeap<Reverse<(Instant, ItemId)>>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            ready: items.into_iter().collect(),
            delayed: BinaryHeap::new(),
        }
    }

    /// Queue an item at the back (new work).
    pub fn push_back(&mut self, item: ItemId) {
        self.ready.push_back(item);
    }

    /// Queue an item at the front (immediate retry).
    pub fn push_front(&mut self, item: ItemId) {
        self.ready.push_front(item);
    }

    /// Queue an item to become ready after `delay`.
    pub fn push_delayed(&mut self, item: ItemId, delay: Duration) {
        self.delayed.push(Reverse((Instant::now() + delay, item)));
    }

    /// Move every delayed item whose deadline has passed into the ready
    /// queue, earliest deadline first.
    pub fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse((deadline, _))) = self.delayed.peek() {
            if *deadline <= now {
                let Reverse((_, item)) = self.delayed.pop().expect("peeked");
                self.ready.push_back(item);
            } else {
                break;
            }
        }
    }

    pub fn pop_ready(&mut self) -> Option<ItemId> {
        self.ready.pop_front()
    }

    /// Earliest deadline among delayed items, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse((deadline, _))| *deadline)
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.delayed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }
}
