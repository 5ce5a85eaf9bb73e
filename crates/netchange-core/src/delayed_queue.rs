//! Min-heap of delayed tasks shared by the sequenced and manual runners.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::task_runner::Task;

/// An entry in the delayed queue, ordered by run time then by post order.
struct DelayedEntry {
    run_at: Instant,
    order: u64,
    task: Task,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.order == other.order
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Tasks waiting for their run time.
///
/// Tasks with equal run times come out in the order they were pushed.
#[derive(Default)]
pub(crate) struct DelayedQueue {
    heap: BinaryHeap<DelayedEntry>,
    next_order: u64,
}

impl DelayedQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, run_at: Instant, task: Task) {
        let order = self.next_order;
        self.next_order += 1;
        self.heap.push(DelayedEntry { run_at, order, task });
    }

    /// Remove the earliest task if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<Task> {
        if self.heap.peek()?.run_at <= now {
            self.heap.pop().map(|entry| entry.task)
        } else {
            None
        }
    }

    pub(crate) fn next_run_at(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.run_at)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}
