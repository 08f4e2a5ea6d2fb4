//! Deferred task queue driven by an external clock

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// Handle for cancelling an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Entry<T> {
    due_ms: f64,
    seq: u64,
    task: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // Reversed so the max-heap yields the earliest due time, then arming order
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due_ms
            .total_cmp(&self.due_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of tasks keyed by due time. Nothing runs on its own; the owner
/// drains due tasks with [`TimerQueue::pop_due`].
pub struct TimerQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    cancelled: HashSet<u64>,
    next_seq: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_seq: 0,
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `task` to run `delay_ms` after `now_ms` (negative delays run immediately)
    pub fn after(&mut self, now_ms: f64, delay_ms: f64, task: T) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            due_ms: now_ms + delay_ms.max(0.0),
            seq,
            task,
        });
        TimerHandle(seq)
    }

    /// Cancel an armed timer. Cancelling a fired timer has no effect.
    pub fn cancel(&mut self, handle: TimerHandle) {
        if self.heap.iter().any(|e| e.seq == handle.0) {
            self.cancelled.insert(handle.0);
        }
    }

    /// Drop every armed timer
    pub fn clear(&mut self) {
        self.heap.clear();
        self.cancelled.clear();
    }

    /// Next task due at or before `now_ms`, skipping cancelled ones
    pub fn pop_due(&mut self, now_ms: f64) -> Option<T> {
        while let Some(top) = self.heap.peek() {
            if top.due_ms > now_ms {
                return None;
            }
            let entry = self.heap.pop()?;
            if self.cancelled.remove(&entry.seq) {
                continue;
            }
            return Some(entry.task);
        }
        None
    }

    /// Due time of the earliest live timer
    pub fn next_due_ms(&self) -> Option<f64> {
        self.heap
            .iter()
            .filter(|e| !self.cancelled.contains(&e.seq))
            .map(|e| e.due_ms)
            .min_by(f64::total_cmp)
    }

    /// Number of live timers
    pub fn len(&self) -> usize {
        self.heap.len() - self.cancelled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
