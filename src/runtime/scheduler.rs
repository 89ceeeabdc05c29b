use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::runtime::Timestamp;
use crate::runtime::task::Task;

/// The clock and event queue seen by the engine.
pub trait Scheduler {
    fn now(&self) -> Timestamp;
    /// Queues `task` at `at`. Tasks sharing a timestamp run in the order they
    /// were scheduled.
    fn schedule(&mut self, at: Timestamp, task: Task);
}

struct Entry {
    at: Timestamp,
    seq: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

/// Min-heap of tasks keyed by `(time, insertion order)`.
#[derive(Default)]
pub struct EventQueue {
    now: Timestamp,
    seq: u64,
    heap: BinaryHeap<Reverse<Entry>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops the next task and advances the clock to it.
    pub fn pop(&mut self) -> Option<(Timestamp, Task)> {
        let Reverse(entry) = self.heap.pop()?;
        self.now = entry.at;
        Some((entry.at, entry.task))
    }

    pub fn peek_time(&self) -> Option<Timestamp> {
        self.heap.peek().map(|Reverse(e)| e.at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn advance_to(&mut self, at: Timestamp) {
        self.now = self.now.max(at);
    }
}

impl Scheduler for EventQueue {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn schedule(&mut self, at: Timestamp, task: Task) {
        self.seq += 1;
        // Nothing runs in the past.
        let at = at.max(self.now);
        self.heap.push(Reverse(Entry {
            at,
            seq: self.seq,
            task,
        }));
    }
}
