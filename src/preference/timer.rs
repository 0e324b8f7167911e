//! Backoff timer registry.
//!
//! A min-heap of deadlines with per-path generations. Re-arming or
//! cancelling bumps the path's generation, which lazily invalidates any
//! entry still sitting in the heap (and any expiry event already posted to a
//! queue); the stale entry is skipped when popped or ignored when applied.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::core::time::Tick;
use crate::preference::value::PathId;

struct TimerEntry {
    deadline: Tick,
    generation: u64,
    path: PathId,
}

// Ordered by deadline; generations are unique so the tie-break never
// reaches the path.
impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.generation.cmp(&other.generation))
    }
}

/// Deadline registry for all armed path backoff timers.
#[derive(Default)]
pub struct TimerRegistry {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    current: HashMap<PathId, u64>,
    next_generation: u64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) a path's timer at `deadline`. Returns the new
    /// generation.
    pub fn arm(&mut self, path: PathId, deadline: Tick) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.current.insert(path.clone(), generation);
        self.heap.push(Reverse(TimerEntry {
            deadline,
            generation,
            path,
        }));
        generation
    }

    /// Disarm a path's timer. Heap entries are invalidated lazily.
    pub fn cancel(&mut self, path: &PathId) {
        self.current.remove(path);
    }

    /// Check that `generation` is still the path's live timer.
    pub fn is_current(&self, path: &PathId, generation: u64) -> bool {
        self.current.get(path) == Some(&generation)
    }

    /// Consume a fired timer if `generation` is still live.
    ///
    /// Called at apply time, after the expiry traveled through the route's
    /// queue; a re-arm or cancel in between makes this return false and the
    /// expiry is dropped.
    pub fn consume(&mut self, path: &PathId, generation: u64) -> bool {
        if self.current.get(path) == Some(&generation) {
            self.current.remove(path);
            true
        } else {
            false
        }
    }

    /// Pop every live timer due at or before `now`.
    ///
    /// The generation mapping stays live until [`consume`](Self::consume);
    /// popping only drains the heap.
    pub fn pop_due(&mut self, now: Tick) -> Vec<(PathId, u64)> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if now.is_at_or_after(entry.deadline) {
                let Some(Reverse(entry)) = self.heap.pop() else {
                    break;
                };
                if self.current.get(&entry.path) == Some(&entry.generation) {
                    due.push((entry.path, entry.generation));
                }
            } else {
                break;
            }
        }
        due
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}
