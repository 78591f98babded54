//! Ready queue set
//!
//! One FIFO queue per priority level. Strict priority selection: the
//! highest non-empty level wins, FIFO within a level; cross-level fairness
//! comes solely from the aging rule applied at preemption time.

use alloc::boxed::Box;
use alloc::collections::VecDeque;

use super::thread::{Thread, ThreadId, ThreadState};
use crate::config::PRIORITY_LEVELS;

pub struct ReadyQueues {
    queues: [VecDeque<Box<Thread>>; PRIORITY_LEVELS],
}

impl ReadyQueues {
    pub const fn new() -> Self {
        Self {
            queues: [
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ],
        }
    }

    /// Append at the tail of the queue for the thread's current priority.
    /// O(1); never allocates once capacity is ensured.
    pub fn enqueue(&mut self, thread: Box<Thread>) {
        debug_assert_eq!(thread.state(), ThreadState::Ready);
        self.queues[thread.priority().index()].push_back(thread);
    }

    /// Remove and return the head of the first non-empty queue, scanning
    /// from the highest priority down. `None` means the set is empty;
    /// the caller treats that as a fatal invariant violation.
    pub fn select_next(&mut self) -> Option<Box<Thread>> {
        self.queues.iter_mut().find_map(VecDeque::pop_front)
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.queues
            .iter()
            .any(|q| q.iter().any(|t| t.id() == id))
    }

    /// Remove every thread matching the predicate (process teardown).
    pub fn drain_matching(
        &mut self,
        mut predicate: impl FnMut(&Thread) -> bool,
        out: &mut alloc::vec::Vec<Box<Thread>>,
    ) {
        for queue in self.queues.iter_mut() {
            let mut i = 0;
            while i < queue.len() {
                if predicate(&queue[i]) {
                    if let Some(thread) = queue.remove(i) {
                        out.push(thread);
                    }
                } else {
                    i += 1;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    /// Queue lengths per level (for stats).
    pub fn lengths(&self) -> [usize; PRIORITY_LEVELS] {
        core::array::from_fn(|i| self.queues[i].len())
    }

    /// Grow every queue so enqueues from interrupt context never hit the
    /// allocator while an interrupted thread may hold the heap lock.
    pub fn ensure_capacity(&mut self, threads: usize) {
        for queue in self.queues.iter_mut() {
            if queue.capacity() < threads {
                queue.reserve(threads - queue.len());
            }
        }
    }
}
