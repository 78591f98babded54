//! Timer/sleep ledger
//!
//! Unordered collection of sleeping threads, each with a tick countdown.
//! Ticked once per timer interrupt: a thread parked for `n` ticks becomes
//! ready on exactly the `n`-th tick, never earlier and never later, and no
//! thread ever carries a zero countdown across a tick boundary.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::queue::ReadyQueues;
use super::thread::{Thread, ThreadId, ThreadState};

pub struct SleepLedger {
    sleepers: Vec<Box<Thread>>,
}

impl SleepLedger {
    pub const fn new() -> Self {
        Self {
            sleepers: Vec::new(),
        }
    }

    /// Park a thread with `ticks` remaining.
    pub fn push(&mut self, mut thread: Box<Thread>, ticks: u64) {
        debug_assert_eq!(thread.state(), ThreadState::Sleeping);
        thread.set_sleep_ticks(ticks);
        self.sleepers.push(thread);
    }

    /// One scheduler tick: decrement every nonzero countdown, then move
    /// every thread that reached zero to the ready queue set at its
    /// current priority. The wakeup scan repeats until a pass finds no due
    /// entry, so a wakeup can never be postponed by traversal order.
    /// Safe on an empty ledger.
    pub fn tick(&mut self, ready: &mut ReadyQueues) {
        for thread in self.sleepers.iter_mut() {
            if thread.sleep_ticks() > 0 {
                thread.decrement_sleep_ticks();
            }
        }

        loop {
            let Some(due) = self.sleepers.iter().position(|t| t.sleep_ticks() == 0) else {
                break;
            };
            let mut thread = self.sleepers.swap_remove(due);
            thread.set_state(ThreadState::Ready);
            ready.enqueue(thread);
        }
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.sleepers.iter().any(|t| t.id() == id)
    }

    /// Remove every thread matching the predicate (process teardown).
    pub fn drain_matching(
        &mut self,
        mut predicate: impl FnMut(&Thread) -> bool,
        out: &mut Vec<Box<Thread>>,
    ) {
        let mut i = 0;
        while i < self.sleepers.len() {
            if predicate(&self.sleepers[i]) {
                out.push(self.sleepers.swap_remove(i));
            } else {
                i += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sleepers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sleepers.is_empty()
    }

    /// See [`ReadyQueues::ensure_capacity`].
    pub fn ensure_capacity(&mut self, threads: usize) {
        if self.sleepers.capacity() < threads {
            self.sleepers.reserve(threads - self.sleepers.len());
        }
    }

    #[cfg(test)]
    pub fn sleep_ticks_of(&self, id: ThreadId) -> Option<u64> {
        self.sleepers
            .iter()
            .find(|t| t.id() == id)
            .map(|t| t.sleep_ticks())
    }
}
