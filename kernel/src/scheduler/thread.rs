//! Thread control block, priorities, and the lifecycle state machine

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::x86_64::context::Context;
use crate::config;
use crate::process::Process;
use crate::scheduler::error::SchedulerResult;

/// Thread ID type
pub type ThreadId = u64;

/// Priority levels, highest first. The numeric value doubles as the ready
/// queue index and as the input to the quantum formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    RealTime = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    VeryLow = 4,
}

impl Priority {
    /// The bottom of the range; aging resets to baseline from here.
    pub const LOWEST: Priority = Priority::VeryLow;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Priority> {
        match index {
            0 => Some(Priority::RealTime),
            1 => Some(Priority::High),
            2 => Some(Priority::Normal),
            3 => Some(Priority::Low),
            4 => Some(Priority::VeryLow),
            _ => None,
        }
    }

    /// One step toward VeryLow.
    pub fn demoted(self) -> Priority {
        Priority::from_index(self.index() + 1).unwrap_or(Priority::LOWEST)
    }

    pub fn is_lowest(self) -> bool {
        self == Priority::LOWEST
    }
}

/// Quantum granted to a thread at `priority`: demoted threads run longer
/// but less often, which keeps latency low for the levels above them.
pub fn quantum_for(priority: Priority) -> u32 {
    (priority.index() as u32 + 1) * config::QUANTUM_UNIT - 1
}

/// Thread lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Enqueued in the ready queue set
    Ready,
    /// Occupies the currently-running slot
    Running,
    /// Parked in the sleep ledger
    Sleeping,
    /// Detached from every structure, pending destruction
    Terminated,
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::Sleeping => write!(f, "Sleeping"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Legal lifecycle transitions.
pub fn validate_transition(from: ThreadState, to: ThreadState) -> bool {
    use ThreadState::*;

    matches!(
        (from, to),
        (Ready, Running)        // selected
            | (Running, Ready)      // preempted
            | (Running, Sleeping)   // voluntary sleep
            | (Running, Terminated) // exit
            | (Sleeping, Ready)     // countdown reached zero
            | (Ready, Terminated)   // torn down with its process
            | (Sleeping, Terminated)
    )
}

/// Thread Control Block
pub struct Thread {
    /// Unique thread ID
    id: ThreadId,

    /// Thread name (for debugging)
    name: Box<str>,

    /// Owning process (shared handle; the scheduler structures own the
    /// thread itself)
    process: Arc<Process>,

    /// Current state
    state: ThreadState,

    /// Priority assigned at creation, immutable
    base_priority: Priority,

    /// Aged copy; always between `base_priority` and [`Priority::LOWEST`]
    priority: Priority,

    /// Ticks left before forced preemption
    quantum: u32,

    /// Ticks until wakeup; meaningful only while in the sleep ledger
    sleep_ticks: u64,

    /// Exit code, meaningful once Terminated
    exit_code: u64,

    /// Saved machine state
    context: Context,
}

/// Global thread ID counter
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a new thread ID
pub fn alloc_thread_id() -> ThreadId {
    NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)
}

impl Thread {
    /// Create a kernel-mode thread. Allocation failure propagates with no
    /// partial state registered anywhere.
    pub fn new_kernel(
        id: ThreadId,
        name: &str,
        process: Arc<Process>,
        priority: Priority,
        entry: fn() -> !,
        stack_size: usize,
    ) -> SchedulerResult<Self> {
        let context = Context::new(entry as usize as u64, 0, false, stack_size)?;
        Ok(Self::from_parts(id, name, process, priority, context))
    }

    /// Create a user-mode thread entered at `entry` on `user_stack` in
    /// ring 3; the kernel stack is reserved for interrupt entry.
    pub fn new_user(
        id: ThreadId,
        name: &str,
        process: Arc<Process>,
        priority: Priority,
        entry: u64,
        user_stack: u64,
        stack_size: usize,
    ) -> SchedulerResult<Self> {
        let context = Context::new(entry, user_stack, true, stack_size)?;
        Ok(Self::from_parts(id, name, process, priority, context))
    }

    fn from_parts(
        id: ThreadId,
        name: &str,
        process: Arc<Process>,
        priority: Priority,
        context: Context,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            process,
            state: ThreadState::Ready,
            base_priority: priority,
            priority,
            quantum: quantum_for(priority),
            sleep_ticks: 0,
            exit_code: 0,
            context,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn set_state(&mut self, state: ThreadState) {
        debug_assert!(
            validate_transition(self.state, state),
            "illegal transition {} -> {}",
            self.state,
            state
        );
        self.state = state;
    }

    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    pub fn decrement_quantum(&mut self) {
        self.quantum -= 1;
    }

    pub fn sleep_ticks(&self) -> u64 {
        self.sleep_ticks
    }

    pub fn set_sleep_ticks(&mut self, ticks: u64) {
        self.sleep_ticks = ticks;
    }

    pub fn decrement_sleep_ticks(&mut self) {
        self.sleep_ticks -= 1;
    }

    pub fn exit_code(&self) -> u64 {
        self.exit_code
    }

    pub fn set_exit_code(&mut self, code: u64) {
        self.exit_code = code;
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// The aging rule, applied to the thread being switched out: one step
    /// toward VeryLow per preemption, snapping back to baseline once it
    /// bottoms out. The fresh quantum follows the new level.
    pub fn age_on_preempt(&mut self) {
        self.priority = if self.priority.is_lowest() {
            self.base_priority
        } else {
            self.priority.demoted()
        };
        self.quantum = quantum_for(self.priority);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{AddressSpace, Process};
    use proptest::prelude::*;

    fn test_process() -> Arc<Process> {
        Arc::new(Process::new(0, "test", AddressSpace::new(0x1000)))
    }

    fn test_thread(priority: Priority) -> Thread {
        Thread::new_kernel(
            alloc_thread_id(),
            "t",
            test_process(),
            priority,
            crate::scheduler::idle::idle_thread_entry,
            crate::config::KERNEL_STACK_SIZE,
        )
        .unwrap()
    }

    #[test]
    fn quantum_formula() {
        assert_eq!(quantum_for(Priority::RealTime), 4);
        assert_eq!(quantum_for(Priority::High), 9);
        assert_eq!(quantum_for(Priority::Normal), 14);
        assert_eq!(quantum_for(Priority::Low), 19);
        assert_eq!(quantum_for(Priority::VeryLow), 24);
    }

    #[test]
    fn quantum_strictly_increases_with_demotion() {
        let mut last = quantum_for(Priority::RealTime);
        for index in 1..crate::config::PRIORITY_LEVELS {
            let q = quantum_for(Priority::from_index(index).unwrap());
            assert!(q > last);
            last = q;
        }
    }

    #[test]
    fn aging_walks_down_then_resets_to_baseline() {
        let mut thread = test_thread(Priority::High);

        thread.age_on_preempt();
        assert_eq!(thread.priority(), Priority::Normal);
        thread.age_on_preempt();
        assert_eq!(thread.priority(), Priority::Low);
        thread.age_on_preempt();
        assert_eq!(thread.priority(), Priority::VeryLow);
        // Bottomed out: next preemption snaps back to baseline.
        thread.age_on_preempt();
        assert_eq!(thread.priority(), Priority::High);
    }

    #[test]
    fn lowest_baseline_stays_at_bottom() {
        let mut thread = test_thread(Priority::VeryLow);
        thread.age_on_preempt();
        assert_eq!(thread.priority(), Priority::VeryLow);
    }

    #[test]
    fn aging_reassigns_quantum() {
        let mut thread = test_thread(Priority::RealTime);
        thread.age_on_preempt();
        assert_eq!(thread.quantum(), quantum_for(Priority::High));
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        use ThreadState::*;
        assert!(validate_transition(Ready, Running));
        assert!(validate_transition(Running, Ready));
        assert!(validate_transition(Running, Sleeping));
        assert!(validate_transition(Running, Terminated));
        assert!(validate_transition(Sleeping, Ready));

        assert!(!validate_transition(Ready, Sleeping));
        assert!(!validate_transition(Sleeping, Running));
        assert!(!validate_transition(Terminated, Ready));
    }

    proptest! {
        /// After k preemptions from baseline p, the current priority is
        /// min(p + k, LOWEST) until the bottom is reached, after which the
        /// next preemption resets it to p.
        #[test]
        fn aging_law(base_index in 0usize..5, preemptions in 0usize..16) {
            let base = Priority::from_index(base_index).unwrap();
            let mut thread = test_thread(base);

            let mut expected = base;
            for _ in 0..preemptions {
                expected = if expected.is_lowest() {
                    base
                } else {
                    Priority::from_index(expected.index() + 1).unwrap()
                };
                thread.age_on_preempt();
            }

            prop_assert_eq!(thread.priority(), expected);
            // The aged copy never leaves [baseline, LOWEST].
            prop_assert!(thread.priority() >= thread.base_priority());
            prop_assert!(thread.priority() <= Priority::LOWEST);
        }

        #[test]
        fn quantum_tracks_current_priority(base_index in 0usize..5, preemptions in 1usize..16) {
            let base = Priority::from_index(base_index).unwrap();
            let mut thread = test_thread(base);
            for _ in 0..preemptions {
                thread.age_on_preempt();
            }
            prop_assert_eq!(thread.quantum(), quantum_for(thread.priority()));
        }
    }
}
