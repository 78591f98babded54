//! Scheduler subsystem
//!
//! Preemptive priority scheduler with aging: five FIFO levels, a quantum
//! that grows as a thread is demoted, a tick-driven sleep ledger, and a
//! context transfer unified with the interrupt return path.

pub mod core;
pub mod error;
pub mod idle;
pub mod queue;
pub mod sleep;
pub mod thread;

// Re-exports
pub use self::core::{
    current_thread_id, exit_current, exit_process_current, init, sleep_current, sleep_ms, spawn,
    spawn_user, spawn_with_stack, start, stats, thread_exists, wait_process, wait_thread,
    yield_now, Disposition, Scheduler, SchedulerStats, SCHEDULER,
};
pub use error::{SchedulerError, SchedulerResult};
pub use thread::{Priority, Thread, ThreadId, ThreadState};
