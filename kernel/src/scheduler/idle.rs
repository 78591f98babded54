//! Idle thread
//!
//! Runs when nothing else is ready, at VeryLow baseline so it never shades
//! real work. Its existence is what makes "ready queue set empty at
//! dispatch" a fatal invariant instead of a reachable state.

use spin::Once;

use super::error::SchedulerResult;
use super::thread::{Priority, ThreadId};
use crate::config;

static IDLE_THREAD_ID: Once<ThreadId> = Once::new();

/// Idle loop: enable interrupts and halt until the next one.
pub fn idle_thread_entry() -> ! {
    loop {
        crate::arch::x86_64::halt_once();
    }
}

/// Spawn and register the idle thread.
pub fn spawn() -> SchedulerResult<ThreadId> {
    let id = super::core::spawn_with_stack(
        "idle",
        idle_thread_entry,
        Priority::VeryLow,
        config::IDLE_STACK_SIZE,
    )?;
    IDLE_THREAD_ID.call_once(|| id);
    log::debug!("idle thread ready (tid {})", id);
    Ok(id)
}

pub fn idle_thread_id() -> Option<ThreadId> {
    IDLE_THREAD_ID.get().copied()
}

pub fn is_idle_thread(id: ThreadId) -> bool {
    idle_thread_id() == Some(id)
}
