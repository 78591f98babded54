//! Synchronization primitives
//!
//! The scheduler's mutual exclusion is by construction: every mutation of
//! scheduler state happens either in interrupt context (IF already clear)
//! or behind [`IrqMutex`], which suppresses interrupts for the lifetime of
//! its guard.

mod irq_mutex;

pub use irq_mutex::{IrqMutex, IrqMutexGuard};
