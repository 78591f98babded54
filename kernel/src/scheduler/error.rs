//! Scheduler error handling
//!
//! Two-tier taxonomy: resource exhaustion is a typed, recoverable `Err`
//! reported to the creating caller; invariant violations are fatal kernel
//! faults, because continuing would corrupt the only CPU's execution
//! state.

use core::fmt;

/// Scheduler error types with context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// Context struct or register image could not be allocated
    ContextAllocationFailed { size: usize },

    /// Kernel stack allocation failed
    StackAllocationFailed { size: usize },

    /// Thread not present in any scheduler structure
    ThreadNotFound { thread_id: u64 },

    /// Scheduler used before init()
    NotInitialized,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContextAllocationFailed { size } => {
                write!(f, "context allocation failed ({} bytes)", size)
            }
            Self::StackAllocationFailed { size } => {
                write!(f, "stack allocation failed ({} bytes)", size)
            }
            Self::ThreadNotFound { thread_id } => {
                write!(f, "thread {} not found", thread_id)
            }
            Self::NotInitialized => write!(f, "scheduler not initialized"),
        }
    }
}

impl SchedulerError {
    /// Is this error recoverable by the caller?
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::NotInitialized)
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Fatal scheduler invariant check. A failed condition halts the kernel:
/// every queue mutation after a violated invariant would corrupt the
/// execution state of the only CPU.
#[macro_export]
macro_rules! sched_assert {
    ($cond:expr, $reason:expr) => {
        if !$cond {
            panic!("[SCHED] invariant violated: {}", $reason);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_errors_are_recoverable() {
        assert!(SchedulerError::ContextAllocationFailed { size: 16384 }.is_recoverable());
        assert!(SchedulerError::StackAllocationFailed { size: 16384 }.is_recoverable());
        assert!(!SchedulerError::NotInitialized.is_recoverable());
    }

    #[test]
    #[should_panic(expected = "invariant violated")]
    fn sched_assert_panics_on_violation() {
        sched_assert!(false, "test violation");
    }
}
