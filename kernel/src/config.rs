//! Compile-time kernel configuration
//!
//! Scheduling policy and sizing knobs live here so a change happens in
//! exactly one place.

/// Kernel stack size for ordinary threads (16KB)
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Kernel stack size for the idle thread (4KB is enough)
pub const IDLE_STACK_SIZE: usize = 4 * 1024;

/// Timer interrupt frequency in Hz (one scheduler tick per interrupt)
pub const TIMER_HZ: u32 = 100;

/// Milliseconds covered by one scheduler tick
pub const MS_PER_TICK: u64 = 1000 / TIMER_HZ as u64;

/// Number of priority levels (RealTime down to VeryLow)
pub const PRIORITY_LEVELS: usize = 5;

/// Quantum unit: a thread at priority level `p` gets `(p + 1) * QUANTUM_UNIT - 1`
/// ticks before forced preemption. Demoted threads run longer but less often.
pub const QUANTUM_UNIT: u32 = 5;
