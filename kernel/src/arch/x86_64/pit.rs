//! 8253/8254 PIT (Programmable Interval Timer)
//!
//! Generates the periodic interrupt that drives preemption and the sleep
//! ledger.

use core::sync::atomic::{AtomicU64, Ordering};

use super::outb;
use crate::config;

/// Channel 0 data port
const PIT_CHANNEL0: u16 = 0x40;
/// Command port
const PIT_COMMAND: u16 = 0x43;

/// Base oscillator frequency (1.193182 MHz)
const PIT_BASE_FREQUENCY: u32 = 1_193_182;

/// Ticks since boot
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Program channel 0 as a rate generator at `frequency` Hz.
pub fn init(frequency: u32) {
    unsafe {
        let divisor = (PIT_BASE_FREQUENCY / frequency) as u16;

        // Channel 0, lobyte/hibyte access, mode 3 (square wave), binary
        outb(PIT_COMMAND, 0b0011_0110);
        outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
        outb(PIT_CHANNEL0, (divisor >> 8) as u8);
    }
}

/// Record one timer interrupt.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Uptime in milliseconds, at tick granularity.
pub fn uptime_ms() -> u64 {
    ticks() * config::MS_PER_TICK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_advances_uptime() {
        let before = ticks();
        tick();
        tick();
        assert!(ticks() >= before + 2);
    }
}
