//! Serial logger
//!
//! `log` facade backend writing level-prefixed lines to COM1. Formats
//! into a fixed stack buffer so interrupt-context logging never touches
//! the allocator.

use log::{Level, LevelFilter, Metadata, Record};

use crate::arch::x86_64::serial;

struct SerialLogger;

impl log::Log for SerialLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        serial::write_str("[");
        serial::write_str(level_str);
        serial::write_str("] ");

        use core::fmt::Write;
        let mut buf = [0u8; 512];
        let pos = {
            let mut writer = BufferWriter {
                buffer: &mut buf,
                pos: 0,
            };
            let _ = write!(&mut writer, "{}\n", record.args());
            writer.pos
        };
        serial::write_bytes(&buf[..pos]);
    }

    fn flush(&self) {}
}

/// Fixed-buffer `fmt::Write` adapter; output past the buffer is truncated.
struct BufferWriter<'a> {
    buffer: &'a mut [u8],
    pos: usize,
}

impl core::fmt::Write for BufferWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let to_write = bytes.len().min(remaining);

        if to_write > 0 {
            self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
        }

        Ok(())
    }
}

static LOGGER: SerialLogger = SerialLogger;

/// Install the serial logger. Call once, early in boot.
pub fn init() {
    init_with_level(LevelFilter::Info);
}

/// Install the serial logger with an explicit level.
pub fn init_with_level(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    #[test]
    fn buffer_writer_truncates_instead_of_overflowing() {
        let mut buf = [0u8; 8];
        let mut writer = BufferWriter {
            buffer: &mut buf,
            pos: 0,
        };
        write!(&mut writer, "0123456789").unwrap();
        assert_eq!(writer.pos, 8);
        assert_eq!(&buf, b"01234567");
    }
}
