//! 16550 serial port (COM1)
//!
//! Byte sink for the logger and the `print!` macros. All access goes
//! through an interrupt-suppressing lock so interrupt-context logging
//! cannot deadlock against an interrupted writer.

use super::{inb, outb};
use crate::sync::IrqMutex;

const COM1: u16 = 0x3F8;

const DATA: u16 = COM1;
const INT_ENABLE: u16 = COM1 + 1;
const FIFO_CTRL: u16 = COM1 + 2;
const LINE_CTRL: u16 = COM1 + 3;
const MODEM_CTRL: u16 = COM1 + 4;
const LINE_STATUS: u16 = COM1 + 5;

/// LSR bit 5: transmit holding register empty
const THR_EMPTY: u8 = 1 << 5;

struct SerialPort;

impl SerialPort {
    fn init(&mut self) {
        unsafe {
            outb(INT_ENABLE, 0x00); // no interrupts, we poll
            outb(LINE_CTRL, 0x80); // DLAB on
            outb(DATA, 0x03); // divisor 3 → 38400 baud
            outb(INT_ENABLE, 0x00);
            outb(LINE_CTRL, 0x03); // 8N1, DLAB off
            outb(FIFO_CTRL, 0xC7); // FIFO on, cleared, 14-byte threshold
            outb(MODEM_CTRL, 0x0B); // DTR + RTS + OUT2
        }
    }

    fn write_byte(&mut self, byte: u8) {
        unsafe {
            while inb(LINE_STATUS) & THR_EMPTY == 0 {
                core::hint::spin_loop();
            }
            outb(DATA, byte);
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(b);
        }
    }
}

static PORT: IrqMutex<SerialPort> = IrqMutex::new(SerialPort);

/// Initialize COM1. Call before the first log line.
pub fn init() {
    PORT.lock().init();
}

/// Write a string to the serial port.
pub fn write_str(s: &str) {
    PORT.lock().write_bytes(s.as_bytes());
}

/// Write raw bytes to the serial port.
pub fn write_bytes(bytes: &[u8]) {
    PORT.lock().write_bytes(bytes);
}
