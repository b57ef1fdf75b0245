// Serial Port Sink (Kernel Debug I/O)
//
// Minimal polled driver for the legacy COM1 UART. The serial line is the
// kernel's ground-truth log sink: it works before the allocators are up,
// needs no interrupts, and behaves identically on emulators and hardware.
//
// - 38400 baud, 8 data bits, no parity, 1 stop bit
// - Transmit FIFO is polled before each byte
// - Newlines are normalized to CRLF for terminal compatibility
// - Output-only; there is no receive path

use core::fmt;
use spin::Mutex;

use crate::arch::{inb, outb};
use crate::sync;

const COM1: u16 = 0x3F8;

pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    pub const fn new(base: u16) -> Self {
        SerialPort { base }
    }

    pub fn init(&self) {
        unsafe {
            outb(self.base + 1, 0x00); // mask interrupts
            outb(self.base + 3, 0x80); // DLAB on
            outb(self.base, 0x03); // divisor = 3 (38400 baud)
            outb(self.base + 1, 0x00);
            outb(self.base + 3, 0x03); // 8N1
            outb(self.base + 2, 0xC7); // FIFO enabled and cleared
            outb(self.base + 4, 0x0B);
        }
    }

    fn is_transmit_empty(&self) -> bool {
        unsafe { inb(self.base + 5) & 0x20 != 0 }
    }

    pub fn write_byte(&self, byte: u8) {
        while !self.is_transmit_empty() {
            core::hint::spin_loop();
        }
        unsafe {
            outb(self.base, byte);
        }
    }

    pub fn write_str_raw(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_str_raw(s);
        Ok(())
    }
}

static SERIAL1: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1));

pub fn init() {
    SERIAL1.lock().init();
}

/// Low-level backend for the logging subsystem. Interrupts are masked for
/// the duration of the write so interrupt-context output cannot interleave.
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    sync::without_irqs(|| {
        let mut port = SERIAL1.lock();
        let _ = port.write_fmt(args);
    });
}
