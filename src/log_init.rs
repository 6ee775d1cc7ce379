/*
 * Serial Logger
 *
 * A `log::Log` implementation wired to COM1 (0x3F8) via raw port I/O.
 * Formatted output and the console are treated as external
 * collaborators and stay out of this crate.
 */

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;
use x86_64::instructions::port::Port;

const COM1: u16 = 0x3F8;

struct SerialPort {
    data: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        Self {
            data: Port::new(base),
            line_status: Port::new(base + 5),
        }
    }

    /// Bring the UART up: 38400 baud, 8N1, FIFO enabled.
    fn init(&mut self) {
        unsafe {
            Port::<u8>::new(COM1 + 1).write(0x00u8); // disable interrupts
            Port::<u8>::new(COM1 + 3).write(0x80u8); // enable DLAB
            Port::<u8>::new(COM1 + 0).write(0x03u8); // divisor low (38400 baud)
            Port::<u8>::new(COM1 + 1).write(0x00u8); // divisor high
            Port::<u8>::new(COM1 + 3).write(0x03u8); // 8 bits, no parity, one stop bit
            Port::<u8>::new(COM1 + 2).write(0xC7u8); // enable FIFO, clear, 14-byte threshold
            Port::<u8>::new(COM1 + 4).write(0x0Bu8); // IRQs disabled, RTS/DSR set
        }
    }

    fn transmit_empty(&mut self) -> bool {
        unsafe { self.line_status.read() & 0x20 != 0 }
    }

    fn write_byte(&mut self, byte: u8) {
        while !self.transmit_empty() {
            core::hint::spin_loop();
        }
        unsafe { self.data.write(byte) };
    }
}

impl Write for SerialPort {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            match byte {
                b'\n' => {
                    self.write_byte(b'\r');
                    self.write_byte(b'\n');
                }
                b => self.write_byte(b),
            }
        }
        Ok(())
    }
}

static SERIAL: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1));
static INITIALIZED: AtomicBool = AtomicBool::new(false);

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::sync::without_interrupts(|| {
            let _ = writeln!(SERIAL.lock(), "[{}] {}", record.level(), record.args());
        });
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Bring up the serial port and install the global logger at
/// `LevelFilter::Info`. Idempotent; safe to call more than once.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    SERIAL.lock().init();
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
