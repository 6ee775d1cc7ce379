/*
 * Programmable Interval Timer and 8259 PIC
 *
 * `ChainedPics` owns PIC remapping and EOI, and a small amount of raw
 * port I/O (via `x86_64::instructions::port`) programs PIT channel 0
 * to `TIMER_FREQ_HZ`.
 */

use spin::Mutex;
use x86_64::instructions::port::Port;

use pic8259::ChainedPics;

use crate::config::TIMER_FREQ_HZ;

/// Standard master/slave PIC vector offsets: IRQ0..7 -> 32..39,
/// IRQ8..15 -> 40..47.
const PIC_1_OFFSET: u8 = 32;
const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// IDT vector the timer (IRQ0) lands on.
pub const PIC_TIMER_VECTOR: u8 = PIC_1_OFFSET;

static PICS: Mutex<ChainedPics> = Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

const PIT_FREQUENCY_HZ: u32 = 1_193_182;

/// Remap the PICs and program PIT channel 0 for periodic interrupts at
/// `TIMER_FREQ_HZ`. Interrupts must still be masked by the caller
/// until `arch::x86_64::enable_interrupts` runs.
pub fn init() {
    unsafe {
        PICS.lock().initialize();
    }
    program_pit(TIMER_FREQ_HZ);
    log::info!("pit: programmed for {} Hz", TIMER_FREQ_HZ);
}

fn program_pit(freq_hz: u32) {
    let divisor = (PIT_FREQUENCY_HZ / freq_hz).clamp(1, u16::MAX as u32) as u16;
    unsafe {
        let mut command: Port<u8> = Port::new(0x43);
        let mut channel0: Port<u8> = Port::new(0x40);
        // Channel 0, access mode lobyte/hibyte, mode 2 (rate generator), binary.
        command.write(0b0011_0100u8);
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }
}

/// Acknowledge the timer interrupt to the PIC. Call exactly once per
/// timer ISR invocation, after the tick has been processed.
///
/// # Safety
/// Must only be called from the timer interrupt handler.
pub unsafe fn notify_end_of_interrupt() {
    unsafe {
        PICS.lock().notify_end_of_interrupt(PIC_TIMER_VECTOR);
    }
}
