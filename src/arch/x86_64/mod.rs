/*
 * x86_64 Architecture Support
 *
 * Everything the scheduler core treats as an external platform
 * primitive: the register-save context switch, interrupt masking,
 * the IDT, and the PIT/PIC timer wiring that drives
 * `scheduler::on_tick()`. None of this is part of the core's
 * correctness argument; it exists to make the core runnable on real
 * hardware.
 */

pub mod context;
pub mod idt;
pub mod pit;

/// Install the IDT and program the timer. Interrupts remain masked
/// until `enable_interrupts` is called.
pub fn init() {
    idt::init();
    pit::init();
}

/// Mask the timer (and all other maskable) interrupts.
#[inline]
pub fn disable_interrupts() {
    x86_64::instructions::interrupts::disable();
}

/// Unmask interrupts.
#[inline]
pub fn enable_interrupts() {
    x86_64::instructions::interrupts::enable();
}
