/*
 * Interrupt Descriptor Table
 *
 * Trimmed to what the scheduler core actually needs: a timer ISR that
 * drives `scheduler::on_tick()`, and halt-on-fault handlers for the
 * exceptions a misbehaving task could plausibly trigger. Keyboard,
 * serial, and a software yield vector belong to the out-of-scope
 * shell/console layer and are not installed here.
 */

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use super::pit::PIC_TIMER_VECTOR;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();

        idt.divide_error.set_handler_fn(fault_handler);
        idt.invalid_opcode.set_handler_fn(fault_handler);
        idt.general_protection_fault.set_handler_fn(fault_handler_err);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.double_fault.set_handler_fn(double_fault_handler);

        unsafe {
            idt[PIC_TIMER_VECTOR as usize].set_handler_fn(timer_interrupt_handler);
        }

        idt
    };
}

/// Install the IDT. Must run before `enable_interrupts`.
pub fn init() {
    IDT.load();
    log::info!("idt: loaded ({} timer vector)", PIC_TIMER_VECTOR);
}

extern "x86-interrupt" fn timer_interrupt_handler(_frame: InterruptStackFrame) {
    crate::scheduler::on_tick();
    unsafe {
        super::pit::notify_end_of_interrupt();
    }
}

extern "x86-interrupt" fn fault_handler(frame: InterruptStackFrame) {
    log::error!("unhandled CPU fault at {:#x}, halting", frame.instruction_pointer.as_u64());
    loop {
        x86_64::instructions::hlt();
    }
}

extern "x86-interrupt" fn fault_handler_err(frame: InterruptStackFrame, error_code: u64) {
    log::error!(
        "unhandled CPU fault at {:#x} (error code {:#x}), halting",
        frame.instruction_pointer.as_u64(),
        error_code
    );
    loop {
        x86_64::instructions::hlt();
    }
}

extern "x86-interrupt" fn page_fault_handler(
    frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    log::error!(
        "page fault at {:#x} ({:?}), halting",
        frame.instruction_pointer.as_u64(),
        error_code
    );
    loop {
        x86_64::instructions::hlt();
    }
}

extern "x86-interrupt" fn double_fault_handler(frame: InterruptStackFrame, _error_code: u64) -> ! {
    log::error!("double fault at {:#x}, halting", frame.instruction_pointer.as_u64());
    loop {
        x86_64::instructions::hlt();
    }
}
