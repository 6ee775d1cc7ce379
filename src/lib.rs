/*
 * rt-kernel-core
 *
 * The concurrency core of a small preemptive real-time kernel for a
 * single-CPU x86_64 machine: a fixed-priority, time-sliced
 * round-robin task scheduler, counting semaphores with blocking wait,
 * bounded message queues built on those semaphores, and the heap
 * allocator that backs all of it.
 *
 * This is a library, not a bootable kernel image: the interactive
 * shell, VGA/keyboard console, formatted output, bootloader glue, and
 * IDT/PIC setup beyond wiring the timer vector are a separate
 * platform layer that links against this crate and owns `#[panic_handler]`.
 * `arch::x86_64` provides only the primitives the scheduler treats as
 * external collaborators: `context_switch`, interrupt masking, and the
 * timer tick source.
 *
 * Runs under `std` when built for tests (`#[cfg(test)]`) so the
 * scheduler, semaphores, and message queue can be exercised on the
 * host without real interrupts or a real context switch; see
 * `sync::without_interrupts` for the test-mode stand-in.
 */

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod alloc_core;
pub mod arch;
pub mod config;
pub mod error;
pub mod log_init;
pub mod queue;
pub mod scheduler;
pub mod sem;
pub mod sync;
pub mod task;

pub use error::{KernelError, KernelResult};
pub use queue::{Message, MessageQueue};
pub use sem::Semaphore;
pub use task::{TaskFn, TaskId};

/// Bring up everything the core needs before `scheduler::start()` is
/// called: the heap, the serial logger, and the IDT/PIT.
///
/// # Safety
/// `heap_start` must point to `heap_size` bytes valid for reads and
/// writes for the remainder of the program, per
/// `alloc_core::BestFitAllocator::init`. Must be called exactly once,
/// before any allocation and before interrupts are enabled.
#[cfg(not(test))]
pub unsafe fn init(heap_start: *mut u8, heap_size: usize) {
    unsafe {
        alloc_core::init_heap(heap_start, heap_size);
    }
    log_init::init();
    arch::x86_64::init();
}
