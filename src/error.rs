/*
 * Kernel Error Types
 *
 * Every fallible kernel operation returns a `KernelResult<T>` instead
 * of panicking or aborting, with distinct error kinds kept apart
 * rather than collapsing to one generic failure code.
 */

use core::fmt;

/// Error kinds surfaced by the kernel core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A null/invalid handle, an out-of-range priority, a zero capacity,
    /// or an `initial_count > max_count` was passed to a constructor.
    InvalidArgument,
    /// The allocator had no block large enough to satisfy the request.
    OutOfMemory,
    /// The semaphore or queue being operated on has been destroyed.
    Invalidated,
    /// A bounded wait exceeded its deadline before being satisfied.
    Timeout,
    /// The task table has no free slot for a new task.
    TooManyTasks,
    /// The semaphore table has no free slot for a new semaphore.
    TooManySemaphores,
    /// The message queue table has no free slot for a new queue.
    TooManyQueues,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::InvalidArgument => "invalid argument",
            KernelError::OutOfMemory => "out of memory",
            KernelError::Invalidated => "object invalidated",
            KernelError::Timeout => "operation timed out",
            KernelError::TooManyTasks => "task table full",
            KernelError::TooManySemaphores => "semaphore table full",
            KernelError::TooManyQueues => "message queue table full",
        };
        f.write_str(msg)
    }
}

/// Result alias used throughout the kernel core.
pub type KernelResult<T> = Result<T, KernelError>;
