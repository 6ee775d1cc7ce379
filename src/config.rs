/*
 * System Configuration
 *
 * Every tunable named by the kernel's public contract lives here,
 * rather than scattered through call sites.
 */

/// Maximum number of tasks the task table can hold at once.
pub const MAX_TASKS: usize = 32;

/// Default stack size (bytes) when a task is created with `stack_size == 0`.
pub const TASK_STACK_SIZE: usize = 4096;

/// Maximum task name length, including the implicit null terminator budget
/// (names longer than `TASK_NAME_LEN - 1` are truncated).
pub const TASK_NAME_LEN: usize = 32;

/// System timer frequency. 100 Hz means one tick every 10 ms.
pub const TIMER_FREQ_HZ: u32 = 100;

/// Time slice granted to a task per scheduling round, in milliseconds.
pub const TIME_SLICE_MS: u32 = 10;

/// Time slice granted to a task per scheduling round, in ticks.
pub const TIME_SLICE_TICKS: u32 = (TIME_SLICE_MS * TIMER_FREQ_HZ) / 1000;

/// Total size of the managed kernel heap, in bytes.
pub const HEAP_SIZE: usize = 1024 * 1024;

/// Memory page size, used only as an allocator alignment reference point.
pub const PAGE_SIZE: usize = 4096;

/// Maximum number of live semaphores the subsystem is sized for.
pub const MAX_SEMAPHORES: usize = 64;

/// Maximum number of live message queues the subsystem is sized for.
pub const MAX_QUEUES: usize = 32;

/// Default message queue capacity, for callers that don't pick their own.
pub const QUEUE_SIZE: usize = 16;

/// Idle task priority. Always present, always Ready or Running.
pub const PRIORITY_IDLE: u8 = 0;
/// Default priority for background/batch tasks.
pub const PRIORITY_LOW: u8 = 1;
/// Default priority for ordinary tasks.
pub const PRIORITY_NORMAL: u8 = 5;
/// Default priority for latency-sensitive tasks.
pub const PRIORITY_HIGH: u8 = 10;
/// Default priority for tasks that must preempt everything else.
pub const PRIORITY_CRITICAL: u8 = 15;
/// Highest priority value a task may hold.
pub const MAX_PRIORITY: u8 = 15;

/// Byte alignment every heap allocation is rounded up to.
pub const ALLOC_ALIGN: usize = 8;
