/*
 * Task Control Blocks
 *
 * A task is addressed by a stable `TaskId` (a slab index) rather than
 * a pointer, so the scheduler's intrusive queue links are plain
 * `Option<TaskId>` fields instead of raw pointers into a `kmalloc`'d
 * TCB. Because slab slots are recycled the moment a task is destroyed,
 * `TaskId` alone cannot serve as the TCB's "unique numeric identity":
 * a later, unrelated task can be handed the very same slot (and thus
 * the same `TaskId`) once the old one is gone. `Task::unique_id` is
 * the actual identity, stamped once from a process-wide monotonic
 * counter at creation and never reused.
 *
 * This module owns the TCB shape and the stack/trampoline setup that
 * creation needs; queue membership, the task slab itself, and all
 * scheduling policy live in `scheduler`, since a task's links only
 * make sense in the context of whichever queue currently holds it.
 */

use core::sync::atomic::{AtomicU64, Ordering};

use alloc::boxed::Box;

use crate::arch::x86_64::context::CpuContext;
use crate::config::TASK_NAME_LEN;

/// Stable handle to a task: an index into the scheduler's task slab.
/// Cheap to copy, but only valid for the lifetime of the task that
/// currently occupies the slot — once a task is destroyed, its slot
/// (and therefore its `TaskId`) may be handed to a later, unrelated
/// task. Use `Task::unique_id` for an identity that is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

/// Source of the TCB's `unique_id`: a process-wide counter that only
/// ever increments, so no two tasks — even a destroyed one and the
/// task that later reuses its slab slot — ever share an identity.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state. `Suspended` is reachable only via an explicit
/// priority/placement change external to this crate's own operations
/// (no `suspend()` call is exposed yet; the variant is kept for
/// `set_priority`/future policy hooks that may produce it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Suspended,
    Terminated,
}

/// What a blocked task is waiting for, as one tagged enum rather than
/// a dual-purpose wake-time field plus an opaque wait-object pointer,
/// so "not waiting on anything" and "waiting on sem X with no
/// timeout" can't be confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    NotWaiting,
    /// Sleeping with no other wake condition; deadline is an absolute
    /// tick count.
    Sleeping { deadline: u64 },
    /// Blocked on a semaphore's wait queue, with an optional absolute
    /// tick deadline (`None` means wait forever).
    WaitingOnSem { sem: usize, deadline: Option<u64> },
}

/// A task's entry point, called as `func(arg)` by the trampoline.
pub type TaskFn = extern "C" fn(usize);

/// Task control block.
pub struct Task {
    pub id: TaskId,
    /// Monotonically increasing identity (spec.md §3), distinct from
    /// `id`'s slab slot: never reused, even after the task holding it
    /// is destroyed and its slot handed to a new task.
    unique_id: u64,
    name: [u8; TASK_NAME_LEN],
    name_len: usize,
    pub state: TaskState,
    pub priority: u8,
    pub time_slice: u32,
    pub context: CpuContext,
    #[allow(dead_code)]
    stack: Box<[u8]>,
    pub wait: WaitStatus,
    pub prev: Option<TaskId>,
    pub next: Option<TaskId>,
}

impl Task {
    /// Build a new TCB with its stack already primed so that the first
    /// `context_switch` into it lands in `task_trampoline`.
    pub(crate) fn new(
        id: TaskId,
        name: &str,
        priority: u8,
        time_slice: u32,
        mut stack: Box<[u8]>,
        func: TaskFn,
        arg: usize,
    ) -> Self {
        let context = crate::arch::x86_64::context::prepare_initial_context(
            &mut stack,
            task_trampoline,
            func,
            arg,
        );

        let mut name_buf = [0u8; TASK_NAME_LEN];
        let bytes = name.as_bytes();
        let copy_len = bytes.len().min(TASK_NAME_LEN - 1);
        name_buf[..copy_len].copy_from_slice(&bytes[..copy_len]);

        Self {
            id,
            unique_id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            name: name_buf,
            name_len: copy_len,
            state: TaskState::Ready,
            priority,
            time_slice,
            context,
            stack,
            wait: WaitStatus::NotWaiting,
            prev: None,
            next: None,
        }
    }

    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len]).unwrap_or("")
    }

    /// This task's process-wide unique identity. Never reused, unlike
    /// `id` (the slab slot, which a later task can come to occupy).
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("unique_id", &self.unique_id)
            .field("name", &self.name())
            .field("state", &self.state)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Entered by the very first `context_switch` into a task. An ordinary
/// (non-naked) `extern "C"` function works here: the System V calling
/// convention already puts the first two integer arguments in
/// rdi/rsi, and `prepare_initial_context` primes exactly those
/// registers, so no hand-written entry asm is needed the way a naked
/// trampoline would require.
extern "C" fn task_trampoline(func: TaskFn, arg: usize) -> ! {
    func(arg);
    crate::scheduler::exit();
}

/// Spawn a task. `stack_size == 0` uses `TASK_STACK_SIZE`. Fails with
/// `InvalidArgument` if `priority > MAX_PRIORITY`, with `TooManyTasks`
/// if the slab is full, or with `OutOfMemory` if the stack allocation
/// fails.
pub fn spawn(
    name: &str,
    func: TaskFn,
    arg: usize,
    priority: u8,
    stack_size: usize,
) -> crate::error::KernelResult<TaskId> {
    crate::scheduler::create_task(name, func, arg, priority, stack_size)
}

/// Tear down a task: remove it from every queue it might be on, then
/// free its TCB and stack. Never call this on the task that is
/// currently executing; use `exit()` instead.
pub fn destroy(id: TaskId) {
    crate::scheduler::destroy_task(id);
}

/// Give up the remainder of the current time slice. Within a
/// priority, the yielding task goes to the tail of its ready queue.
pub fn yield_now() {
    crate::scheduler::yield_now();
}

/// Sleep for `ms` milliseconds. `ms == 0` is a yield. Returns when the
/// tick handler wakes the task (wake tick computed as
/// `ceil(ms * TIMER_FREQ_HZ / 1000)` ticks from now).
pub fn sleep(ms: u32) {
    crate::scheduler::sleep(ms);
}

/// Terminate the calling task. Never returns.
pub fn exit() -> ! {
    crate::scheduler::exit()
}

/// Change a task's priority, moving it to the new priority's ready
/// queue if it is currently Ready.
pub fn set_priority(id: TaskId, priority: u8) -> crate::error::KernelResult<()> {
    crate::scheduler::set_priority(id, priority)
}

/// The currently running task, if any (`None` only ever transiently,
/// since the idle task is always present).
pub fn current_task_id() -> Option<TaskId> {
    crate::scheduler::current_task_id()
}

/// `id`'s process-wide unique identity (spec.md §3), or `None` if `id`
/// no longer names a live task. Unlike `id` itself, this value is
/// never handed to a different task later.
pub fn unique_id(id: TaskId) -> Option<u64> {
    crate::scheduler::unique_id(id)
}
