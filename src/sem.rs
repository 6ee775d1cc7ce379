/*
 * Counting Semaphore
 *
 * A semaphore is a stable index (`Semaphore(usize)`) into a static
 * slab, the same handle-not-pointer shape `task::TaskId` uses for
 * TCBs. Its FIFO wait queue is not spliced through `Task::prev`/
 * `next`: those fields belong solely to whichever ready queue
 * currently holds a task (see `scheduler`'s module comment), so each
 * semaphore instead keeps its own bounded `heapless::Deque<TaskId, _>`
 * of waiters, sized to the task table since no more than `MAX_TASKS`
 * tasks can ever be queued anywhere at once.
 *
 * Destroyed semaphores are tombstoned, not freed: the slot stays
 * `Some` with `valid = false` forever rather than being handed back to
 * `create`. This trades slot reuse for a simple, race-free way for a
 * waiter resuming after `destroy()` to tell "the object I was queued
 * on is gone" apart from "I timed out" apart from "I was posted to".
 * All three leave the task's own `WaitStatus` looking similar, but the
 * slot itself is still there to ask.
 */

use heapless::Deque;
use spin::Mutex;

use crate::config::{MAX_SEMAPHORES, MAX_TASKS};
use crate::error::{KernelError, KernelResult};
use crate::task::{TaskId, WaitStatus};

struct SemaphoreInner {
    count: usize,
    max_count: usize,
    waiters: Deque<TaskId, MAX_TASKS>,
    valid: bool,
}

const EMPTY_SEM: Option<SemaphoreInner> = None;
static SEMAPHORES: Mutex<[Option<SemaphoreInner>; MAX_SEMAPHORES]> = Mutex::new([EMPTY_SEM; MAX_SEMAPHORES]);

/// Handle to a counting semaphore. Cheap to copy; stays valid forever
/// once created (slots are never recycled), even past `destroy()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Semaphore(usize);

impl Semaphore {
    /// Create a semaphore with `initial_count` tokens available and a
    /// cap of `max_count`. Fails with `InvalidArgument` if
    /// `initial_count > max_count`, or `TooManySemaphores` if the slab
    /// is full.
    pub fn create(initial_count: usize, max_count: usize) -> KernelResult<Self> {
        if initial_count > max_count {
            return Err(KernelError::InvalidArgument);
        }
        crate::sync::without_interrupts(|| {
            let mut table = SEMAPHORES.lock();
            let slot = table.iter().position(Option::is_none).ok_or(KernelError::TooManySemaphores)?;
            table[slot] = Some(SemaphoreInner {
                count: initial_count,
                max_count,
                waiters: Deque::new(),
                valid: true,
            });
            Ok(Semaphore(slot))
        })
    }

    /// Acquire a token, blocking if none is available. `timeout_ms ==
    /// 0` waits forever; otherwise returns `Timeout` once the deadline
    /// passes without a token becoming available. Returns
    /// `Invalidated` if the semaphore is (or becomes, while waiting)
    /// destroyed.
    pub fn wait(&self, timeout_ms: u32) -> KernelResult<()> {
        enum Outcome {
            Acquired,
            Invalidated,
            Blocked(Option<u64>),
        }

        let outcome = crate::sync::without_interrupts(|| {
            let mut table = SEMAPHORES.lock();
            let Some(inner) = table[self.0].as_mut() else {
                return Outcome::Invalidated;
            };
            if !inner.valid {
                return Outcome::Invalidated;
            }
            if inner.count > 0 {
                inner.count -= 1;
                return Outcome::Acquired;
            }
            let Some(id) = crate::scheduler::current_task_id() else {
                return Outcome::Invalidated;
            };
            let _ = inner.waiters.push_back(id);
            let deadline = (timeout_ms > 0).then(|| crate::scheduler::deadline_from_now(timeout_ms));
            Outcome::Blocked(deadline)
        });

        let deadline = match outcome {
            Outcome::Acquired => return Ok(()),
            Outcome::Invalidated => return Err(KernelError::Invalidated),
            Outcome::Blocked(deadline) => deadline,
        };

        let Some(id) = crate::scheduler::block_current_on_sem(self.0, deadline) else {
            return Err(KernelError::Invalidated);
        };

        // Resumed. `wait_status` still reporting `WaitingOnSem` on this
        // semaphore means the tick handler woke us on timeout without a
        // matching `post`/`destroy`; any other status means we were
        // dequeued by one of those and already hold (or lost) our slot.
        match crate::scheduler::wait_status(id) {
            Some(WaitStatus::WaitingOnSem { sem, .. }) if sem == self.0 => {
                crate::sync::without_interrupts(|| {
                    if let Some(inner) = SEMAPHORES.lock()[self.0].as_mut() {
                        inner.remove_waiter(id);
                    }
                });
                crate::scheduler::clear_wait(id);
                Err(KernelError::Timeout)
            }
            _ => {
                let still_valid =
                    crate::sync::without_interrupts(|| SEMAPHORES.lock()[self.0].as_ref().map(|i| i.valid).unwrap_or(false));
                if still_valid {
                    Ok(())
                } else {
                    Err(KernelError::Invalidated)
                }
            }
        }
    }

    /// Acquire a token only if one is immediately available; never
    /// blocks. Returns `false` (not an error) when the semaphore has
    /// no token to give right now.
    pub fn try_wait(&self) -> bool {
        crate::sync::without_interrupts(|| match SEMAPHORES.lock()[self.0].as_mut() {
            Some(inner) if inner.valid && inner.count > 0 => {
                inner.count -= 1;
                true
            }
            _ => false,
        })
    }

    /// Release a token. If a task is waiting, it is handed the token
    /// directly (count is left unchanged; the waiter's ticket was
    /// already reserved at enqueue time) and unblocked, preempting the
    /// current task immediately if it now outranks it. Otherwise
    /// `count` is incremented, capped at `max_count`; posts beyond the
    /// cap are silently discarded.
    pub fn post(&self) {
        let waiter = crate::sync::without_interrupts(|| {
            let mut table = SEMAPHORES.lock();
            let Some(inner) = table[self.0].as_mut() else {
                return None;
            };
            if !inner.valid {
                return None;
            }
            match inner.waiters.pop_front() {
                Some(id) => Some(id),
                None => {
                    if inner.count < inner.max_count {
                        inner.count += 1;
                    }
                    None
                }
            }
        });
        if let Some(id) = waiter {
            crate::scheduler::wake_sem_waiter(id);
        }
    }

    /// Invalidate the semaphore and wake every waiter with
    /// `KernelError::Invalidated`. The slot is tombstoned, not freed.
    pub fn destroy(&self) {
        let mut waiters: [Option<TaskId>; MAX_TASKS] = [None; MAX_TASKS];
        let mut len = 0;
        crate::sync::without_interrupts(|| {
            let mut table = SEMAPHORES.lock();
            if let Some(inner) = table[self.0].as_mut() {
                inner.valid = false;
                while let Some(id) = inner.waiters.pop_front() {
                    waiters[len] = Some(id);
                    len += 1;
                }
            }
        });
        for slot in waiters.iter().take(len) {
            crate::scheduler::wake_sem_waiter(slot.unwrap());
        }
    }

    /// Current token count. `0` for a destroyed or unknown handle.
    pub fn get_count(&self) -> usize {
        crate::sync::without_interrupts(|| SEMAPHORES.lock()[self.0].as_ref().map(|i| i.count).unwrap_or(0))
    }

    pub fn is_valid(&self) -> bool {
        crate::sync::without_interrupts(|| SEMAPHORES.lock()[self.0].as_ref().map(|i| i.valid).unwrap_or(false))
    }
}

impl SemaphoreInner {
    /// Remove `id` from the wait deque if present. Used only on the
    /// timeout path, where the tick handler already moved the task
    /// back to Ready without unlinking it from here.
    fn remove_waiter(&mut self, id: TaskId) {
        let mut kept: Deque<TaskId, MAX_TASKS> = Deque::new();
        while let Some(t) = self.waiters.pop_front() {
            if t != id {
                let _ = kept.push_back(t);
            }
        }
        self.waiters = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_initial_count_above_max() {
        assert_eq!(Semaphore::create(2, 1), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn try_wait_drains_available_tokens_then_fails() {
        let s = Semaphore::create(2, 2).unwrap();
        assert!(s.try_wait());
        assert!(s.try_wait());
        assert!(!s.try_wait());
        assert_eq!(s.get_count(), 0);
    }

    #[test]
    fn post_without_waiters_caps_at_max_count() {
        let s = Semaphore::create(0, 1).unwrap();
        s.post();
        s.post();
        assert_eq!(s.get_count(), 1);
    }

    #[test]
    fn destroy_invalidates_and_further_waits_fail() {
        let s = Semaphore::create(0, 1).unwrap();
        s.destroy();
        assert!(!s.is_valid());
        assert!(!s.try_wait());
    }
}
