/*
 * Bounded Message Queue
 *
 * A fixed-capacity FIFO of opaque message handles, built entirely out
 * of three `sem::Semaphore`s: `mutex` (binary) guards the ring
 * buffer, `not_empty` gates `receive`, `not_full` gates `send`. None
 * of the queue's own logic does any blocking or wait-queue
 * bookkeeping itself; that's all delegated to the semaphores it's
 * built on, which is the whole point of the layering.
 *
 * Like `sem::Semaphore`, a queue is a stable index into a static slab
 * and its slot is tombstoned rather than freed on `destroy`.
 */

use alloc::boxed::Box;
use alloc::vec::Vec;
use spin::Mutex;

use crate::config::MAX_QUEUES;
use crate::error::{KernelError, KernelResult};
use crate::sem::Semaphore;

/// An opaque message handle. The queue only moves these around; it
/// never interprets or owns whatever they point at.
pub type Message = usize;

struct QueueInner {
    buffer: Box<[Message]>,
    capacity: usize,
    head: usize,
    tail: usize,
    count: usize,
    mutex: Semaphore,
    not_empty: Semaphore,
    not_full: Semaphore,
    valid: bool,
}

const EMPTY_QUEUE: Option<QueueInner> = None;
static QUEUES: Mutex<[Option<QueueInner>; MAX_QUEUES]> = Mutex::new([EMPTY_QUEUE; MAX_QUEUES]);

/// Handle to a bounded message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageQueue(usize);

impl MessageQueue {
    /// Create a queue holding up to `capacity` messages. Fails with
    /// `InvalidArgument` if `capacity == 0`, `OutOfMemory` if the ring
    /// buffer can't be allocated, or `TooManyQueues` if the slab is
    /// full.
    pub fn create(capacity: usize) -> KernelResult<Self> {
        if capacity == 0 {
            return Err(KernelError::InvalidArgument);
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity).map_err(|_| KernelError::OutOfMemory)?;
        buf.resize(capacity, 0usize);
        let buffer = buf.into_boxed_slice();

        let mutex = Semaphore::create(1, 1)?;
        let not_empty = Semaphore::create(0, capacity)?;
        let not_full = Semaphore::create(capacity, capacity)?;

        let mut buffer = Some(buffer);
        let slot = crate::sync::without_interrupts(|| {
            let mut table = QUEUES.lock();
            let slot = table.iter().position(Option::is_none)?;
            table[slot] = Some(QueueInner {
                buffer: buffer.take().unwrap(),
                capacity,
                head: 0,
                tail: 0,
                count: 0,
                mutex,
                not_empty,
                not_full,
                valid: true,
            });
            Some(slot)
        });

        match slot {
            Some(slot) => Ok(MessageQueue(slot)),
            None => {
                // No free queue slot: the three semaphores just created
                // would otherwise sit tombstoned-but-valid forever with
                // no queue left to ever destroy them.
                mutex.destroy();
                not_empty.destroy();
                not_full.destroy();
                Err(KernelError::TooManyQueues)
            }
        }
    }

    fn semaphores(&self) -> KernelResult<(Semaphore, Semaphore, Semaphore)> {
        crate::sync::without_interrupts(|| match QUEUES.lock()[self.0].as_ref() {
            Some(q) if q.valid => Ok((q.mutex, q.not_empty, q.not_full)),
            _ => Err(KernelError::Invalidated),
        })
    }

    /// Enqueue `msg`, blocking (subject to `timeout_ms`, `0` = wait
    /// forever) while the queue is full. On a `mutex` failure after
    /// `not_full` was already claimed, the `not_full` ticket is handed
    /// back before returning the error.
    pub fn send(&self, msg: Message, timeout_ms: u32) -> KernelResult<()> {
        let (mutex, not_empty, not_full) = self.semaphores()?;

        not_full.wait(timeout_ms)?;
        if let Err(e) = mutex.wait(timeout_ms) {
            not_full.post();
            return Err(e);
        }

        let wrote = crate::sync::without_interrupts(|| {
            let mut table = QUEUES.lock();
            match table[self.0].as_mut() {
                Some(q) if q.valid => {
                    q.buffer[q.tail] = msg;
                    q.tail = (q.tail + 1) % q.capacity;
                    q.count += 1;
                    true
                }
                _ => false,
            }
        });

        mutex.post();
        if wrote {
            not_empty.post();
            Ok(())
        } else {
            Err(KernelError::Invalidated)
        }
    }

    /// Dequeue the oldest message, blocking (subject to `timeout_ms`)
    /// while the queue is empty.
    pub fn receive(&self, timeout_ms: u32) -> KernelResult<Message> {
        let (mutex, not_empty, not_full) = self.semaphores()?;

        not_empty.wait(timeout_ms)?;
        if let Err(e) = mutex.wait(timeout_ms) {
            not_empty.post();
            return Err(e);
        }

        let msg = crate::sync::without_interrupts(|| {
            let mut table = QUEUES.lock();
            match table[self.0].as_mut() {
                Some(q) if q.valid => {
                    let m = q.buffer[q.head];
                    q.head = (q.head + 1) % q.capacity;
                    q.count -= 1;
                    Some(m)
                }
                _ => None,
            }
        });

        mutex.post();
        match msg {
            Some(m) => {
                not_full.post();
                Ok(m)
            }
            None => Err(KernelError::Invalidated),
        }
    }

    /// Number of messages currently queued. Acquires `mutex`
    /// non-blockingly (`Semaphore::try_wait`, never the timeout-0
    /// "wait forever" convention `wait()` uses) to read a consistent
    /// snapshot; returns `Timeout` if `mutex` is held by a concurrent
    /// `send`/`receive` at the instant of the call.
    pub fn get_count(&self) -> KernelResult<usize> {
        let (mutex, _, _) = self.semaphores()?;
        if !mutex.try_wait() {
            return Err(KernelError::Timeout);
        }
        let count = crate::sync::without_interrupts(|| QUEUES.lock()[self.0].as_ref().map(|q| q.count));
        mutex.post();
        count.ok_or(KernelError::Invalidated)
    }

    /// Queue capacity, as given to `create`.
    pub fn capacity(&self) -> usize {
        crate::sync::without_interrupts(|| QUEUES.lock()[self.0].as_ref().map(|q| q.capacity).unwrap_or(0))
    }

    /// Invalidate the queue and destroy its three semaphores, which
    /// wakes every blocked sender/receiver with `Invalidated`.
    pub fn destroy(&self) {
        let sems = crate::sync::without_interrupts(|| {
            let mut table = QUEUES.lock();
            match table[self.0].as_mut() {
                Some(q) if q.valid => {
                    q.valid = false;
                    Some((q.mutex, q.not_empty, q.not_full))
                }
                _ => None,
            }
        });
        if let Some((mutex, not_empty, not_full)) = sems {
            mutex.destroy();
            not_empty.destroy();
            not_full.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_capacity() {
        assert_eq!(MessageQueue::create(0), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn send_then_receive_round_trips_in_order() {
        let q = MessageQueue::create(2).unwrap();
        q.send(11, 0).unwrap();
        q.send(22, 0).unwrap();
        assert_eq!(q.receive(0).unwrap(), 11);
        assert_eq!(q.receive(0).unwrap(), 22);
        assert_eq!(q.get_count().unwrap(), 0);
    }

    #[test]
    fn send_up_to_capacity_leaves_queue_full() {
        let q = MessageQueue::create(1).unwrap();
        q.send(1, 0).unwrap();
        assert_eq!(q.get_count().unwrap(), 1);
        assert_eq!(q.capacity(), 1);
    }

    #[test]
    fn destroy_invalidates_further_operations() {
        let q = MessageQueue::create(2).unwrap();
        q.destroy();
        assert_eq!(q.send(1, 0), Err(KernelError::Invalidated));
        assert_eq!(q.receive(0), Err(KernelError::Invalidated));
    }
}
