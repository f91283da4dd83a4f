//! Blocking and waking
//!
//! `block` only ever acts on the calling thread. `wake` is safe from both
//! thread and interrupt context and is a no-op unless the thread is still
//! blocked for the expected cause, which lets a timeout and a real event
//! race without double-waking.
//!
//! Author: Moroya Sakamoto

use crate::error::{Error, Fatal, Result};
use crate::kernel::Kernel;
use crate::port::Port;
use crate::queue::{QueueId, WaitOrder};
use crate::scheduler::{Context, SchedGuard};
use crate::thread::{BlockCause, ThreadId};

impl<P: Port> Kernel<P> {
    /// Block the calling thread, optionally queueing it on `queue`
    ///
    /// Any scheduler lock held by the caller is discarded.
    pub fn block(&mut self, cause: BlockCause, queue: Option<QueueId>, order: WaitOrder) -> Result<()> {
        self.guarded(|k| k.block_current(cause, queue, order, 0))
    }

    /// Like [`block`](Self::block), woken with `WAKE_TIMEOUT` after `ticks`
    /// unless something else wakes it first. `ticks == 0` waits forever.
    pub fn block_timeout(
        &mut self,
        cause: BlockCause,
        queue: Option<QueueId>,
        order: WaitOrder,
        ticks: u64,
    ) -> Result<()> {
        self.guarded(|k| k.block_current(cause, queue, order, ticks))
    }

    /// Make `thread` ready again
    ///
    /// Returns `false` without touching anything if the thread is already
    /// ready, has exited, or is blocked for a cause other than `expected`.
    pub fn wake(
        &mut self,
        ctx: Context,
        thread: ThreadId,
        expected: Option<BlockCause>,
        value: i32,
    ) -> Result<bool> {
        self.guarded(|k| k.wake_thread(ctx, thread, expected, value))
    }

    /// Wake every thread in `queue` blocked for `expected`
    ///
    /// Returns with the scheduler still locked so the woken set is
    /// considered by a single scheduling pass once the guard drops.
    pub fn wake_all_in_queue(
        &mut self,
        ctx: Context,
        queue: QueueId,
        expected: Option<BlockCause>,
        value: i32,
    ) -> Result<SchedGuard<'_, P>> {
        let mut guard = self.lock_scheduler(ctx);
        guard.guarded(|k| k.drain_queue(queue, expected, value))?;
        Ok(guard)
    }

    /// Allocate a wait queue for a synchronization object
    pub fn create_wait_queue(&mut self) -> Result<QueueId> {
        self.queues.allocate().ok_or(Error::QueueTableFull)
    }

    /// Return an empty wait queue to the pool
    pub fn delete_wait_queue(&mut self, queue: QueueId) -> Result<()> {
        self.guarded(|k| {
            if k.queues.free(queue)? {
                Ok(())
            } else {
                Err(Error::QueueBusy)
            }
        })
    }

    pub(crate) fn block_current(
        &mut self,
        cause: BlockCause,
        queue: Option<QueueId>,
        order: WaitOrder,
        ticks: u64,
    ) -> Result<()> {
        let cur = self.detach_current(cause, queue, order)?;
        self.arm_timeout(cur, cause, ticks);
        self.finish_block()
    }

    /// Take the calling thread off the ready queues and park it
    ///
    /// Dispatch is left to [`finish_block`](Self::finish_block) so callers
    /// can adjust inheritance state in between.
    pub(crate) fn detach_current(
        &mut self,
        cause: BlockCause,
        queue: Option<QueueId>,
        order: WaitOrder,
    ) -> Result<ThreadId> {
        let cur = self.sched.current();
        if cur.is_idle() {
            return Err(Error::IdleThread);
        }
        if !self.threads.get(cur)?.ready {
            return Err(Error::AlreadyBlocked);
        }
        if let Some(q) = queue {
            if q.is_ready_queue() || !self.queues.is_valid(q) {
                return Err(Fatal::InvalidQueue.into());
            }
        }

        self.ready_remove(cur)?;
        let t = self.threads.get_mut(cur)?;
        t.cause = Some(cause);
        t.ready = false;
        if let Some(q) = queue {
            self.queues.insert(&mut self.threads, q, cur, order)?;
        }
        Ok(cur)
    }

    pub(crate) fn arm_timeout(&mut self, thread: ThreadId, cause: BlockCause, ticks: u64) {
        if ticks > 0 {
            let deadline = self.timer.now().saturating_add(ticks);
            self.timeouts.arm(thread, cause, deadline);
        }
    }

    pub(crate) fn finish_block(&mut self) -> Result<()> {
        self.sched.discard_lock();
        self.schedule_now(Context::Thread)
    }

    pub(crate) fn wake_thread(
        &mut self,
        ctx: Context,
        thread: ThreadId,
        expected: Option<BlockCause>,
        value: i32,
    ) -> Result<bool> {
        if !self.make_ready(thread, expected, value)? {
            return Ok(false);
        }
        if !self.sched.is_locked() {
            self.schedule_now(ctx)?;
        }
        Ok(true)
    }

    /// Queue surgery shared by wake, drain and abort; never dispatches
    pub(crate) fn make_ready(
        &mut self,
        thread: ThreadId,
        expected: Option<BlockCause>,
        value: i32,
    ) -> Result<bool> {
        let t = self.threads.get(thread)?;
        if t.ready || t.has_exited() {
            return Ok(false);
        }
        if expected.is_some() && t.cause != expected {
            return Ok(false);
        }

        let queue = t.link.queue;
        let waiting_on = t.waiting_on;
        if let Some(q) = queue {
            self.queues.remove(&mut self.threads, q, thread)?;
        }
        self.timeouts.cancel(thread);
        if let Some(m) = waiting_on {
            // The departing waiter no longer props up the owner's priority
            self.threads.get_mut(thread)?.waiting_on = None;
            self.refresh_chain(m)?;
        }

        let t = self.threads.get_mut(thread)?;
        t.cause = None;
        t.ready = true;
        t.wake_value = value;
        self.ready_insert(thread, false)?;
        Ok(true)
    }

    /// Wake every member of `queue`; caller holds the scheduler lock
    pub(crate) fn drain_queue(
        &mut self,
        queue: QueueId,
        expected: Option<BlockCause>,
        value: i32,
    ) -> Result<usize> {
        let mut woken = 0;
        let mut cursor = self.queues.head(queue)?;
        while let Some(t) = cursor {
            cursor = self.threads.get(t)?.link.next;
            if self.make_ready(t, expected, value)? {
                woken += 1;
            }
        }
        log::debug!("drained {} waiters", woken);
        Ok(woken)
    }
}
