//! Scheduler core: ready bitmap, dispatch decision, scheduler lock
//!
//! The running thread stays at the head of its own ready queue; the idle
//! thread is never queued and runs whenever the bitmap is empty.
//!
//! Dispatch path depends on [`Context`]:
//! - `Thread`: the port transfers control immediately.
//! - `Interrupt`: the target is only staged in `next`; the port's
//!   interrupt epilogue calls [`Kernel::dispatch_staged`].
//!
//! Author: Moroya Sakamoto

use core::ops::{Deref, DerefMut};

use crate::error::{Fatal, Result};
use crate::kernel::Kernel;
use crate::port::Port;
use crate::priority::ReadyMask;
use crate::queue::QueueId;
use crate::thread::ThreadId;

/// Who is calling into the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// Ordinary thread code
    Thread,
    /// Interrupt or exception handler
    Interrupt,
}

/// Process-wide dispatch state
#[derive(Debug)]
pub struct Scheduler {
    /// Bit i set iff ready queue i is non-empty
    ready_mask: ReadyMask,
    /// Thread owning the CPU (the interrupted thread while in a handler)
    current: ThreadId,
    /// Target staged from interrupt context
    next: Option<ThreadId>,
    /// Nesting depth of the scheduler lock
    lock: u32,
    /// Completed context transfers
    switches: u64,
    /// Dispatch is held off until `Kernel::start`
    started: bool,
    /// Ticks consumed by the current time slice
    slice_used: u64,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            ready_mask: ReadyMask::empty(),
            current: ThreadId::IDLE,
            next: None,
            lock: 0,
            switches: 0,
            started: false,
            slice_used: 0,
        }
    }

    pub fn ready_mask(&self) -> ReadyMask {
        self.ready_mask
    }

    pub fn current(&self) -> ThreadId {
        self.current
    }

    pub fn next(&self) -> Option<ThreadId> {
        self.next
    }

    pub fn lock_depth(&self) -> u32 {
        self.lock
    }

    pub fn switches(&self) -> u64 {
        self.switches
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.lock > 0
    }

    pub(crate) fn lock(&mut self) {
        self.lock += 1;
    }

    /// Blocking gives up the CPU, so any held lock is discarded
    pub(crate) fn discard_lock(&mut self) {
        self.lock = 0;
    }

    pub(crate) fn slice_elapsed(&mut self, delta: u64, slice: u64) -> bool {
        self.slice_used += delta;
        if self.slice_used >= slice {
            self.slice_used = 0;
            true
        } else {
            false
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped scheduler lock
///
/// While alive, dispatch decisions are computed but deferred. Dropping the
/// guard unlocks and, if this was the outermost lock, runs one scheduling
/// pass. The guard derefs to the kernel so the locked region can keep
/// operating on it.
#[must_use = "dropping the guard unlocks the scheduler immediately"]
pub struct SchedGuard<'a, P: Port> {
    kernel: &'a mut Kernel<P>,
    ctx: Context,
    armed: bool,
}

impl<'a, P: Port> SchedGuard<'a, P> {
    pub(crate) fn new(kernel: &'a mut Kernel<P>, ctx: Context) -> Self {
        kernel.sched.lock();
        Self { kernel, ctx, armed: true }
    }

    /// Unlock now and report the outcome of the deferred scheduling pass
    pub fn release(mut self) -> Result<()> {
        self.armed = false;
        let ctx = self.ctx;
        self.kernel.guarded(|k| k.unlock(ctx))
    }
}

impl<P: Port> Deref for SchedGuard<'_, P> {
    type Target = Kernel<P>;

    fn deref(&self) -> &Kernel<P> {
        self.kernel
    }
}

impl<P: Port> DerefMut for SchedGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut Kernel<P> {
        self.kernel
    }
}

impl<P: Port> Drop for SchedGuard<'_, P> {
    fn drop(&mut self) {
        if self.armed {
            let ctx = self.ctx;
            // Fatal outcomes are already reported to the port by `guarded`
            let _ = self.kernel.guarded(|k| k.unlock(ctx));
        }
    }
}

impl<P: Port> Kernel<P> {
    /// Run one scheduling pass
    pub fn schedule(&mut self, ctx: Context) -> Result<()> {
        self.guarded(|k| k.schedule_now(ctx))
    }

    /// Rotate the current thread behind its equal-priority peers
    pub fn yield_now(&mut self, ctx: Context) -> Result<()> {
        self.guarded(|k| k.rotate_current(ctx))
    }

    /// Defer dispatch until the returned guard is dropped
    pub fn lock_scheduler(&mut self, ctx: Context) -> SchedGuard<'_, P> {
        SchedGuard::new(self, ctx)
    }

    /// Interrupt-return hook: perform the transfer staged from a handler
    ///
    /// Returns whether a switch happened.
    pub fn dispatch_staged(&mut self) -> Result<bool> {
        self.guarded(|k| match k.sched.next.take() {
            Some(target) if target != k.sched.current => {
                k.transfer(target)?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    pub(crate) fn schedule_now(&mut self, ctx: Context) -> Result<()> {
        if !self.sched.started {
            return Ok(());
        }

        let target = match self.sched.ready_mask.highest() {
            None => ThreadId::IDLE,
            Some(p) => match self.queues.head(QueueId::ready(p))? {
                Some(t) => t,
                None => return Err(Fatal::BitmapMismatch { priority: p.level() }.into()),
            },
        };

        if target == self.sched.current {
            // Any earlier staging is now stale
            self.sched.next = None;
            return Ok(());
        }

        self.switch_to(ctx, target)
    }

    fn switch_to(&mut self, ctx: Context, target: ThreadId) -> Result<()> {
        if self.sched.is_locked() {
            return Ok(());
        }

        match ctx {
            Context::Thread => self.transfer(target),
            Context::Interrupt => {
                self.sched.next = Some(target);
                if !self.sched.current.is_idle() {
                    self.port.pend_dispatch();
                }
                log::trace!("staged dispatch to slot {}", target.slot());
                Ok(())
            }
        }
    }

    fn transfer(&mut self, to: ThreadId) -> Result<()> {
        self.threads.get_mut(to)?.dispatches += 1;
        let from = self.sched.current;
        self.sched.current = to;
        self.sched.next = None;
        self.sched.switches += 1;
        self.sched.slice_used = 0;
        log::trace!("switch slot {} -> slot {}", from.slot(), to.slot());
        self.port.switch_context(from, to);
        Ok(())
    }

    pub(crate) fn rotate_current(&mut self, ctx: Context) -> Result<()> {
        let cur = self.sched.current;
        if cur.is_idle() {
            return Ok(());
        }
        let t = self.threads.get(cur)?;
        if !t.ready {
            return Ok(());
        }
        let q = QueueId::ready(t.priority);
        if self.queues.len(q)? > 1 {
            self.queues.remove(&mut self.threads, q, cur)?;
            self.queues.insert_tail(&mut self.threads, q, cur)?;
            self.schedule_now(ctx)?;
        }
        Ok(())
    }

    pub(crate) fn unlock(&mut self, ctx: Context) -> Result<()> {
        if !self.sched.is_locked() {
            log::warn!("scheduler unlock without matching lock");
            return Ok(());
        }
        self.sched.lock -= 1;
        if !self.sched.is_locked() {
            self.schedule_now(ctx)?;
        }
        Ok(())
    }

    pub(crate) fn mark_started(&mut self) {
        self.sched.started = true;
    }

    /// Link a ready thread into its priority's queue and set the bitmap bit
    pub(crate) fn ready_insert(&mut self, t: ThreadId, at_head: bool) -> Result<()> {
        let p = self.threads.get(t)?.priority;
        let q = QueueId::ready(p);
        if at_head {
            self.queues.insert_head(&mut self.threads, q, t)?;
        } else {
            self.queues.insert_tail(&mut self.threads, q, t)?;
        }
        self.sched.ready_mask.set(p);
        Ok(())
    }

    /// Unlink from the ready queue, clearing the bit if it empties
    pub(crate) fn ready_remove(&mut self, t: ThreadId) -> Result<()> {
        let p = self.threads.get(t)?.priority;
        let q = QueueId::ready(p);
        self.queues.remove(&mut self.threads, q, t)?;
        if self.queues.is_empty(q)? {
            self.sched.ready_mask.clear(p);
        }
        Ok(())
    }
}
