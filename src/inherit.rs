//! Priority inheritance
//!
//! A thread's effective priority is the larger of its base priority and
//! the priority of the first mutex in its owned list. The owned list only
//! holds priority-protected mutexes and is kept in descending mutex
//! priority, so the boost is always read off its head.
//!
//! A mutex's priority is its floor (the ceiling, or `MIN`) raised to the
//! priority of its highest waiter. When a waiter arrives or leaves, the
//! change is pushed down the chain owner -> mutex the owner waits on ->
//! that mutex's owner, and so on, stopping as soon as an owner's
//! effective priority is unchanged.
//!
//! Author: Moroya Sakamoto

use crate::config::MAX_MUTEXES;
use crate::error::{Error, Fatal, Result};
use crate::kernel::Kernel;
use crate::mutex::MutexId;
use crate::port::Port;
use crate::priority::Priority;
use crate::queue::WaitOrder;
use crate::scheduler::Context;
use crate::thread::ThreadId;

impl<P: Port> Kernel<P> {
    /// Change a thread's base priority
    ///
    /// The effective priority never drops below what owned mutexes demand.
    /// A running thread keeps the CPU ahead of its new peers.
    pub fn set_priority(&mut self, ctx: Context, thread: ThreadId, level: u8) -> Result<()> {
        let base = Priority::new(level)?;
        self.guarded(|k| {
            if thread.is_idle() {
                return Err(Error::IdleThread);
            }
            let t = k.threads.get_mut(thread)?;
            if t.has_exited() {
                return Err(Error::AlreadyExited);
            }
            t.base_priority = base;
            let waiting_on = t.waiting_on;

            let eff = k.effective_priority(thread)?;
            k.apply_priority(thread, eff)?;
            if let Some(m) = waiting_on {
                k.refresh_chain(m)?;
            }
            if !k.sched.is_locked() {
                k.schedule_now(ctx)?;
            }
            Ok(())
        })
    }

    pub(crate) fn effective_priority(&self, thread: ThreadId) -> Result<Priority> {
        let t = self.threads.get(thread)?;
        let boost = match t.owned {
            Some(m) => self.mutexes.get(m)?.priority,
            None => Priority::MIN,
        };
        Ok(t.base_priority.max(boost))
    }

    /// Move a thread to priority `p`, keeping whatever queue it sits in
    /// consistent
    pub(crate) fn apply_priority(&mut self, thread: ThreadId, p: Priority) -> Result<()> {
        let t = self.threads.get(thread)?;
        if t.priority == p {
            return Ok(());
        }
        let (ready, queue) = (t.ready, t.link.queue);

        if ready && !thread.is_idle() {
            self.ready_remove(thread)?;
            self.threads.get_mut(thread)?.priority = p;
            let at_head = thread == self.sched.current();
            self.ready_insert(thread, at_head)?;
        } else {
            let resort = match queue {
                Some(q) => self.queues.order(q)? == WaitOrder::Priority,
                None => false,
            };
            match queue {
                Some(q) if resort => {
                    self.queues.remove(&mut self.threads, q, thread)?;
                    self.threads.get_mut(thread)?.priority = p;
                    self.queues.insert_by_priority(&mut self.threads, q, thread)?;
                }
                _ => self.threads.get_mut(thread)?.priority = p,
            }
        }
        log::debug!("slot {} priority -> {}", thread.slot(), p.level());
        Ok(())
    }

    /// Recompute `mutex`'s priority and propagate through its owner
    pub(crate) fn refresh_chain(&mut self, mutex: MutexId) -> Result<()> {
        let mut cursor = Some(mutex);
        let mut hops = 0;

        while let Some(m) = cursor {
            hops += 1;
            if hops > MAX_MUTEXES + 1 {
                log::warn!("inheritance chain longer than the mutex table; stopping");
                break;
            }

            let (kind, owner, waiters, current) = {
                let rec = self.mutexes.get(m)?;
                (rec.kind, rec.owner, rec.waiters, rec.priority)
            };
            if !kind.is_protected() {
                break;
            }
            let owner = match owner {
                Some(o) => o,
                None => break,
            };

            let top = match self.queues.head(waiters)? {
                Some(w) => self.threads.get(w)?.priority,
                None => Priority::MIN,
            };
            let want = kind.floor().max(top);
            if want != current {
                self.owned_remove(owner, m)?;
                self.mutexes.get_mut(m)?.priority = want;
                self.owned_insert(owner, m)?;
            }

            let eff = self.effective_priority(owner)?;
            let o = self.threads.get(owner)?;
            if eff == o.priority {
                break;
            }
            let next = o.waiting_on;
            self.apply_priority(owner, eff)?;
            cursor = next;
        }
        Ok(())
    }

    /// Make `thread` the owner of a free mutex
    pub(crate) fn acquire_mutex(&mut self, mutex: MutexId, thread: ThreadId) -> Result<()> {
        let rec = self.mutexes.get_mut(mutex)?;
        rec.owner = Some(thread);
        rec.depth = 1;
        rec.priority = rec.kind.floor();
        let kind = rec.kind;
        self.threads.get_mut(thread)?.held += 1;

        if kind.is_protected() {
            self.owned_insert(thread, mutex)?;
            let eff = self.effective_priority(thread)?;
            if eff > self.threads.get(thread)?.priority {
                self.apply_priority(thread, eff)?;
            }
        }
        Ok(())
    }

    /// Drop ownership and recompute the former owner's priority; never
    /// dispatches
    pub(crate) fn release_mutex(&mut self, mutex: MutexId) -> Result<()> {
        let (kind, owner) = {
            let rec = self.mutexes.get(mutex)?;
            (rec.kind, rec.owner.ok_or(Fatal::InvalidMutex)?)
        };
        if kind.is_protected() {
            self.owned_remove(owner, mutex)?;
        }

        let rec = self.mutexes.get_mut(mutex)?;
        rec.owner = None;
        rec.depth = 0;
        rec.priority = kind.floor();

        let t = self.threads.get_mut(owner)?;
        t.held = t.held.saturating_sub(1);
        let eff = self.effective_priority(owner)?;
        self.apply_priority(owner, eff)
    }

    /// Insert behind every owned mutex of equal or higher priority
    fn owned_insert(&mut self, thread: ThreadId, mutex: MutexId) -> Result<()> {
        let prio = self.mutexes.get(mutex)?.priority;
        let mut prev = None;
        let mut cursor = self.threads.get(thread)?.owned;
        while let Some(c) = cursor {
            let rec = self.mutexes.get(c)?;
            if rec.priority < prio {
                break;
            }
            prev = Some(c);
            cursor = rec.owned_next;
        }

        let rec = self.mutexes.get_mut(mutex)?;
        rec.owned_prev = prev;
        rec.owned_next = cursor;
        match prev {
            Some(p) => self.mutexes.get_mut(p)?.owned_next = Some(mutex),
            None => self.threads.get_mut(thread)?.owned = Some(mutex),
        }
        if let Some(n) = cursor {
            self.mutexes.get_mut(n)?.owned_prev = Some(mutex);
        }
        Ok(())
    }

    fn owned_remove(&mut self, thread: ThreadId, mutex: MutexId) -> Result<()> {
        let (prev, next) = {
            let rec = self.mutexes.get(mutex)?;
            (rec.owned_prev, rec.owned_next)
        };
        if prev.is_none() && self.threads.get(thread)?.owned != Some(mutex) {
            return Err(Fatal::InvalidMutex.into());
        }

        match prev {
            Some(p) => self.mutexes.get_mut(p)?.owned_next = next,
            None => self.threads.get_mut(thread)?.owned = next,
        }
        if let Some(n) = next {
            self.mutexes.get_mut(n)?.owned_prev = prev;
        }
        let rec = self.mutexes.get_mut(mutex)?;
        rec.owned_prev = None;
        rec.owned_next = None;
        Ok(())
    }
}
