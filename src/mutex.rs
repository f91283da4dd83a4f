//! Kernel mutexes with priority protection
//!
//! `Plain` mutexes only serialize. `Inherit` mutexes raise their owner to
//! the priority of the highest waiter; `Ceiling` mutexes additionally raise
//! the owner to a fixed ceiling for as long as the lock is held. Ownership
//! is handed directly to the highest-priority waiter on unlock.
//!
//! Author: Moroya Sakamoto

use crate::config::MAX_MUTEXES;
use crate::error::{Error, Fatal, Result};
use crate::kernel::Kernel;
use crate::port::Port;
use crate::priority::Priority;
use crate::queue::{QueueId, WaitOrder};
use crate::scheduler::Context;
use crate::thread::{BlockCause, ThreadId};

/// Mutex handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId {
    slot: u8,
    generation: u16,
}

/// Priority protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexKind {
    /// No priority protection
    Plain,
    /// Priority inheritance
    Inherit,
    /// Priority ceiling plus inheritance above the ceiling
    Ceiling(Priority),
}

impl MutexKind {
    pub fn is_protected(self) -> bool {
        !matches!(self, Self::Plain)
    }

    /// Priority the mutex carries with no waiters
    pub fn floor(self) -> Priority {
        match self {
            Self::Ceiling(p) => p,
            _ => Priority::MIN,
        }
    }
}

/// Outcome of a lock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// Caller owns the mutex
    Acquired,
    /// Caller blocked; it owns the mutex when resumed with wake value 0,
    /// or gave up with `WAKE_TIMEOUT`
    Blocked,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MutexRecord {
    pub id: MutexId,
    pub kind: MutexKind,
    pub owner: Option<ThreadId>,
    pub depth: u32,
    /// Current (possibly bumped) priority
    pub priority: Priority,
    pub waiters: QueueId,
    /// Owner's list, sorted by descending `priority`
    pub owned_next: Option<MutexId>,
    pub owned_prev: Option<MutexId>,
}

pub(crate) struct MutexTable {
    slots: [Option<MutexRecord>; MAX_MUTEXES],
    generations: [u16; MAX_MUTEXES],
}

impl MutexTable {
    pub fn new() -> Self {
        Self {
            slots: [None; MAX_MUTEXES],
            generations: [0; MAX_MUTEXES],
        }
    }

    pub fn get(&self, id: MutexId) -> core::result::Result<&MutexRecord, Fatal> {
        match self.slots.get(id.slot as usize) {
            Some(Some(m)) if m.id == id => Ok(m),
            _ => Err(Fatal::InvalidMutex),
        }
    }

    pub fn get_mut(&mut self, id: MutexId) -> core::result::Result<&mut MutexRecord, Fatal> {
        match self.slots.get_mut(id.slot as usize) {
            Some(Some(m)) if m.id == id => Ok(m),
            _ => Err(Fatal::InvalidMutex),
        }
    }

    fn insert(&mut self, kind: MutexKind, waiters: QueueId) -> Option<MutexId> {
        let i = self.slots.iter().position(|s| s.is_none())?;
        let id = MutexId { slot: i as u8, generation: self.generations[i] };
        self.slots[i] = Some(MutexRecord {
            id,
            kind,
            owner: None,
            depth: 0,
            priority: kind.floor(),
            waiters,
            owned_next: None,
            owned_prev: None,
        });
        Some(id)
    }

    fn remove(&mut self, id: MutexId) {
        let i = id.slot as usize;
        self.slots[i] = None;
        self.generations[i] = self.generations[i].wrapping_add(1);
    }
}

impl<P: Port> Kernel<P> {
    pub fn mutex_create(&mut self, kind: MutexKind) -> Result<MutexId> {
        let waiters = self.queues.allocate().ok_or(Error::QueueTableFull)?;
        match self.mutexes.insert(kind, waiters) {
            Some(id) => Ok(id),
            None => {
                self.guarded(|k| k.queues.free(waiters).map_err(Error::from))?;
                Err(Error::MutexTableFull)
            }
        }
    }

    /// Delete an unowned, uncontended mutex
    pub fn mutex_delete(&mut self, mutex: MutexId) -> Result<()> {
        self.guarded(|k| {
            let m = k.mutexes.get(mutex)?;
            if m.owner.is_some() {
                return Err(Error::MutexBusy);
            }
            let waiters = m.waiters;
            if !k.queues.free(waiters)? {
                return Err(Error::MutexBusy);
            }
            k.mutexes.remove(mutex);
            Ok(())
        })
    }

    /// Lock, blocking the caller if another thread owns the mutex
    pub fn mutex_lock(&mut self, mutex: MutexId) -> Result<LockStatus> {
        self.guarded(|k| k.lock_mutex(mutex, 0))
    }

    /// Lock with a bounded wait of `ticks` (0 = forever)
    pub fn mutex_lock_timeout(&mut self, mutex: MutexId, ticks: u64) -> Result<LockStatus> {
        self.guarded(|k| k.lock_mutex(mutex, ticks))
    }

    /// Lock only if free (or already ours)
    pub fn mutex_try_lock(&mut self, mutex: MutexId) -> Result<()> {
        self.guarded(|k| {
            let cur = k.sched.current();
            match k.mutexes.get(mutex)?.owner {
                Some(o) if o != cur => Err(Error::WouldBlock),
                _ => k.lock_mutex(mutex, 0).map(|_| ()),
            }
        })
    }

    pub fn mutex_unlock(&mut self, mutex: MutexId) -> Result<()> {
        self.guarded(|k| k.unlock_mutex(mutex))
    }

    pub fn mutex_owner(&self, mutex: MutexId) -> Result<Option<ThreadId>> {
        Ok(self.mutexes.get(mutex)?.owner)
    }

    /// Current (possibly bumped) mutex priority
    pub fn mutex_priority(&self, mutex: MutexId) -> Result<Priority> {
        Ok(self.mutexes.get(mutex)?.priority)
    }

    fn lock_mutex(&mut self, mutex: MutexId, ticks: u64) -> Result<LockStatus> {
        let cur = self.sched.current();
        if cur.is_idle() {
            return Err(Error::IdleThread);
        }

        let (owner, waiters) = {
            let m = self.mutexes.get(mutex)?;
            (m.owner, m.waiters)
        };
        match owner {
            None => {
                self.acquire_mutex(mutex, cur)?;
                Ok(LockStatus::Acquired)
            }
            Some(owner) if owner == cur => {
                self.mutexes.get_mut(mutex)?.depth += 1;
                Ok(LockStatus::Acquired)
            }
            Some(_) => {
                self.detach_current(BlockCause::Mutex, Some(waiters), WaitOrder::Priority)?;
                self.threads.get_mut(cur)?.waiting_on = Some(mutex);
                self.refresh_chain(mutex)?;
                self.arm_timeout(cur, BlockCause::Mutex, ticks);
                self.finish_block()?;
                Ok(LockStatus::Blocked)
            }
        }
    }

    fn unlock_mutex(&mut self, mutex: MutexId) -> Result<()> {
        let cur = self.sched.current();
        let m = self.mutexes.get_mut(mutex)?;
        if m.owner != Some(cur) {
            return Err(Error::NotOwner);
        }
        if m.depth > 1 {
            m.depth -= 1;
            return Ok(());
        }
        let waiters = m.waiters;

        self.release_mutex(mutex)?;

        match self.queues.pop_head(&mut self.threads, waiters)? {
            Some(next) => {
                self.threads.get_mut(next)?.waiting_on = None;
                self.acquire_mutex(mutex, next)?;
                // Remaining waiters now push on the new owner
                self.refresh_chain(mutex)?;
                self.wake_thread(Context::Thread, next, Some(BlockCause::Mutex), 0)?;
            }
            None => {
                // Dropping a ceiling may let a mid-priority thread in
                if !self.sched.is_locked() {
                    self.schedule_now(Context::Thread)?;
                }
            }
        }
        Ok(())
    }
}
