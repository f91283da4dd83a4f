//! Intrusive thread queues
//!
//! Every queue the kernel knows about (ready queues, per-thread exit-waiter
//! queues, and wait queues handed to synchronization objects) lives in one
//! [`QueueTable`]. Threads carry their own `next`/`prev` links plus a
//! back-pointer to the queue holding them, so removal is O(1) and a thread
//! can sit in at most one queue.
//!
//! Callers must already hold the kernel critical section.
//!
//! Author: Moroya Sakamoto

use crate::config::{MAX_THREADS, MAX_WAIT_QUEUES, NUM_PRIORITIES};
use crate::error::Fatal;
use crate::priority::Priority;
use crate::thread::{Link, ThreadId, ThreadTable};

const EXIT_BASE: usize = NUM_PRIORITIES;
const POOL_BASE: usize = NUM_PRIORITIES + MAX_THREADS;
const QUEUE_SLOTS: usize = POOL_BASE + MAX_WAIT_QUEUES;

/// Queue handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u16);

impl QueueId {
    pub(crate) const fn ready(p: Priority) -> Self {
        Self(p.index() as u16)
    }

    pub(crate) const fn exit(slot: usize) -> Self {
        Self((EXIT_BASE + slot) as u16)
    }

    const fn pool(i: usize) -> Self {
        Self((POOL_BASE + i) as u16)
    }

    const fn index(self) -> usize {
        self.0 as usize
    }

    /// Is this one of the per-priority ready queues?
    pub const fn is_ready_queue(self) -> bool {
        self.index() < EXIT_BASE
    }
}

/// Insertion discipline for a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOrder {
    /// Newest behind everyone
    Fifo,
    /// Behind every waiter at or above the inserting thread's priority
    Priority,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct WaitQueue {
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
    len: u16,
    /// Latched by the insert that makes the queue non-empty; a FIFO insert
    /// into a non-empty queue demotes it to FIFO
    order: WaitOrder,
    in_use: bool,
}

impl WaitQueue {
    const VACANT: WaitQueue = WaitQueue {
        head: None,
        tail: None,
        len: 0,
        order: WaitOrder::Fifo,
        in_use: false,
    };
}

pub(crate) struct QueueTable {
    slots: [WaitQueue; QUEUE_SLOTS],
}

impl QueueTable {
    pub fn new() -> Self {
        let mut slots = [WaitQueue::VACANT; QUEUE_SLOTS];
        for q in slots[..POOL_BASE].iter_mut() {
            q.in_use = true;
        }
        Self { slots }
    }

    fn get(&self, q: QueueId) -> Result<&WaitQueue, Fatal> {
        match self.slots.get(q.index()) {
            Some(w) if w.in_use => Ok(w),
            _ => Err(Fatal::InvalidQueue),
        }
    }

    fn get_mut(&mut self, q: QueueId) -> Result<&mut WaitQueue, Fatal> {
        match self.slots.get_mut(q.index()) {
            Some(w) if w.in_use => Ok(w),
            _ => Err(Fatal::InvalidQueue),
        }
    }

    /// Claim a pooled wait queue for a synchronization object
    pub fn allocate(&mut self) -> Option<QueueId> {
        let i = self.slots[POOL_BASE..].iter().position(|w| !w.in_use)?;
        let slot = &mut self.slots[POOL_BASE + i];
        *slot = WaitQueue::VACANT;
        slot.in_use = true;
        Some(QueueId::pool(i))
    }

    /// Return a pooled queue; it must be empty
    pub fn free(&mut self, q: QueueId) -> Result<bool, Fatal> {
        if q.index() < POOL_BASE {
            return Err(Fatal::InvalidQueue);
        }
        let w = self.get_mut(q)?;
        if w.len != 0 {
            return Ok(false);
        }
        *w = WaitQueue::VACANT;
        Ok(true)
    }

    pub fn is_valid(&self, q: QueueId) -> bool {
        self.get(q).is_ok()
    }

    pub fn head(&self, q: QueueId) -> Result<Option<ThreadId>, Fatal> {
        Ok(self.get(q)?.head)
    }

    pub fn len(&self, q: QueueId) -> Result<usize, Fatal> {
        Ok(self.get(q)?.len as usize)
    }

    pub fn is_empty(&self, q: QueueId) -> Result<bool, Fatal> {
        Ok(self.get(q)?.len == 0)
    }

    /// Discipline of the queue's current members
    pub fn order(&self, q: QueueId) -> Result<WaitOrder, Fatal> {
        Ok(self.get(q)?.order)
    }

    pub fn insert_tail(
        &mut self,
        threads: &mut ThreadTable,
        q: QueueId,
        t: ThreadId,
    ) -> Result<(), Fatal> {
        let tail = self.get(q)?.tail;
        unlinked_priority(threads, t)?;

        threads.get_mut(t)?.link = Link { next: None, prev: tail, queue: Some(q) };
        if let Some(last) = tail {
            threads.get_mut(last)?.link.next = Some(t);
        }

        let w = self.get_mut(q)?;
        if tail.is_none() {
            w.head = Some(t);
        }
        w.tail = Some(t);
        w.len += 1;
        Ok(())
    }

    pub fn insert_head(
        &mut self,
        threads: &mut ThreadTable,
        q: QueueId,
        t: ThreadId,
    ) -> Result<(), Fatal> {
        let head = self.get(q)?.head;
        unlinked_priority(threads, t)?;

        threads.get_mut(t)?.link = Link { next: head, prev: None, queue: Some(q) };
        if let Some(first) = head {
            threads.get_mut(first)?.link.prev = Some(t);
        }

        let w = self.get_mut(q)?;
        if head.is_none() {
            w.tail = Some(t);
        }
        w.head = Some(t);
        w.len += 1;
        Ok(())
    }

    /// Splice `t` before the first member of strictly lower priority
    pub fn insert_by_priority(
        &mut self,
        threads: &mut ThreadTable,
        q: QueueId,
        t: ThreadId,
    ) -> Result<(), Fatal> {
        let prio = unlinked_priority(threads, t)?;

        let mut cursor = self.get(q)?.head;
        while let Some(c) = cursor {
            let member = threads.get(c)?;
            if member.priority < prio {
                break;
            }
            cursor = member.link.next;
        }

        let Some(before) = cursor else {
            return self.insert_tail(threads, q, t);
        };

        let prev = threads.get(before)?.link.prev;
        threads.get_mut(t)?.link = Link { next: Some(before), prev, queue: Some(q) };
        threads.get_mut(before)?.link.prev = Some(t);
        match prev {
            Some(p) => threads.get_mut(p)?.link.next = Some(t),
            None => self.get_mut(q)?.head = Some(t),
        }
        self.get_mut(q)?.len += 1;
        Ok(())
    }

    /// Unlink `t` from `q` in O(1)
    pub fn remove(
        &mut self,
        threads: &mut ThreadTable,
        q: QueueId,
        t: ThreadId,
    ) -> Result<(), Fatal> {
        self.get(q)?;
        let link = threads.get(t)?.link;
        if link.queue != Some(q) {
            return Err(Fatal::NotLinked);
        }

        match link.prev {
            Some(p) => threads.get_mut(p)?.link.next = link.next,
            None => self.get_mut(q)?.head = link.next,
        }
        match link.next {
            Some(n) => threads.get_mut(n)?.link.prev = link.prev,
            None => self.get_mut(q)?.tail = link.prev,
        }
        threads.get_mut(t)?.link = Link::default();

        self.get_mut(q)?.len -= 1;
        Ok(())
    }

    pub fn pop_head(
        &mut self,
        threads: &mut ThreadTable,
        q: QueueId,
    ) -> Result<Option<ThreadId>, Fatal> {
        match self.get(q)?.head {
            Some(t) => {
                self.remove(threads, q, t)?;
                Ok(Some(t))
            }
            None => Ok(None),
        }
    }

    pub fn insert(
        &mut self,
        threads: &mut ThreadTable,
        q: QueueId,
        t: ThreadId,
        order: WaitOrder,
    ) -> Result<(), Fatal> {
        let first = self.is_empty(q)?;
        match order {
            WaitOrder::Fifo => self.insert_tail(threads, q, t)?,
            WaitOrder::Priority => self.insert_by_priority(threads, q, t)?,
        }
        if first || order == WaitOrder::Fifo {
            self.get_mut(q)?.order = order;
        }
        Ok(())
    }

    /// Walk a queue head to tail, checking link consistency (and ordering for
    /// priority queues); returns its length
    pub fn audit(&self, threads: &ThreadTable, q: QueueId) -> Result<usize, Fatal> {
        let w = self.get(q)?;
        let mut count = 0usize;
        let mut prev = None;
        let mut last = Priority::MAX;
        let mut cursor = w.head;
        while let Some(c) = cursor {
            let member = threads.get(c)?;
            let link = member.link;
            if link.queue != Some(q) || link.prev != prev {
                return Err(Fatal::NotLinked);
            }
            if w.order == WaitOrder::Priority && !q.is_ready_queue() {
                if member.priority > last {
                    return Err(Fatal::QueueOrder);
                }
                last = member.priority;
            }
            count += 1;
            if count > MAX_THREADS {
                return Err(Fatal::NotLinked);
            }
            prev = Some(c);
            cursor = link.next;
        }
        if prev != w.tail || count != w.len as usize {
            return Err(Fatal::NotLinked);
        }
        Ok(count)
    }

    pub fn ids(&self) -> impl Iterator<Item = QueueId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, w)| w.in_use)
            .map(|(i, _)| QueueId(i as u16))
    }
}

fn unlinked_priority(threads: &ThreadTable, t: ThreadId) -> Result<Priority, Fatal> {
    let th = threads.get(t)?;
    if th.link.is_linked() {
        return Err(Fatal::AlreadyLinked);
    }
    Ok(th.priority)
}
