//! System tick and timeouts
//!
//! `SysTimer` counts kernel ticks. `TimeoutTable` holds at most one armed
//! deadline per thread; when it fires the kernel wakes the thread with
//! [`WAKE_TIMEOUT`] only if it is still blocked for the same cause, so a
//! timeout racing a real event never wakes a thread twice.
//!
//! Author: Moroya Sakamoto

use heapless::Vec;

use crate::config::MAX_THREADS;
use crate::thread::{BlockCause, ThreadId};

/// Wake value delivered when a timed wait expires
pub const WAKE_TIMEOUT: i32 = -1;

/// System tick counter
///
/// Deadlines are absolute tick values, so the counter saturates rather
/// than wrapping past every armed timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysTimer {
    ticks: u64,
}

impl SysTimer {
    pub const fn new() -> Self {
        Self { ticks: 0 }
    }

    /// Advance by `delta` ticks
    pub fn advance(&mut self, delta: u64) {
        self.ticks = self.ticks.saturating_add(delta);
    }

    pub fn now(&self) -> u64 {
        self.ticks
    }
}

/// An armed deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    pub deadline: u64,
    pub thread: ThreadId,
    pub cause: BlockCause,
}

/// Pending timeouts, one per thread at most
#[derive(Debug, Default)]
pub struct TimeoutTable {
    entries: Vec<Timeout, MAX_THREADS>,
}

impl TimeoutTable {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Arm (or re-arm) the deadline for `thread`
    pub fn arm(&mut self, thread: ThreadId, cause: BlockCause, deadline: u64) {
        self.cancel(thread);
        // One entry per thread slot, so this cannot overflow
        let _ = self.entries.push(Timeout { deadline, thread, cause });
    }

    pub fn cancel(&mut self, thread: ThreadId) -> bool {
        match self.entries.iter().position(|t| t.thread == thread) {
            Some(i) => {
                self.entries.swap_remove(i);
                true
            }
            None => false,
        }
    }

    /// Remove and return the earliest deadline at or before `now`
    pub fn pop_expired(&mut self, now: u64) -> Option<Timeout> {
        let (i, _) = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deadline <= now)
            .min_by_key(|(_, t)| t.deadline)?;
        Some(self.entries.swap_remove(i))
    }

    pub fn deadline_of(&self, thread: ThreadId) -> Option<u64> {
        self.entries.iter().find(|t| t.thread == thread).map(|t| t.deadline)
    }
}
