//! Port layer: the CPU-specific collaborators the kernel calls out to
//!
//! The kernel never touches registers. Context save/restore, interrupt
//! pending, extended-state bookkeeping and the abort trampoline are all
//! delegated to a [`Port`]. On hardware `switch_context` returns only when
//! `from` is dispatched again; [`SoftwarePort`] returns immediately and
//! records what happened, which is what the host tests drive.
//!
//! Author: Moroya Sakamoto

use heapless::Vec;

use crate::error::Fatal;
use crate::thread::{StackRegion, ThreadEntry, ThreadId};

/// CPU collaborator interface
pub trait Port {
    /// Prepare the initial frame so the first dispatch enters `entry(arg)`
    fn init_context(&mut self, thread: ThreadId, entry: ThreadEntry, arg: usize, stack: StackRegion) {
        let _ = (thread, entry, arg, stack);
    }

    /// Save `from`, restore `to`. Thread context only.
    fn switch_context(&mut self, from: ThreadId, to: ThreadId);

    /// Arm the lowest-priority software interrupt so the staged thread is
    /// dispatched on interrupt return
    fn pend_dispatch(&mut self);

    /// Make `thread` resume in the abort trampoline, which exits with `code`
    fn redirect_to_abort(&mut self, thread: ThreadId, code: i32) {
        let _ = (thread, code);
    }

    /// Drop any coprocessor / extended-state claim held by `thread`
    fn release_extended_state(&mut self, thread: ThreadId) {
        let _ = thread;
    }

    /// Fatal sink. Expected not to return; if it does, the operation has
    /// still failed.
    fn fatal(&mut self, kind: Fatal) {
        let _ = kind;
    }
}

/// Record-keeping port for host builds and tests
#[derive(Debug, Default)]
pub struct SoftwarePort {
    /// Every `switch_context(from, to)`, oldest first
    pub switches: Vec<(ThreadId, ThreadId), 64>,
    /// Number of `pend_dispatch` calls
    pub pends: u32,
    /// Threads redirected to the abort trampoline, with their codes
    pub aborts: Vec<(ThreadId, i32), 16>,
    /// Threads whose extended state was released
    pub released: Vec<ThreadId, 16>,
    /// Fatal conditions reported
    pub fatals: Vec<Fatal, 8>,
    /// Contexts initialised
    pub contexts: u32,
}

impl SoftwarePort {
    pub const fn new() -> Self {
        Self {
            switches: Vec::new(),
            pends: 0,
            aborts: Vec::new(),
            released: Vec::new(),
            fatals: Vec::new(),
            contexts: 0,
        }
    }

    /// Destination of the most recent switch
    pub fn last_switch(&self) -> Option<ThreadId> {
        self.switches.last().map(|&(_, to)| to)
    }

    pub fn clear(&mut self) {
        self.switches.clear();
        self.pends = 0;
        self.aborts.clear();
        self.released.clear();
        self.fatals.clear();
    }
}

impl Port for SoftwarePort {
    fn init_context(&mut self, _thread: ThreadId, _entry: ThreadEntry, _arg: usize, _stack: StackRegion) {
        self.contexts += 1;
    }

    fn switch_context(&mut self, from: ThreadId, to: ThreadId) {
        // Oldest entries are dropped once the log is full
        if self.switches.is_full() {
            self.switches.remove(0);
        }
        let _ = self.switches.push((from, to));
    }

    fn pend_dispatch(&mut self) {
        self.pends += 1;
    }

    fn redirect_to_abort(&mut self, thread: ThreadId, code: i32) {
        let _ = self.aborts.push((thread, code));
    }

    fn release_extended_state(&mut self, thread: ThreadId) {
        let _ = self.released.push(thread);
    }

    fn fatal(&mut self, kind: Fatal) {
        let _ = self.fatals.push(kind);
    }
}
