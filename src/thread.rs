//! Thread records: static, no-alloc thread descriptors
//!
//! Threads live in a fixed slot table. A [`ThreadId`] is a slot index plus
//! the slot's generation, so a handle kept across `delete` fails validation
//! instead of aliasing the slot's next occupant.
//!
//! Author: Moroya Sakamoto

use bitflags::bitflags;
use heapless::String;

use crate::config::{MAX_NAME_LEN, MAX_THREADS, THREAD_SIGNATURE};
use crate::error::Fatal;
use crate::mutex::MutexId;
use crate::priority::Priority;
use crate::queue::QueueId;

/// Thread entry point, receives the creation argument and returns the exit code
pub type ThreadEntry = fn(usize) -> i32;

/// Exit callback; may replace the exit code
pub type ExitHandler = fn(ThreadId, i32) -> i32;

/// Stable thread handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId {
    slot: u8,
    generation: u16,
}

impl ThreadId {
    /// The idle thread always occupies slot 0
    pub const IDLE: ThreadId = ThreadId { slot: 0, generation: 0 };

    pub(crate) const fn new(slot: u8, generation: u16) -> Self {
        Self { slot, generation }
    }

    pub const fn slot(self) -> usize {
        self.slot as usize
    }

    pub const fn is_idle(self) -> bool {
        self.slot == 0
    }
}

/// Why a thread is not ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCause {
    /// Created suspended or explicitly suspended
    Suspended,
    /// Terminal state; the wake value holds the exit code
    Exited,
    /// Waiting for another thread to exit
    Join,
    /// Waiting for a kernel mutex
    Mutex,
    /// Sleeping until a timeout fires
    Sleep,
    /// Waiting on a higher-level object (semaphore, event group, ...)
    Wait(&'static str),
}

/// Observable thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    /// Waiting on anything other than suspension or exit
    Blocked(BlockCause),
    Suspended,
    Exited,
}

bitflags! {
    /// Thread creation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadFlags: u32 {
        /// Leave the thread suspended after creation
        const SUSPENDED = 1 << 0;
        /// Thread never claims coprocessor / extended state
        const NO_EXTENDED_STATE = 1 << 1;
    }
}

/// Stack memory supplied by the port layer; only the bounds are recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    pub base: usize,
    pub size: usize,
}

impl StackRegion {
    pub const EMPTY: StackRegion = StackRegion { base: 0, size: 0 };

    pub const fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }
}

/// Intrusive queue linkage
///
/// `prev == None` with `queue == Some(_)` means the thread is the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Link {
    pub next: Option<ThreadId>,
    pub prev: Option<ThreadId>,
    pub queue: Option<QueueId>,
}

impl Link {
    pub fn is_linked(&self) -> bool {
        self.queue.is_some()
    }
}

/// Parameters for [`Kernel::create`](crate::Kernel::create)
#[derive(Debug, Clone, Copy)]
pub struct ThreadParams<'a> {
    pub name: &'a str,
    pub entry: ThreadEntry,
    pub arg: usize,
    pub stack: StackRegion,
    pub priority: u8,
    pub flags: ThreadFlags,
    pub exit_handler: Option<ExitHandler>,
}

impl<'a> ThreadParams<'a> {
    pub fn new(name: &'a str, entry: ThreadEntry, stack: StackRegion, priority: u8) -> Self {
        Self {
            name,
            entry,
            arg: 0,
            stack,
            priority,
            flags: ThreadFlags::empty(),
            exit_handler: None,
        }
    }

    pub fn arg(mut self, arg: usize) -> Self {
        self.arg = arg;
        self
    }

    pub fn flags(mut self, flags: ThreadFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn suspended(mut self) -> Self {
        self.flags |= ThreadFlags::SUSPENDED;
        self
    }

    pub fn on_exit(mut self, handler: ExitHandler) -> Self {
        self.exit_handler = Some(handler);
        self
    }
}

/// Thread control record
#[derive(Debug, Clone)]
pub struct Thread {
    pub(crate) signature: u32,
    pub(crate) id: ThreadId,
    pub(crate) name: String<MAX_NAME_LEN>,
    pub(crate) base_priority: Priority,
    pub(crate) priority: Priority,
    pub(crate) ready: bool,
    pub(crate) cause: Option<BlockCause>,
    pub(crate) wake_value: i32,
    pub(crate) link: Link,
    /// Head of the owned priority-protected mutex list
    pub(crate) owned: Option<MutexId>,
    /// Every mutex held, protected or not
    pub(crate) held: u16,
    pub(crate) waiting_on: Option<MutexId>,
    pub(crate) exit_waiters: QueueId,
    pub(crate) stack: StackRegion,
    pub(crate) entry: Option<ThreadEntry>,
    pub(crate) arg: usize,
    pub(crate) exit_handler: Option<ExitHandler>,
    pub(crate) flags: ThreadFlags,
    /// Times this thread has been dispatched
    pub(crate) dispatches: u32,
}

impl Thread {
    pub(crate) fn new(id: ThreadId, name: &str, priority: Priority, stack: StackRegion) -> Self {
        let mut n = String::new();
        for ch in name.chars() {
            if n.push(ch).is_err() {
                break;
            }
        }

        Self {
            signature: THREAD_SIGNATURE,
            id,
            name: n,
            base_priority: priority,
            priority,
            ready: false,
            cause: None,
            wake_value: 0,
            link: Link::default(),
            owned: None,
            held: 0,
            waiting_on: None,
            exit_waiters: QueueId::exit(id.slot()),
            stack,
            entry: None,
            arg: 0,
            exit_handler: None,
            flags: ThreadFlags::empty(),
            dispatches: 0,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Effective priority (base plus any inheritance boost)
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn cause(&self) -> Option<BlockCause> {
        self.cause
    }

    pub fn wake_value(&self) -> i32 {
        self.wake_value
    }

    pub fn stack(&self) -> StackRegion {
        self.stack
    }

    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    pub fn entry(&self) -> Option<ThreadEntry> {
        self.entry
    }

    pub fn arg(&self) -> usize {
        self.arg
    }

    pub fn dispatches(&self) -> u32 {
        self.dispatches
    }

    pub fn has_exited(&self) -> bool {
        self.cause == Some(BlockCause::Exited)
    }
}

/// Global thread registry
pub(crate) struct ThreadTable {
    slots: [Option<Thread>; MAX_THREADS],
    generations: [u16; MAX_THREADS],
}

impl ThreadTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            generations: [0; MAX_THREADS],
        }
    }

    pub fn get(&self, id: ThreadId) -> Result<&Thread, Fatal> {
        match self.slots.get(id.slot()) {
            Some(Some(t)) if t.signature == THREAD_SIGNATURE && t.id == id => Ok(t),
            _ => Err(Fatal::InvalidThread),
        }
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Result<&mut Thread, Fatal> {
        match self.slots.get_mut(id.slot()) {
            Some(Some(t)) if t.signature == THREAD_SIGNATURE && t.id == id => Ok(t),
            _ => Err(Fatal::InvalidThread),
        }
    }

    /// Reserve the next free slot (slot 0 is kept for the idle thread)
    pub fn vacant(&self) -> Option<ThreadId> {
        (1..MAX_THREADS)
            .find(|&i| self.slots[i].is_none())
            .map(|i| ThreadId::new(i as u8, self.generations[i]))
    }

    pub fn install(&mut self, thread: Thread) {
        let slot = thread.id.slot();
        self.slots[slot] = Some(thread);
    }

    /// Free a slot; old handles to it stop validating
    pub fn release(&mut self, id: ThreadId) {
        let slot = id.slot();
        if let Some(t) = self.slots[slot].as_mut() {
            t.signature = 0;
        }
        self.slots[slot] = None;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }
}
