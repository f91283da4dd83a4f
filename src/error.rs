//! Error types: local (recoverable) vs fatal (programming error)
//!
//! Local errors leave all kernel state unchanged and are simply returned.
//! Fatal errors indicate a corrupted or misused scheduler structure: they
//! are reported once to the port's fatal sink and the caller must not
//! proceed with the operation.
//!
//! Author: Moroya Sakamoto

use core::fmt;

/// Result alias for kernel operations
pub type Result<T> = core::result::Result<T, Error>;

/// Kernel error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Priority outside `0..NUM_PRIORITIES`
    InvalidPriority(u8),
    /// Stack region smaller than the configured minimum
    StackTooSmall { size: usize, min: usize },
    /// No free thread slot
    RegistryFull,
    /// No free wait-queue slot
    QueueTableFull,
    /// No free mutex slot
    MutexTableFull,
    /// Thread is already blocked (or suspended)
    AlreadyBlocked,
    /// `resume` on a thread that is not suspended
    NotSuspended,
    /// A thread tried to join itself
    JoinSelf,
    /// A thread tried to abort itself
    AbortSelf,
    /// Target thread has already exited
    AlreadyExited,
    /// Operation not permitted on the idle thread
    IdleThread,
    /// Delete refused: thread is still live or has joiners
    ThreadBusy,
    /// Wait queue still has threads linked into it
    QueueBusy,
    /// Mutex delete refused: still owned or contended
    MutexBusy,
    /// Mutex unlock by a thread that does not own it
    NotOwner,
    /// `try_lock` on a mutex held by another thread
    WouldBlock,
    /// Global kernel cell used before `init`
    NotInitialized,
    /// Global kernel cell initialized twice
    AlreadyInitialized,
    /// Programming error; the caller must not proceed
    Fatal(Fatal),
}

/// Programming-error conditions routed to the fatal sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatal {
    /// Stale, deleted or corrupted thread handle
    InvalidThread,
    /// Stale or deleted mutex handle
    InvalidMutex,
    /// Queue handle that does not name a live queue
    InvalidQueue,
    /// Ready bitmap claims a priority whose queue is empty (or vice versa)
    BitmapMismatch { priority: u8 },
    /// Thread inserted into a queue while still linked elsewhere
    AlreadyLinked,
    /// Thread removed from a queue it is not linked into
    NotLinked,
    /// Thread exited while still holding mutexes
    OwnsMutexes,
    /// Priority-ordered wait queue found out of order
    QueueOrder,
}

impl Error {
    /// Does this error forbid the caller from proceeding?
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<Fatal> for Error {
    fn from(kind: Fatal) -> Self {
        Self::Fatal(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPriority(p) => write!(f, "invalid priority {}", p),
            Self::StackTooSmall { size, min } => {
                write!(f, "stack too small: {} bytes (min {})", size, min)
            }
            Self::RegistryFull => f.write_str("thread registry full"),
            Self::QueueTableFull => f.write_str("wait queue table full"),
            Self::MutexTableFull => f.write_str("mutex table full"),
            Self::AlreadyBlocked => f.write_str("thread already blocked"),
            Self::NotSuspended => f.write_str("thread not suspended"),
            Self::JoinSelf => f.write_str("thread cannot join itself"),
            Self::AbortSelf => f.write_str("thread cannot abort itself"),
            Self::AlreadyExited => f.write_str("thread already exited"),
            Self::IdleThread => f.write_str("operation not permitted on idle thread"),
            Self::ThreadBusy => f.write_str("thread still in use"),
            Self::QueueBusy => f.write_str("wait queue not empty"),
            Self::MutexBusy => f.write_str("mutex still owned"),
            Self::NotOwner => f.write_str("mutex not owned by caller"),
            Self::WouldBlock => f.write_str("mutex held by another thread"),
            Self::NotInitialized => f.write_str("kernel not initialized"),
            Self::AlreadyInitialized => f.write_str("kernel already initialized"),
            Self::Fatal(kind) => write!(f, "fatal: {}", kind),
        }
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidThread => f.write_str("invalid thread record"),
            Self::InvalidMutex => f.write_str("invalid mutex handle"),
            Self::InvalidQueue => f.write_str("invalid wait queue handle"),
            Self::BitmapMismatch { priority } => {
                write!(f, "ready bitmap disagrees with queue {}", priority)
            }
            Self::AlreadyLinked => f.write_str("thread already linked into a queue"),
            Self::NotLinked => f.write_str("thread not linked into queue"),
            Self::OwnsMutexes => f.write_str("thread exited while owning mutexes"),
            Self::QueueOrder => f.write_str("priority wait queue out of order"),
        }
    }
}
