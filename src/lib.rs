//! ALICE-Exec: preemptive priority executive
//!
//! Kernel of a single-core real-time executive:
//! - O(1) highest-ready-priority dispatch from a 32-bit ready bitmap
//! - Intrusive, slot-indexed wait queues with O(1) removal
//! - Thread- and interrupt-context dispatch paths (`Context`)
//! - Mutexes with priority inheritance and priority ceiling
//! - Static tables only: no heap, no allocation
//!
//! CPU work (context save/restore, interrupt pending, abort trampolines)
//! is delegated to a [`Port`]. [`SoftwarePort`] records those requests so
//! the whole kernel runs on a host.
//!
//! Author: Moroya Sakamoto

#![no_std]

pub mod config;
pub mod error;
pub mod priority;
pub mod thread;
pub mod queue;
pub mod scheduler;
pub mod wait;
pub mod inherit;
pub mod mutex;
pub mod timer;
pub mod port;
pub mod global;
pub mod kernel;

pub use config::KernelConfig;
pub use error::{Error, Fatal, Result};
pub use priority::{Priority, ReadyMask};
pub use thread::{BlockCause, StackRegion, Thread, ThreadFlags, ThreadId, ThreadParams, ThreadState};
pub use queue::{QueueId, WaitOrder};
pub use scheduler::{Context, SchedGuard, Scheduler};
pub use mutex::{LockStatus, MutexId, MutexKind};
pub use timer::{SysTimer, WAKE_TIMEOUT};
pub use port::{Port, SoftwarePort};
pub use global::KernelCell;
pub use kernel::{JoinStatus, Kernel, ThreadInfo};
