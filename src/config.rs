//! Kernel configuration: compile-time table sizes and runtime knobs
//!
//! Table sizes are fixed at build time (no heap). Runtime behaviour that a
//! board may want to tune lives in [`KernelConfig`].
//!
//! Author: Moroya Sakamoto

use crate::thread::StackRegion;

/// Number of priority levels (0 = lowest, 31 = highest)
///
/// Bounded by the width of the ready bitmap (`u32`).
pub const NUM_PRIORITIES: usize = 32;

/// Maximum threads, including the idle thread in slot 0
pub const MAX_THREADS: usize = 16;

/// Maximum kernel mutexes
pub const MAX_MUTEXES: usize = 16;

/// Wait queues available to synchronization objects (mutexes included)
pub const MAX_WAIT_QUEUES: usize = 32;

/// Thread name capacity in bytes
pub const MAX_NAME_LEN: usize = 16;

/// Signature stamped into every live thread record ("THRD")
pub const THREAD_SIGNATURE: u32 = 0x5448_5244;

/// Default minimum stack a thread must be given
pub const DEFAULT_MIN_STACK: usize = 256;

/// Runtime kernel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Smallest stack `create` accepts, in bytes
    pub min_stack_size: usize,
    /// Round-robin slice length in ticks (0 = no time slicing)
    pub time_slice_ticks: u32,
    /// Stack region recorded for the idle thread
    pub idle_stack: StackRegion,
}

impl KernelConfig {
    /// Default configuration: 256-byte minimum stack, no time slicing
    pub const fn new() -> Self {
        Self {
            min_stack_size: DEFAULT_MIN_STACK,
            time_slice_ticks: 0,
            idle_stack: StackRegion::EMPTY,
        }
    }

    /// Host/testing preset: no stack floor so tests can use dummy regions
    pub const fn testing() -> Self {
        Self {
            min_stack_size: 0,
            time_slice_ticks: 0,
            idle_stack: StackRegion::EMPTY,
        }
    }

    pub const fn with_min_stack(mut self, bytes: usize) -> Self {
        self.min_stack_size = bytes;
        self
    }

    pub const fn with_time_slice(mut self, ticks: u32) -> Self {
        self.time_slice_ticks = ticks;
        self
    }

    pub const fn with_idle_stack(mut self, stack: StackRegion) -> Self {
        self.idle_stack = stack;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
