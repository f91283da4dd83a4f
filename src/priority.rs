//! Priorities and the ready bitmap
//!
//! Higher number = more urgent. Bit `i` of [`ReadyMask`] is set iff ready
//! queue `i` is non-empty, so the highest ready level is a single
//! leading-zero count.
//!
//! Author: Moroya Sakamoto

use crate::config::NUM_PRIORITIES;
use crate::error::{Error, Result};

/// Thread / mutex priority (0 = lowest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(u8);

impl Priority {
    /// Lowest level; also the idle thread's nominal priority
    pub const MIN: Priority = Priority(0);
    /// Highest level
    pub const MAX: Priority = Priority((NUM_PRIORITIES - 1) as u8);

    /// Validate a raw level
    pub fn new(level: u8) -> Result<Self> {
        if (level as usize) < NUM_PRIORITIES {
            Ok(Self(level))
        } else {
            Err(Error::InvalidPriority(level))
        }
    }

    /// Unchecked; callers iterate `0..NUM_PRIORITIES`
    pub(crate) const fn from_index(i: usize) -> Self {
        Self(i as u8)
    }

    pub const fn level(self) -> u8 {
        self.0
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bitmap of non-empty ready queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadyMask(u32);

impl ReadyMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn set(&mut self, p: Priority) {
        self.0 |= 1 << p.0;
    }

    pub fn clear(&mut self, p: Priority) {
        self.0 &= !(1 << p.0);
    }

    pub fn contains(&self, p: Priority) -> bool {
        self.0 & (1 << p.0) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Highest occupied level, O(1)
    pub fn highest(&self) -> Option<Priority> {
        if self.0 == 0 {
            None
        } else {
            Some(Priority((31 - self.0.leading_zeros()) as u8))
        }
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }
}
