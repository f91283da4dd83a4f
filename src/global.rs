//! Interrupt-safe kernel singleton
//!
//! Firmware keeps exactly one [`Kernel`] in a `static KernelCell`. Every
//! access runs inside a `critical_section`, which on a single core masks
//! interrupts, so thread code and handlers never observe a half-updated
//! scheduler.
//!
//! Author: Moroya Sakamoto

use core::cell::RefCell;

use critical_section::Mutex;

use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::port::Port;

/// Statically allocated home for the kernel
pub struct KernelCell<P: Port> {
    inner: Mutex<RefCell<Option<Kernel<P>>>>,
}

impl<P: Port> KernelCell<P> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    /// Install the kernel; only the first call succeeds
    pub fn init(&self, kernel: Kernel<P>) -> Result<()> {
        critical_section::with(|cs| {
            let mut slot = self.inner.borrow_ref_mut(cs);
            if slot.is_some() {
                return Err(Error::AlreadyInitialized);
            }
            *slot = Some(kernel);
            Ok(())
        })
    }

    /// Run `f` on the kernel inside a critical section
    ///
    /// `f` must not call back into the same cell.
    pub fn with<R>(&self, f: impl FnOnce(&mut Kernel<P>) -> R) -> Result<R> {
        critical_section::with(|cs| {
            let mut slot = self.inner.borrow_ref_mut(cs);
            slot.as_mut().map(f).ok_or(Error::NotInitialized)
        })
    }

    pub fn is_initialized(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow_ref(cs).is_some())
    }
}

impl<P: Port> Default for KernelCell<P> {
    fn default() -> Self {
        Self::new()
    }
}
