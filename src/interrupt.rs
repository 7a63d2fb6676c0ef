//! Interrupt routing
//!
//! The USB peripheral has one interrupt, and one [`Device`] answers it.
//! [`UsbInterrupt`] is where that device lives once it's initialized, so
//! that both the interrupt handler and the main context can reach it.
//!
//! Access goes through a [`critical_section`]. Your application provides the
//! implementation; on a single-core Cortex-M, that's `cortex-m`'s
//! `critical-section-single-core` feature.
//!
//! # Example
//!
//! ```no_run
//! use usbd_pma::{interrupt::UsbInterrupt, Device};
//!
//! static USB: UsbInterrupt<'static> = UsbInterrupt::new();
//!
//! fn start(device: Device<'static>) {
//!     if USB.register(device).is_err() {
//!         panic!("USB device already registered");
//!     }
//! }
//!
//! // Called from the USB interrupt vector
//! fn usb_interrupt() {
//!     USB.on_interrupt();
//! }
//! ```

use crate::device::Device;
use core::cell::RefCell;
use critical_section::Mutex;

/// Owns the device that handles the USB interrupt
pub struct UsbInterrupt<'a> {
    device: Mutex<RefCell<Option<Device<'a>>>>,
}

impl<'a> UsbInterrupt<'a> {
    pub const fn new() -> Self {
        UsbInterrupt {
            device: Mutex::new(RefCell::new(None)),
        }
    }

    /// Install the device that handles the interrupt
    ///
    /// There's one device per peripheral. If a device is already installed,
    /// returns `device` back to the caller.
    pub fn register(&self, device: Device<'a>) -> Result<(), Device<'a>> {
        critical_section::with(|cs| {
            let mut slot = self.device.borrow_ref_mut(cs);
            if slot.is_some() {
                return Err(device);
            }
            *slot = Some(device);
            Ok(())
        })
    }

    /// Remove the device, so that it can be detached or dropped
    ///
    /// After this call, interrupts are ignored.
    pub fn take(&self) -> Option<Device<'a>> {
        critical_section::with(|cs| self.device.borrow_ref_mut(cs).take())
    }

    /// Handle the USB interrupt
    ///
    /// Call this from the interrupt vector. Does nothing if there's no
    /// device.
    pub fn on_interrupt(&self) {
        self.with_device(|device| device.handle_irq());
    }

    /// Interrupt-safe, mutable access to the device
    ///
    /// Returns `None` if there's no device.
    pub fn with_device<R>(&self, func: impl FnOnce(&mut Device<'a>) -> R) -> Option<R> {
        critical_section::with(|cs| self.device.borrow_ref_mut(cs).as_mut().map(func))
    }
}

impl Default for UsbInterrupt<'_> {
    fn default() -> Self {
        Self::new()
    }
}
