//! A USB full-speed device stack for packet-memory USB peripherals
//!
//! `usbd-pma` drives the USB device peripheral found on STM32 parts like
//! the F0, L0, L4, and G4. That peripheral keeps its buffers in a dedicated
//! packet memory, and exposes eight bidirectional endpoint registers.
//!
//! You describe the device as a tree of [`Configuration`]s, [`Interface`]s,
//! and [`Endpoint`]s, and lend that tree to a [`DeviceBuilder`]. Each level
//! borrows a slice of the next, so you decide where the tree lives, and the
//! device only keeps its endpoint table. The resulting [`Device`] enumerates
//! on its own: it answers the standard
//! requests, produces every descriptor, and lays out packet memory whenever
//! the host selects a configuration. Your code sees endpoint traffic through
//! [`EndpointHandler`]s, and class or vendor requests through a
//! [`RequestHandler`].
//!
//! To interface the library, you must define a safe implementation of
//! [`Peripherals`], and a [`Platform`] for the clocks and the interrupt
//! controller.
//!
//! # Example
//!
//! ```no_run
//! use usbd_pma::{
//!     Binding, Configuration, DeviceBuilder, Endpoint, EndpointHandler, EndpointIo,
//!     EndpointType, Interface, Rx,
//! };
//! use usb_device::device::UsbVidPid;
//! # struct Board;
//! # impl usbd_pma::Platform for Board {
//! #   fn power_up(&mut self) {}
//! #   fn delay_us(&mut self, _: u32) {}
//! #   fn enable_interrupt(&mut self) {}
//! #   fn disable_interrupt(&mut self) {}
//! # }
//! # struct Usb;
//! # unsafe impl usbd_pma::Peripherals for Usb {
//! #   fn usb(&self) -> *const () { 0x4000_5C00 as _ }
//! #   fn packet_memory(&self) -> *const () { 0x4000_6000 as _ }
//! # }
//! # let (mut board, usb) = (Board, Usb);
//!
//! /// Sends back everything it receives
//! struct Loopback;
//!
//! impl EndpointHandler for Loopback {
//!     fn on_out(&mut self, io: &mut EndpointIo<'_>, data: &[u8]) -> Rx {
//!         io.send(data);
//!         Rx::Ready
//!     }
//! }
//!
//! let mut loopback = Loopback;
//! let mut endpoints = [Binding::new(Endpoint::new(EndpointType::Bulk), &mut loopback)];
//! let mut interfaces = [Interface::new(&mut endpoints)?.description("Loopback")];
//! let mut configurations = [Configuration::new(&mut interfaces)?];
//!
//! let mut device = DeviceBuilder::new(UsbVidPid(0x1209, 0x0001))
//!     .manufacturer("usbd-pma")
//!     .product("Loopback")
//!     .configurations(&mut configurations)?
//!     .build(usb)?;
//!
//! device.init(&mut board);
//! // Call device.handle_irq() from the USB interrupt, or register the
//! // device with an interrupt::UsbInterrupt.
//! # Ok::<(), usb_device::UsbError>(())
//! ```

#![no_std]

#[macro_use]
mod log;

mod pma;
mod ral;
mod vcell;

pub mod configuration;
pub mod control;
pub mod descriptor;
pub mod device;
pub mod endpoint;
pub mod interface;
pub mod interrupt;
pub mod setup;

#[cfg(test)]
mod testing;

pub use configuration::Configuration;
pub use control::{ControlIo, RequestHandler, Stage};
pub use device::{Device, DeviceBuilder};
pub use endpoint::{Capabilities, Endpoint, EndpointHandler, EndpointIo, EndpointType, Rx, Stat};
pub use interface::{Binding, Interface};
pub use setup::SetupPacket;

/// Eight endpoint registers, each with a transmit and receive direction
pub const MAX_ENDPOINTS: usize = 8;
/// Interfaces per configuration
pub const MAX_INTERFACES: usize = 8;
pub const MAX_CONFIGURATIONS: usize = 8;
/// Largest full-speed bulk and control packet
pub const MAX_PACKET_SIZE: usize = 64;

/// A type that owns the USB register blocks
///
/// An implementation of `Peripherals` is expected to own
///
/// - the USB peripheral registers
/// - the USB packet memory
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that
/// owns the register blocks required for all USB operation.
/// The pointers returned by the methods are assumed to be
/// valid for as long as the [`Device`] exists, and will be
/// cast to register definitions.
///
/// # Example
///
/// A safe implementation of `Peripherals` that works with an
/// `stm32` PAC. Assume that `pac` is the PAC for your part, and
/// that your HAL has enabled the USB clock.
///
/// ```
/// # mod pac {
/// #   pub struct USB; impl USB { pub const PTR: *const () = 0x4000_5C00 as _; }
/// #   pub struct Peripherals { pub USB: USB }
/// #   impl Peripherals { pub fn take() -> Option<Self> { Some(Peripherals { USB: USB }) } }
/// # }
/// use usbd_pma::Peripherals;
///
/// /// Packet memory follows the USB registers
/// const PACKET_MEMORY: *const () = 0x4000_6000 as _;
///
/// struct Usb(pac::USB);
///
/// unsafe impl Peripherals for Usb {
///     fn usb(&self) -> *const () {
///         pac::USB::PTR
///     }
///     fn packet_memory(&self) -> *const () {
///         PACKET_MEMORY
///     }
/// }
///
/// let usb = Usb(pac::Peripherals::take().unwrap().USB);
/// assert_eq!(usb.usb(), 0x4000_5C00 as *const ());
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the USB peripheral registers
    fn usb(&self) -> *const ();
    /// Returns the address of the USB packet memory
    fn packet_memory(&self) -> *const ();
}

/// The parts of the system that surround the USB peripheral
///
/// [`Device::init`] and [`Device::detach`] call these. Everything inside the
/// USB peripheral itself, including the D+ pull-up, is handled by the
/// device.
pub trait Platform {
    /// Reset and clock the USB peripheral, and the clock recovery system
    /// that trims its 48 MHz clock
    fn power_up(&mut self);
    /// Busy-wait for at least `us` microseconds
    fn delay_us(&mut self, us: u32);
    /// Unmask the USB interrupt
    fn enable_interrupt(&mut self);
    /// Mask the USB interrupt
    fn disable_interrupt(&mut self);
}
