//! Register access for the USB full-speed device peripheral
//!
//! There's no generated RAL crate for this peripheral, so this module
//! declares the register block, and every field we touch, in the shape
//! that the `ral-registers` macros expect. Field modules carry an `offset`,
//! a `mask`, and the (empty) `R`, `W`, and `RW` value modules.
//!
//! It also adds some enhancements for endpoint register access.

// Not every field is used, but the map is complete for the registers we touch.
#![allow(non_snake_case, non_upper_case_globals, dead_code)]

use crate::vcell::VCell;
use core::ops::Deref;

pub use ral_registers::{modify_reg, read_reg, write_reg};

/// Declares a register field module
macro_rules! field {
    ($name:ident: $ty:ty, $offset:expr, $width:expr) => {
        pub mod $name {
            pub const offset: $ty = $offset;
            pub const mask: $ty = ((1 << $width) - 1) << $offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    };
}
pub(crate) use field;

pub mod usb {
    use super::{EprCell, VCell};

    /// USB peripheral registers
    ///
    /// Registers are 16 bits wide, placed on a 32 bit stride.
    #[repr(C)]
    pub struct RegisterBlock {
        pub EPR: [EprCell; 8],
        _reserved: [u32; 8],
        pub CNTR: VCell<u32>,
        pub ISTR: VCell<u32>,
        pub FNR: VCell<u32>,
        pub DADDR: VCell<u32>,
        pub BTABLE: VCell<u32>,
        pub LPMCSR: VCell<u32>,
        pub BCDR: VCell<u32>,
    }

    pub mod CNTR {
        field!(FRES: u32, 0, 1);
        field!(PDWN: u32, 1, 1);
        field!(LP_MODE: u32, 2, 1);
        field!(FSUSP: u32, 3, 1);
        field!(RESUME: u32, 4, 1);
        field!(ESOFM: u32, 8, 1);
        field!(SOFM: u32, 9, 1);
        field!(RESETM: u32, 10, 1);
        field!(SUSPM: u32, 11, 1);
        field!(WKUPM: u32, 12, 1);
        field!(ERRM: u32, 13, 1);
        field!(PMAOVRM: u32, 14, 1);
        field!(CTRM: u32, 15, 1);
    }

    pub mod ISTR {
        field!(EP_ID: u32, 0, 4);
        field!(DIR: u32, 4, 1);
        field!(ESOF: u32, 8, 1);
        field!(SOF: u32, 9, 1);
        field!(RESET: u32, 10, 1);
        field!(SUSP: u32, 11, 1);
        field!(WKUP: u32, 12, 1);
        field!(ERR: u32, 13, 1);
        field!(PMAOVR: u32, 14, 1);
        field!(CTR: u32, 15, 1);
    }

    pub mod DADDR {
        field!(ADD: u32, 0, 7);
        field!(EF: u32, 7, 1);
    }

    pub mod BTABLE {
        field!(BTABLE: u32, 3, 13);
    }

    pub mod BCDR {
        field!(DPPU: u32, 15, 1);
    }
}

/// An endpoint register
///
/// The status and data toggle fields toggle when written with a one, and
/// the transfer-complete flags clear when written with a zero. Host tests
/// substitute a cell that models those semantics.
#[cfg(not(test))]
pub type EprCell = VCell<u32>;
#[cfg(test)]
pub use crate::testing::EprCell;

/// The RAL API requires us to name each register. Endpoint registers are
/// an array, so we hand out one at a time with this function, the `Epr` type,
/// and the helper module.
pub mod endpoint_register {
    use super::EprCell;

    pub struct Epr<'a> {
        pub EPR: &'a EprCell,
    }

    pub mod EPR {
        field!(EA: u32, 0, 4);
        field!(STAT_TX: u32, 4, 2);
        field!(DTOG_TX: u32, 6, 1);
        field!(CTR_TX: u32, 7, 1);
        field!(EP_KIND: u32, 8, 1);
        field!(EP_TYPE: u32, 9, 2);
        field!(SETUP: u32, 11, 1);
        field!(STAT_RX: u32, 12, 2);
        field!(DTOG_RX: u32, 14, 1);
        field!(CTR_RX: u32, 15, 1);
    }

    /// # Panics
    ///
    /// Panics if `endpoint` is eight or more.
    pub fn register(usb: &super::usb::RegisterBlock, endpoint: usize) -> Epr<'_> {
        Epr {
            EPR: &usb.EPR[endpoint],
        }
    }
}

/// A pointer to a register block, owned by the driver
pub struct Instance<RB> {
    ptr: *const RB,
}

impl<RB> Deref for Instance<RB> {
    type Target = RB;
    fn deref(&self) -> &RB {
        // Safety: the pointer came from a `Peripherals` implementation, which
        // promises that it's valid for as long as the driver exists.
        unsafe { &*self.ptr }
    }
}

// Safety: the driver is the sole owner of the register blocks.
unsafe impl<RB> Send for Instance<RB> {}

/// The register blocks needed to drive one USB peripheral
pub struct Instances {
    pub usb: Instance<usb::RegisterBlock>,
    pub pma: Instance<crate::pma::RegisterBlock>,
}

pub fn instances<P: crate::Peripherals>(peripherals: P) -> Instances {
    Instances {
        usb: Instance {
            ptr: peripherals.usb().cast(),
        },
        pma: Instance {
            ptr: peripherals.packet_memory().cast(),
        },
    }
}

const _: [(); 1] = [(); (core::mem::size_of::<usb::RegisterBlock>() == 0x5C) as usize];
