//! Packet memory and the buffer descriptor table
//!
//! Packet memory is the peripheral's dedicated RAM. It's organized as
//! 16 bit words, and it holds both the buffer descriptor table (at offset
//! zero) and every endpoint's transmit and receive buffers.
//!
//! The module implements a RAL-compatible interface for working with
//! buffer descriptors.

#![allow(non_snake_case, non_upper_case_globals)]

use crate::{vcell::VCell, MAX_ENDPOINTS};
use usb_device::UsbError;

/// Size of packet memory, in bytes
pub const PMA_SIZE: usize = 1024;

/// Size of a buffer descriptor, in bytes
const DESCRIPTOR_SIZE: usize = 8;

#[repr(C)]
pub struct RegisterBlock {
    words: [VCell<u16>; PMA_SIZE / 2],
}

#[repr(C)]
pub struct BufferDescriptor {
    pub ADDR_TX: VCell<u16>,
    pub COUNT_TX: VCell<u16>,
    pub ADDR_RX: VCell<u16>,
    pub COUNT_RX: VCell<u16>,
}

const _: [(); 1] = [(); (core::mem::size_of::<BufferDescriptor>() == DESCRIPTOR_SIZE) as usize];

pub mod COUNT_TX {
    crate::ral::field!(COUNT: u16, 0, 10);
}

pub mod COUNT_RX {
    crate::ral::field!(COUNT: u16, 0, 10);
    crate::ral::field!(NUM_BLOCK: u16, 10, 5);
    crate::ral::field!(BL_SIZE: u16, 15, 1);
}

impl RegisterBlock {
    /// Returns the buffer descriptor for `endpoint`
    ///
    /// # Panics
    ///
    /// Panics if `endpoint` is outside of the table.
    pub fn descriptor(&self, endpoint: usize) -> &BufferDescriptor {
        const WORDS: usize = DESCRIPTOR_SIZE / 2;
        let words = &self.words[endpoint * WORDS..(endpoint + 1) * WORDS];
        // Safety: BufferDescriptor is four u16 cells, layout-compatible with
        // the four words in the slice. Lifetime is tied to self.
        unsafe { &*words.as_ptr().cast() }
    }

    /// Copy `buffer.len()` bytes out of packet memory, starting at `offset`
    pub fn read(&self, offset: u16, buffer: &mut [u8]) {
        let start = usize::from(offset) / 2;
        for (word, chunk) in self.words[start..].iter().zip(buffer.chunks_mut(2)) {
            let bytes = word.read().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    /// Copy `data` into packet memory, starting at `offset`
    ///
    /// An odd trailing byte is padded with zero.
    pub fn write(&self, offset: u16, data: &[u8]) {
        let start = usize::from(offset) / 2;
        for (word, chunk) in self.words[start..].iter().zip(data.chunks(2)) {
            let mut bytes = [0; 2];
            bytes[..chunk.len()].copy_from_slice(chunk);
            word.write(u16::from_le_bytes(bytes));
        }
    }
}

/// Encode a receive buffer capacity for `COUNT_RX`
///
/// `size` is assumed valid: even, and a multiple of 32 above 62 bytes.
pub fn rx_capacity(size: u16) -> u16 {
    if size <= 62 {
        (size / 2) << COUNT_RX::NUM_BLOCK::offset
    } else {
        COUNT_RX::BL_SIZE::mask | ((size / 32 - 1) << COUNT_RX::NUM_BLOCK::offset)
    }
}

/// A span of packet memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub offset: u16,
    pub len: u16,
}

/// The buffers owned by one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Regions {
    pub tx: Region,
    pub rx: Region,
}

/// Packet memory allocator
///
/// Hands out regions in increasing address order, starting just past the
/// buffer descriptor table.
pub struct Allocator {
    ptr: usize,
}

impl Allocator {
    /// Create an allocator for a table of `endpoints` buffer descriptors
    pub fn new(endpoints: usize) -> Self {
        Allocator {
            ptr: endpoints * DESCRIPTOR_SIZE,
        }
    }
    /// Allocates a region of `size` bytes
    pub fn allocate(&mut self, size: u16) -> Option<Region> {
        let end = self.ptr.checked_add(usize::from(size))?;
        if end > PMA_SIZE {
            None
        } else {
            let region = Region {
                offset: self.ptr as u16,
                len: size,
            };
            self.ptr = end;
            Some(region)
        }
    }
}

/// Lay out packet memory for a table of endpoints
///
/// `sizes` holds each endpoint's `(tx, rx)` capacity, in table order. Each
/// endpoint receives its transmit buffer, then its receive buffer.
pub fn layout(sizes: &[(u16, u16)]) -> Result<heapless::Vec<Regions, MAX_ENDPOINTS>, UsbError> {
    if sizes.len() > MAX_ENDPOINTS {
        return Err(UsbError::EndpointOverflow);
    }
    let mut alloc = Allocator::new(sizes.len());
    let mut regions = heapless::Vec::new();
    for &(tx, rx) in sizes {
        let tx = alloc.allocate(tx).ok_or(UsbError::EndpointMemoryOverflow)?;
        let rx = alloc.allocate(rx).ok_or(UsbError::EndpointMemoryOverflow)?;
        regions
            .push(Regions { tx, rx })
            .map_err(|_| UsbError::EndpointOverflow)?;
    }
    Ok(regions)
}
