//! Descriptor serialization

use usb_device::{descriptor::descriptor_type, UsbError};

/// Largest descriptor the device can produce
///
/// Configuration descriptors are checked against this size when the
/// configuration is added to the device.
pub const MAX_DESCRIPTOR_SIZE: usize = 512;

/// Writes descriptors into a byte buffer
pub struct DescriptorWriter<'a> {
    buf: &'a mut [u8],
    position: usize,
}

impl<'a> DescriptorWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        DescriptorWriter { buf, position: 0 }
    }

    /// Number of bytes written so far
    pub fn position(&self) -> usize {
        self.position
    }

    /// The bytes written so far
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.position]
    }

    /// Write raw bytes, like a class-specific descriptor block
    pub fn raw(&mut self, bytes: &[u8]) -> Result<(), UsbError> {
        let end = self.position + bytes.len();
        self.buf
            .get_mut(self.position..end)
            .ok_or(UsbError::BufferOverflow)?
            .copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    /// Write a descriptor, prefixed with its length and `descriptor_type`
    pub fn write(&mut self, descriptor_type: u8, descriptor: &[u8]) -> Result<(), UsbError> {
        let length = u8::try_from(descriptor.len() + 2).map_err(|_| UsbError::BufferOverflow)?;
        self.raw(&[length, descriptor_type])?;
        self.raw(descriptor)
    }

    /// Write a string descriptor, encoding `string` as UTF-16LE
    pub fn string(&mut self, string: &str) -> Result<(), UsbError> {
        let start = self.position;
        self.raw(&[0, descriptor_type::STRING])?;
        for unit in string.encode_utf16() {
            self.raw(&unit.to_le_bytes())?;
        }
        let length = u8::try_from(self.position - start).map_err(|_| UsbError::BufferOverflow)?;
        self.buf[start] = length;
        Ok(())
    }
}
