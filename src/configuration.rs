//! Configurations: the interfaces the host can switch on together

use crate::{descriptor::DescriptorWriter, interface::Interface, MAX_ENDPOINTS, MAX_INTERFACES};
use usb_device::{descriptor::descriptor_type, UsbError};

pub(crate) const CONFIGURATION_DESCRIPTOR_SIZE: usize = 9;

/// Interface string indices have these high bits set. The low bits hold the
/// configuration index (bits 5:3) and interface number (bits 2:0).
pub(crate) const INTERFACE_STRING_BASE: u8 = 0x40;

/// Bus powered
const ATTRIBUTES: u8 = 0x80;

/// A USB configuration
///
/// The configuration borrows its interfaces.
pub struct Configuration<'a> {
    interfaces: &'a mut [Interface<'a>],
    max_power_ma: u16,
}

impl<'a> Configuration<'a> {
    /// A configuration of these interfaces, drawing at most 50 mA
    ///
    /// Fails if there are more than eight interfaces, or if they need more
    /// endpoints than the hardware has next to EP0.
    pub fn new(interfaces: &'a mut [Interface<'a>]) -> Result<Self, UsbError> {
        let endpoints: usize = interfaces.iter().map(Interface::num_endpoints).sum();
        if interfaces.len() > MAX_INTERFACES || endpoints > MAX_ENDPOINTS - 1 {
            return Err(UsbError::EndpointOverflow);
        }
        Ok(Configuration {
            interfaces,
            max_power_ma: 50,
        })
    }

    /// Set the most current the device draws, in mA. Limited to 500 mA.
    pub fn max_power(mut self, milliamps: u16) -> Self {
        self.max_power_ma = milliamps.min(500);
        self
    }

    pub fn num_interfaces(&self) -> usize {
        self.interfaces.len()
    }

    /// Endpoints across all interfaces, not counting EP0
    pub fn num_endpoints(&self) -> usize {
        self.interfaces.iter().map(Interface::num_endpoints).sum()
    }

    pub(crate) fn interfaces(&self) -> &[Interface<'a>] {
        &*self.interfaces
    }

    pub(crate) fn interfaces_mut(&mut self) -> &mut [Interface<'a>] {
        &mut *self.interfaces
    }

    /// `wTotalLength` of the configuration descriptor
    pub fn descriptor_size(&self) -> usize {
        CONFIGURATION_DESCRIPTOR_SIZE
            + self
                .interfaces
                .iter()
                .map(Interface::descriptor_size)
                .sum::<usize>()
    }

    /// Write the complete configuration descriptor for configuration `index`
    pub(crate) fn write_descriptor(
        &self,
        writer: &mut DescriptorWriter,
        index: u8,
    ) -> Result<(), UsbError> {
        let total = u16::try_from(self.descriptor_size()).map_err(|_| UsbError::BufferOverflow)?;
        let [total_lo, total_hi] = total.to_le_bytes();
        writer.write(
            descriptor_type::CONFIGURATION,
            &[
                total_lo,
                total_hi,
                self.interfaces.len() as u8,
                index + 1,
                0, // no string
                ATTRIBUTES,
                (self.max_power_ma / 2) as u8,
            ],
        )?;

        let mut next_endpoint = 1;
        for (number, interface) in self.interfaces.iter().enumerate() {
            let string = if interface.description_string().is_some() {
                interface_string(index, number as u8)
            } else {
                0
            };
            next_endpoint = interface.write_descriptor(writer, number as u8, string, next_endpoint)?;
        }
        Ok(())
    }
}

impl Default for Configuration<'_> {
    /// A configuration without interfaces
    fn default() -> Self {
        Configuration {
            interfaces: &mut [],
            max_power_ma: 50,
        }
    }
}

/// String index for interface `number` of configuration `index`
pub(crate) fn interface_string(index: u8, number: u8) -> u8 {
    INTERFACE_STRING_BASE | ((index & 0b111) << 3) | (number & 0b111)
}

/// Decode an interface string index into configuration index and
/// interface number
pub(crate) fn decode_interface_string(string: u8) -> Option<(usize, usize)> {
    if string & 0xC0 == INTERFACE_STRING_BASE {
        Some((usize::from((string >> 3) & 0b111), usize::from(string & 0b111)))
    } else {
        None
    }
}
