//! Interfaces: a group of endpoints and the metadata the host sees

use crate::{
    descriptor::DescriptorWriter,
    endpoint::{Endpoint, EndpointHandler},
    MAX_ENDPOINTS,
};
use usb_device::{descriptor::descriptor_type, UsbDirection, UsbError};

pub(crate) const INTERFACE_DESCRIPTOR_SIZE: usize = 9;
pub(crate) const ENDPOINT_DESCRIPTOR_SIZE: usize = 7;

/// An endpoint and the handler for its transfers
pub struct Binding<'a> {
    pub(crate) endpoint: Endpoint,
    pub(crate) handler: &'a mut dyn EndpointHandler,
}

impl<'a> Binding<'a> {
    pub fn new(endpoint: Endpoint, handler: &'a mut dyn EndpointHandler) -> Self {
        Binding { endpoint, handler }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// A USB interface
///
/// The interface borrows its endpoints. Their order decides their numbers
/// and their place in the device's endpoint table.
pub struct Interface<'a> {
    endpoints: &'a mut [Binding<'a>],
    class: u8,
    subclass: u8,
    protocol: u8,
    description: Option<&'a str>,
    extra: &'a [u8],
}

impl<'a> Interface<'a> {
    /// A vendor-specific interface with these endpoints
    ///
    /// Fails if an endpoint's buffers are invalid, or if there are more
    /// endpoints than the hardware has next to EP0.
    pub fn new(endpoints: &'a mut [Binding<'a>]) -> Result<Self, UsbError> {
        if endpoints.len() > MAX_ENDPOINTS - 1 {
            return Err(UsbError::EndpointOverflow);
        }
        for binding in endpoints.iter() {
            binding.endpoint.validate()?;
        }
        Ok(Interface {
            endpoints,
            class: 0xFF,
            subclass: 0,
            protocol: 0,
            description: None,
            extra: &[],
        })
    }

    pub fn class(mut self, class: u8, subclass: u8, protocol: u8) -> Self {
        self.class = class;
        self.subclass = subclass;
        self.protocol = protocol;
        self
    }

    /// Describe the interface with a string descriptor
    pub fn description(mut self, description: &'a str) -> Self {
        self.description = Some(description);
        self
    }

    /// Class-specific descriptors, written after the interface descriptor
    pub fn extra_descriptor(mut self, extra: &'a [u8]) -> Self {
        self.extra = extra;
        self
    }

    pub fn num_endpoints(&self) -> usize {
        self.endpoints.len()
    }

    pub fn description_string(&self) -> Option<&'a str> {
        self.description
    }

    pub fn extra_descriptor_size(&self) -> usize {
        self.extra.len()
    }

    pub(crate) fn bindings(&self) -> &[Binding<'a>] {
        &*self.endpoints
    }

    pub(crate) fn binding_mut(&mut self, index: usize) -> Option<&mut Binding<'a>> {
        self.endpoints.get_mut(index)
    }

    /// Endpoint descriptors this interface reports: one per direction in use
    fn num_directions(&self) -> usize {
        self.endpoints
            .iter()
            .map(|binding| &binding.endpoint)
            .map(|ep| usize::from(ep.rx_size() > 0) + usize::from(ep.tx_size() > 0))
            .sum()
    }

    /// Size of the interface descriptor and everything that follows it
    pub(crate) fn descriptor_size(&self) -> usize {
        INTERFACE_DESCRIPTOR_SIZE + self.extra.len() + ENDPOINT_DESCRIPTOR_SIZE * self.num_directions()
    }

    /// Write the interface, extra, and endpoint descriptors
    ///
    /// Endpoints are numbered from `first`, and OUT comes before IN. Returns
    /// the number after this interface's last endpoint.
    pub(crate) fn write_descriptor(
        &self,
        writer: &mut DescriptorWriter,
        number: u8,
        string: u8,
        first: u8,
    ) -> Result<u8, UsbError> {
        writer.write(
            descriptor_type::INTERFACE,
            &[
                number,
                0, // alternate setting
                self.num_directions() as u8,
                self.class,
                self.subclass,
                self.protocol,
                string,
            ],
        )?;
        writer.raw(self.extra)?;

        let mut address = first;
        for ep in self.endpoints.iter().map(|binding| &binding.endpoint) {
            for (direction, size) in [
                (UsbDirection::Out, ep.rx_size()),
                (UsbDirection::In, ep.tx_size()),
            ] {
                if size == 0 {
                    continue;
                }
                let [size_lo, size_hi] = size.to_le_bytes();
                writer.write(
                    descriptor_type::ENDPOINT,
                    &[
                        address | direction as u8,
                        ep.kind().attributes(),
                        size_lo,
                        size_hi,
                        ep.interval(),
                    ],
                )?;
            }
            address += 1;
        }
        Ok(address)
    }
}

impl Default for Interface<'_> {
    /// A vendor-specific interface with no endpoints
    fn default() -> Self {
        Interface {
            endpoints: &mut [],
            class: 0xFF,
            subclass: 0,
            protocol: 0,
            description: None,
            extra: &[],
        }
    }
}
