//! The SETUP packet of a control transfer

use usb_device::{
    control::{Recipient, RequestType},
    UsbDirection,
};

/// An 8-byte SETUP packet, captured at the start of a control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetupPacket {
    /// `bmRequestType`
    pub request_type: u8,
    /// `bRequest`
    pub request: u8,
    /// `wValue`
    pub value: u16,
    /// `wIndex`
    pub index: u16,
    /// `wLength`
    pub length: u16,
}

impl SetupPacket {
    pub const SIZE: usize = 8;

    /// Parse a SETUP packet from the wire
    ///
    /// Returns `None` if `bytes` isn't exactly eight bytes.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; Self::SIZE] = bytes.try_into().ok()?;
        Some(SetupPacket {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let [v0, v1] = self.value.to_le_bytes();
        let [i0, i1] = self.index.to_le_bytes();
        let [l0, l1] = self.length.to_le_bytes();
        [self.request_type, self.request, v0, v1, i0, i1, l0, l1]
    }

    /// Direction of the data stage
    pub fn direction(&self) -> UsbDirection {
        UsbDirection::from(self.request_type & 0x80)
    }

    pub fn request_type(&self) -> RequestType {
        match (self.request_type >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    pub fn recipient(&self) -> Recipient {
        match self.request_type & 0b11111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }

    /// `wValue` of a descriptor request: descriptor type, then index
    pub fn descriptor_type_index(&self) -> (u8, u8) {
        let [index, kind] = self.value.to_le_bytes();
        (kind, index)
    }
}

#[cfg(test)]
mod test {
    use super::SetupPacket;
    use usb_device::{
        control::{Recipient, Request, RequestType},
        descriptor::descriptor_type,
        UsbDirection,
    };

    #[test]
    fn get_configuration_descriptor() {
        let setup = SetupPacket::parse(&[0x80, 0x06, 0x00, 0x02, 0x00, 0x00, 0x09, 0x00]).unwrap();
        assert_eq!(setup.request, Request::GET_DESCRIPTOR);
        assert_eq!(setup.direction(), UsbDirection::In);
        assert_eq!(setup.request_type(), RequestType::Standard);
        assert_eq!(setup.recipient(), Recipient::Device);
        assert_eq!(setup.descriptor_type_index(), (descriptor_type::CONFIGURATION, 0));
        assert_eq!(setup.length, 9);
    }

    #[test]
    fn class_request_to_interface() {
        let setup = SetupPacket {
            request_type: 0x21,
            request: 0x20,
            value: 0,
            index: 1,
            length: 7,
        };
        assert_eq!(setup.direction(), UsbDirection::Out);
        assert_eq!(setup.request_type(), RequestType::Class);
        assert_eq!(setup.recipient(), Recipient::Interface);
        assert_eq!(SetupPacket::parse(&setup.to_bytes()), Some(setup));
    }

    #[test]
    fn wrong_length() {
        assert!(SetupPacket::parse(&[0; 7]).is_none());
        assert!(SetupPacket::parse(&[0; 9]).is_none());
    }
}
