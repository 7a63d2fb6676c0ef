//! Endpoints
//!
//! An [`Endpoint`] is one slot of the device's endpoint table. Once bound,
//! it owns the endpoint register and buffer descriptor that share its index,
//! and the packet memory regions assigned by the layout.
//!
//! The transfer type is a tag on the endpoint; the only behaviors that hang
//! off of it are described by [`Capabilities`].

use crate::{
    pma::{self, Region, Regions},
    ral::{
        self,
        endpoint_register::{self, EPR},
        Instances,
    },
    MAX_PACKET_SIZE,
};
use bitflags::bitflags;
use usb_device::UsbError;

/// USB transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl EndpointType {
    /// Transfer type bits of the endpoint descriptor's `bmAttributes`
    pub fn attributes(self) -> u8 {
        match self {
            EndpointType::Control => 0b00,
            EndpointType::Isochronous => 0b01,
            EndpointType::Bulk => 0b10,
            EndpointType::Interrupt => 0b11,
        }
    }

    /// `EP_TYPE` encoding, which doesn't match the descriptor's
    fn hardware(self) -> u32 {
        match self {
            EndpointType::Bulk => 0b00,
            EndpointType::Control => 0b01,
            EndpointType::Isochronous => 0b10,
            EndpointType::Interrupt => 0b11,
        }
    }

    pub fn capabilities(self) -> Capabilities {
        match self {
            EndpointType::Control => Capabilities::SETUP,
            EndpointType::Interrupt => Capabilities::INTERVAL,
            EndpointType::Isochronous | EndpointType::Bulk => Capabilities::empty(),
        }
    }
}

bitflags! {
    /// Behaviors that depend on the transfer type
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        /// Receives SETUP packets. Data toggles survive a reset, since the
        /// hardware manages them across the stages of a control transfer.
        const SETUP = 1 << 0;
        /// Reports its configured polling interval in `bInterval`.
        const INTERVAL = 1 << 1;
    }
}

/// Endpoint status, as encoded in `STAT_RX` and `STAT_TX`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Stat {
    Disabled = 0b00,
    Stall = 0b01,
    Nak = 0b10,
    Valid = 0b11,
}

impl Stat {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => Stat::Disabled,
            0b01 => Stat::Stall,
            0b10 => Stat::Nak,
            _ => Stat::Valid,
        }
    }
    fn rx(self) -> u32 {
        (self as u32) << EPR::STAT_RX::offset
    }
    fn tx(self) -> u32 {
        (self as u32) << EPR::STAT_TX::offset
    }
}

/// Fields that toggle when written with a one
const TOGGLES: u32 = EPR::STAT_RX::mask | EPR::STAT_TX::mask | EPR::DTOG_RX::mask | EPR::DTOG_TX::mask;

/// Flags that clear when written with a zero
const COMPLETE: u32 = EPR::CTR_RX::mask | EPR::CTR_TX::mask;

/// The kind of packet that completed reception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token {
    Setup,
    Out,
}

/// The transfers that completed since the last interrupt
#[derive(Debug, Default)]
pub(crate) struct Completion {
    /// Reception kind and length. The data is in the caller's buffer.
    pub received: Option<(Token, usize)>,
    pub transmitted: bool,
}

/// A USB endpoint
pub struct Endpoint {
    kind: EndpointType,
    rx_size: u16,
    tx_size: u16,
    interval: u8,
    index: usize,
    /// Written on every register update: type and address
    base: u32,
    regions: Regions,
}

const NO_REGION: Region = Region { offset: 0, len: 0 };

impl Endpoint {
    /// Create an endpoint with 64 byte receive and transmit buffers
    pub const fn new(kind: EndpointType) -> Self {
        Endpoint {
            kind,
            rx_size: MAX_PACKET_SIZE as u16,
            tx_size: MAX_PACKET_SIZE as u16,
            interval: 1,
            index: 0,
            base: 0,
            regions: Regions {
                tx: NO_REGION,
                rx: NO_REGION,
            },
        }
    }

    /// Set the receive (OUT) buffer size. Zero disables the direction.
    pub const fn with_rx_size(mut self, size: u16) -> Self {
        self.rx_size = size;
        self
    }

    /// Set the transmit (IN) buffer size. Zero disables the direction.
    pub const fn with_tx_size(mut self, size: u16) -> Self {
        self.tx_size = size;
        self
    }

    /// Set the polling interval, in frames
    ///
    /// Only reported for types with [`Capabilities::INTERVAL`].
    pub const fn with_interval(mut self, interval: u8) -> Self {
        self.interval = interval;
        self
    }

    pub fn kind(&self) -> EndpointType {
        self.kind
    }

    pub fn capabilities(&self) -> Capabilities {
        self.kind.capabilities()
    }

    pub fn rx_size(&self) -> u16 {
        self.rx_size
    }

    pub fn tx_size(&self) -> u16 {
        self.tx_size
    }

    /// The value for the endpoint descriptor's `bInterval`
    pub fn interval(&self) -> u8 {
        if self.capabilities().contains(Capabilities::INTERVAL) {
            self.interval
        } else {
            1
        }
    }

    /// Index in the endpoint table, valid once bound
    pub fn index(&self) -> usize {
        self.index
    }

    /// Buffers must be even, no larger than a full-speed packet, and at
    /// least one direction must be in use.
    pub(crate) fn validate(&self) -> Result<(), UsbError> {
        let valid = |size: u16| size % 2 == 0 && usize::from(size) <= MAX_PACKET_SIZE;
        if valid(self.rx_size) && valid(self.tx_size) && (self.rx_size | self.tx_size) != 0 {
            Ok(())
        } else {
            Err(UsbError::InvalidEndpoint)
        }
    }

    /// Bind the endpoint to table slot `index`, then reset it
    pub(crate) fn bind(&mut self, hw: &Instances, index: usize, regions: Regions) {
        self.index = index;
        self.regions = regions;

        let bd = hw.pma.descriptor(index);
        ral::write_reg!(crate::pma, bd, ADDR_TX, regions.tx.offset);
        ral::write_reg!(crate::pma, bd, COUNT_TX, COUNT: 0);
        ral::write_reg!(crate::pma, bd, ADDR_RX, regions.rx.offset);
        ral::write_reg!(crate::pma, bd, COUNT_RX, pma::rx_capacity(self.rx_size));

        self.reset(hw, index as u8);
    }

    /// Set the type and address, then accept OUT data and NAK IN tokens
    ///
    /// An unused direction is disabled.
    pub(crate) fn reset(&mut self, hw: &Instances, address: u8) {
        self.base =
            (self.kind.hardware() << EPR::EP_TYPE::offset) | (u32::from(address) & EPR::EA::mask);

        let rx = if self.rx_size > 0 {
            Stat::Valid
        } else {
            Stat::Disabled
        };
        let tx = if self.tx_size > 0 {
            Stat::Nak
        } else {
            Stat::Disabled
        };

        if self.capabilities().contains(Capabilities::SETUP) {
            self.write(
                &hw.usb,
                EPR::STAT_RX::mask | EPR::STAT_TX::mask,
                rx.rx() | tx.tx(),
                0,
            );
        } else {
            // Data toggles to DATA0, and drop stale completions.
            self.write(&hw.usb, TOGGLES, rx.rx() | tx.tx(), COMPLETE);
        }
    }

    /// Write the endpoint register
    ///
    /// `mask` selects the toggle fields that are driven to `wanted`. The
    /// completion flags in `ack` are cleared; the other completion flag is
    /// written as one, which leaves it untouched.
    fn write(&self, usb: &ral::usb::RegisterBlock, mask: u32, wanted: u32, ack: u32) {
        let epr = endpoint_register::register(usb, self.index);
        let current = ral::read_reg!(endpoint_register, &epr, EPR);
        let value = self.base | (COMPLETE & !ack) | ((current ^ wanted) & mask);
        ral::write_reg!(endpoint_register, &epr, EPR, value);
    }

    pub(crate) fn rx_status(&self, hw: &Instances) -> Stat {
        let epr = endpoint_register::register(&hw.usb, self.index);
        Stat::from_bits(ral::read_reg!(endpoint_register, &epr, EPR, STAT_RX))
    }

    pub(crate) fn tx_status(&self, hw: &Instances) -> Stat {
        let epr = endpoint_register::register(&hw.usb, self.index);
        Stat::from_bits(ral::read_reg!(endpoint_register, &epr, EPR, STAT_TX))
    }

    pub(crate) fn set_rx_status(&self, hw: &Instances, stat: Stat) {
        self.write(&hw.usb, EPR::STAT_RX::mask, stat.rx(), 0);
    }

    pub(crate) fn set_tx_status(&self, hw: &Instances, stat: Stat) {
        self.write(&hw.usb, EPR::STAT_TX::mask, stat.tx(), 0);
    }

    /// Acknowledge completed transfers
    ///
    /// A received packet is copied into `buffer`, truncated to the receive
    /// size. Reception stays NAKed until someone re-enables it. After a
    /// transmission, the endpoint NAKs IN tokens until the next send.
    pub(crate) fn complete(&mut self, hw: &Instances, buffer: &mut [u8]) -> Completion {
        let epr = endpoint_register::register(&hw.usb, self.index);
        let status = ral::read_reg!(endpoint_register, &epr, EPR);
        let mut completion = Completion::default();

        if status & EPR::CTR_RX::mask != 0 {
            let bd = hw.pma.descriptor(self.index);
            let count = usize::from(ral::read_reg!(crate::pma, bd, COUNT_RX, COUNT))
                .min(usize::from(self.rx_size))
                .min(buffer.len());
            hw.pma.read(self.regions.rx.offset, &mut buffer[..count]);

            let token = if status & EPR::SETUP::mask != 0 {
                Token::Setup
            } else {
                Token::Out
            };
            self.write(&hw.usb, 0, 0, EPR::CTR_RX::mask);
            completion.received = Some((token, count));
        }

        if status & EPR::CTR_TX::mask != 0 {
            self.write(&hw.usb, EPR::STAT_TX::mask, Stat::Nak.tx(), EPR::CTR_TX::mask);
            completion.transmitted = true;
        }

        completion
    }

    /// Handle this endpoint's interrupt with an application handler
    pub(crate) fn correct_transfer(&mut self, hw: &Instances, handler: &mut dyn EndpointHandler) {
        let mut buffer = [0; MAX_PACKET_SIZE];
        let completion = self.complete(hw, &mut buffer);

        if let Some((token, len)) = completion.received {
            let data = &buffer[..len];
            trace!("EP{} RX {} bytes", self.index, len);
            let mut io = EndpointIo::new(self, hw);
            let rx = match token {
                Token::Setup => handler.on_setup(&mut io, data),
                Token::Out => handler.on_out(&mut io, data),
            };
            match rx {
                Rx::Ready => self.set_rx_status(hw, Stat::Valid),
                Rx::Busy => {
                    debug!("EP{} RX BUSY", self.index);
                }
            }
        }

        if completion.transmitted {
            trace!("EP{} TX COMPLETE", self.index);
            handler.on_in(&mut EndpointIo::new(self, hw));
        }
    }

    /// Queue `data` for the next IN token
    ///
    /// Returns the number of bytes queued, limited by the transmit buffer.
    pub(crate) fn send(&mut self, hw: &Instances, data: &[u8]) -> usize {
        if self.tx_size == 0 {
            warn!("EP{} has no IN direction", self.index);
            return 0;
        }
        let len = data
            .len()
            .min(usize::from(self.tx_size.min(self.regions.tx.len)));
        hw.pma.write(self.regions.tx.offset, &data[..len]);

        let bd = hw.pma.descriptor(self.index);
        ral::write_reg!(crate::pma, bd, COUNT_TX, COUNT: len as u16);
        self.set_tx_status(hw, Stat::Valid);
        len
    }

    pub(crate) fn send_zlp(&mut self, hw: &Instances) {
        self.send(hw, &[]);
    }
}

/// Disable an endpoint register that's not in the table
pub(crate) fn disable(usb: &ral::usb::RegisterBlock, index: usize) {
    let epr = endpoint_register::register(usb, index);
    let current = ral::read_reg!(endpoint_register, &epr, EPR);
    ral::write_reg!(endpoint_register, &epr, EPR, current & TOGGLES);
}

/// What to do with reception after a handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rx {
    /// Accept the next OUT packet
    Ready,
    /// NAK OUT packets until [`EndpointIo::resume_rx`]
    Busy,
}

/// Handles the transfers of one endpoint
///
/// Implement this for the application's payload layer. Handlers run in the
/// USB interrupt.
pub trait EndpointHandler: Send {
    /// An OUT packet arrived
    fn on_out(&mut self, io: &mut EndpointIo<'_>, data: &[u8]) -> Rx {
        let _ = (io, data);
        Rx::Ready
    }

    /// The last queued IN packet was sent
    fn on_in(&mut self, io: &mut EndpointIo<'_>) {
        let _ = io;
    }

    /// A SETUP packet arrived on a control endpoint
    fn on_setup(&mut self, io: &mut EndpointIo<'_>, data: &[u8]) -> Rx {
        self.on_out(io, data)
    }
}

/// Transfer access to a bound endpoint
pub struct EndpointIo<'a> {
    endpoint: &'a mut Endpoint,
    hw: &'a Instances,
}

impl<'a> EndpointIo<'a> {
    pub(crate) fn new(endpoint: &'a mut Endpoint, hw: &'a Instances) -> Self {
        EndpointIo { endpoint, hw }
    }

    /// Queue `data` for the next IN token
    ///
    /// Returns the number of bytes queued, which is limited by the transmit
    /// size. Chunking larger messages is up to the caller.
    pub fn send(&mut self, data: &[u8]) -> usize {
        self.endpoint.send(self.hw, data)
    }

    /// Queue a zero-length packet
    pub fn send_zlp(&mut self) {
        self.endpoint.send_zlp(self.hw)
    }

    /// Returns `true` if a packet is queued and not yet sent
    pub fn is_sending(&self) -> bool {
        self.endpoint.tx_status(self.hw) == Stat::Valid
    }

    /// Accept OUT packets again, after a handler returned [`Rx::Busy`]
    pub fn resume_rx(&mut self) {
        if self.endpoint.rx_size > 0 {
            self.endpoint.set_rx_status(self.hw, Stat::Valid);
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.endpoint
    }
}
