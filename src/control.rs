//! Control transfers on the default endpoint
//!
//! A control transfer spans several interrupts: the SETUP packet, any
//! number of data packets, and the status packet. The default endpoint
//! carries the transfer's state between those interrupts, and it's advanced
//! by the SETUP, OUT, and IN-complete events. Deciding what to answer is up
//! to the device (standard requests) or a [`RequestHandler`] (everything
//! else).
//!
//! Handlers reach the transfer only through [`ControlIo`]. The endpoint
//! itself stays inside the device:
//!
//! ```compile_fail
//! use usbd_pma::control::ControlEndpoint;
//! ```

use crate::{
    endpoint::{Endpoint, EndpointType},
    ral::{self, Instances},
    setup::SetupPacket,
};

/// State of the control transfer in progress
#[derive(Debug, Default)]
struct TransferState {
    setup: SetupPacket,
    /// OUT data packets received since SETUP
    out_counter: u16,
    /// IN data packets sent since SETUP
    in_counter: u16,
    /// The last IN packet was full, so there's more to send, or a ZLP
    more: bool,
    /// Address to adopt after the next IN completes
    pending_address: Option<u8>,
}

/// The default endpoint, EP0
pub(crate) struct ControlEndpoint {
    pub(crate) endpoint: Endpoint,
    state: TransferState,
}

impl ControlEndpoint {
    pub(crate) fn new(max_packet_size: u16) -> Self {
        ControlEndpoint {
            endpoint: Endpoint::new(EndpointType::Control)
                .with_rx_size(max_packet_size)
                .with_tx_size(max_packet_size),
            state: TransferState::default(),
        }
    }

    /// The SETUP packet of the current transfer
    pub(crate) fn setup(&self) -> &SetupPacket {
        &self.state.setup
    }

    /// Start a new transfer, discarding the one before it
    ///
    /// Returns `None` if `data` isn't a SETUP packet. The pending address
    /// survives; it belongs to the status stage that already finished.
    pub(crate) fn on_setup(&mut self, data: &[u8]) -> Option<SetupPacket> {
        let Some(setup) = SetupPacket::parse(data) else {
            warn!("Dropping {} byte SETUP", data.len());
            return None;
        };
        self.state.setup = setup;
        self.state.out_counter = 0;
        self.state.in_counter = 0;
        self.state.more = false;
        Some(setup)
    }

    /// Count an OUT packet, returning the new count
    pub(crate) fn on_out(&mut self) -> u16 {
        self.state.out_counter = self.state.out_counter.wrapping_add(1);
        self.state.out_counter
    }

    /// An IN packet left the peripheral
    ///
    /// Applies any pending address. If the last packet was full, returns the
    /// counter of the next IN packet to produce.
    pub(crate) fn on_in_complete(&mut self, usb: &ral::usb::RegisterBlock) -> Option<u16> {
        if let Some(address) = self.state.pending_address.take() {
            ral::write_reg!(ral::usb, usb, DADDR, EF: 1, ADD: u32::from(address));
            debug!("ADDRESS {}", address);
        }
        if self.state.more {
            self.state.more = false;
            self.state.in_counter = self.state.in_counter.wrapping_add(1);
            Some(self.state.in_counter)
        } else {
            None
        }
    }

    /// Remember the address from SET_ADDRESS
    ///
    /// It's applied once the status stage completes.
    pub(crate) fn latch_address(&mut self, address: u8) {
        debug!("LATCH ADDRESS {}", address);
        self.state.pending_address = Some(address & 0x7F);
    }

    /// Forget everything, after a bus reset
    pub(crate) fn reset(&mut self) {
        self.state = TransferState::default();
    }

    pub(crate) fn send(&mut self, hw: &Instances, data: &[u8]) -> usize {
        self.endpoint.send(hw, data)
    }

    pub(crate) fn send_zlp(&mut self, hw: &Instances) {
        self.endpoint.send_zlp(hw)
    }

    /// Send the next packet of `data`
    ///
    /// The reply is clamped to `requested` bytes. Which packet to send comes
    /// from the IN counter, so call this again for each continuation. A full
    /// packet means there's another to follow, which is a ZLP when the reply
    /// ends on a packet boundary.
    pub(crate) fn send_long(&mut self, hw: &Instances, data: &[u8], requested: u16) {
        let total = data.len().min(usize::from(requested));
        let packet = usize::from(self.endpoint.tx_size());
        let offset = (packet * usize::from(self.state.in_counter)).min(total);
        let chunk = (total - offset).min(packet);
        self.endpoint.send(hw, &data[offset..offset + chunk]);
        self.state.more = chunk == packet;
    }
}

/// Where a control transfer stands when the request handler runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The SETUP packet just arrived
    Setup,
    /// The n-th OUT data packet arrived, counting from one
    Out(u16),
    /// The previous IN packet was full; produce the n-th continuation
    In(u16),
}

impl Stage {
    /// The packet counter for the stage. Zero for SETUP.
    pub fn counter(self) -> u16 {
        match self {
            Stage::Setup => 0,
            Stage::Out(n) | Stage::In(n) => n,
        }
    }
}

/// Replies to the host on the default endpoint
pub struct ControlIo<'a> {
    control: &'a mut ControlEndpoint,
    hw: &'a Instances,
}

impl<'a> ControlIo<'a> {
    pub(crate) fn new(control: &'a mut ControlEndpoint, hw: &'a Instances) -> Self {
        ControlIo { control, hw }
    }

    /// Send one packet, returning how many bytes fit
    pub fn send(&mut self, data: &[u8]) -> usize {
        self.control.send(self.hw, data)
    }

    /// Send a reply that may span packets
    ///
    /// Pass the same `data` on every [`Stage::In`] continuation. The reply
    /// is clamped to the request's `wLength`.
    pub fn send_long(&mut self, data: &[u8]) {
        let requested = self.control.setup().length;
        self.control.send_long(self.hw, data, requested)
    }

    /// Acknowledge with a zero-length packet
    pub fn send_zlp(&mut self) {
        self.control.send_zlp(self.hw)
    }

    /// The SETUP packet of the current transfer
    pub fn setup(&self) -> &SetupPacket {
        self.control.setup()
    }

    pub fn max_packet_size(&self) -> u16 {
        self.control.endpoint.tx_size()
    }
}

/// Answers requests that the device doesn't handle itself
///
/// That's every class and vendor request, and standard requests other than
/// GET_STATUS, GET_DESCRIPTOR, SET_ADDRESS, GET_CONFIGURATION, and
/// SET_CONFIGURATION. The handler replies through `io`; for a request
/// with an OUT data stage, it should acknowledge once it has all the data.
pub trait RequestHandler: Send {
    /// `data` holds the OUT packet for [`Stage::Out`], and is empty otherwise
    fn on_request(&mut self, io: &mut ControlIo<'_>, stage: Stage, data: &[u8]);
}
