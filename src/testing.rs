//! A model of the peripheral, for host tests
//!
//! [`Hardware`] holds the register block and packet memory in ordinary
//! memory. Its methods play the part of the USB host and the serial
//! interface engine: delivering packets, completing transmissions, and
//! raising interrupts.

use crate::{
    endpoint::{EndpointHandler, Stat},
    pma,
    ral::{
        self,
        endpoint_register::{self, EPR},
        Instances,
    },
    setup::SetupPacket,
    vcell::VCell,
    Peripherals, Platform, MAX_PACKET_SIZE,
};

pub struct Hardware {
    pub usb: ral::usb::RegisterBlock,
    pub pma: pma::RegisterBlock,
}

impl Hardware {
    pub fn new() -> Self {
        // Safety: every field is a cell of plain integers.
        unsafe { core::mem::zeroed() }
    }

    pub fn instances(&self) -> Instances {
        ral::instances(self)
    }

    /// A packet arrived on endpoint `index`
    ///
    /// The peripheral NAKs further reception until the driver re-enables it.
    /// A SETUP also NAKs transmission.
    pub fn receive(&self, index: usize, data: &[u8], setup: bool) {
        let bd = self.pma.descriptor(index);
        self.pma.write(bd.ADDR_RX.read(), data);
        ral::modify_reg!(crate::pma, bd, COUNT_RX, COUNT: data.len() as u16);

        let epr = &self.usb.EPR[index];
        let mut value = (epr.read() & !EPR::STAT_RX::mask)
            | EPR::CTR_RX::mask
            | ((Stat::Nak as u32) << EPR::STAT_RX::offset);
        if setup {
            value = (value & !EPR::STAT_TX::mask)
                | EPR::SETUP::mask
                | ((Stat::Nak as u32) << EPR::STAT_TX::offset);
        } else {
            value &= !EPR::SETUP::mask;
        }
        epr.force(value);
    }

    pub fn setup(&self, index: usize, setup: &SetupPacket) {
        self.receive(index, &setup.to_bytes(), true);
    }

    /// The host took the queued IN packet
    pub fn complete_in(&self, index: usize) {
        let epr = &self.usb.EPR[index];
        let value = (epr.read() & !EPR::STAT_TX::mask)
            | EPR::CTR_TX::mask
            | ((Stat::Nak as u32) << EPR::STAT_TX::offset);
        epr.force(value);
    }

    pub fn raise_ctr(&self, index: usize) {
        self.usb
            .ISTR
            .write(ral::usb::ISTR::CTR::mask | (index as u32 & ral::usb::ISTR::EP_ID::mask));
    }

    pub fn raise_reset(&self) {
        self.usb.ISTR.write(ral::usb::ISTR::RESET::mask);
    }

    /// The packet queued for the next IN token, if any
    pub fn transmitted(&self, index: usize) -> Option<heapless::Vec<u8, MAX_PACKET_SIZE>> {
        if self.tx_status(index) != Stat::Valid {
            return None;
        }
        let bd = self.pma.descriptor(index);
        let count = usize::from(ral::read_reg!(crate::pma, bd, COUNT_TX, COUNT));
        let mut buffer = [0; MAX_PACKET_SIZE];
        let packet = buffer.get_mut(..count)?;
        self.pma.read(bd.ADDR_TX.read(), packet);
        heapless::Vec::from_slice(packet).ok()
    }

    pub fn rx_status(&self, index: usize) -> Stat {
        let epr = endpoint_register::register(&self.usb, index);
        stat(ral::read_reg!(endpoint_register, &epr, EPR, STAT_RX))
    }

    pub fn tx_status(&self, index: usize) -> Stat {
        let epr = endpoint_register::register(&self.usb, index);
        stat(ral::read_reg!(endpoint_register, &epr, EPR, STAT_TX))
    }
}

fn stat(bits: u32) -> Stat {
    match bits {
        0b00 => Stat::Disabled,
        0b01 => Stat::Stall,
        0b10 => Stat::Nak,
        _ => Stat::Valid,
    }
}

unsafe impl Peripherals for &Hardware {
    fn usb(&self) -> *const () {
        &self.usb as *const _ as _
    }
    fn packet_memory(&self) -> *const () {
        &self.pma as *const _ as _
    }
}

/// An endpoint register with the peripheral's write semantics
///
/// Status and toggle bits flip where the driver writes a one. Transfer
/// flags stay set only where the driver writes a one. `SETUP` is read-only.
#[repr(transparent)]
pub struct EprCell(VCell<u32>);

impl EprCell {
    pub fn read(&self) -> u32 {
        self.0.read()
    }

    pub fn write(&self, written: u32) {
        self.0.write(epr_write(self.0.read(), written))
    }

    /// Store `value` as-is, acting as the peripheral
    pub fn force(&self, value: u32) {
        self.0.write(value)
    }
}

fn epr_write(old: u32, written: u32) -> u32 {
    const COMPLETE: u32 = EPR::CTR_RX::mask | EPR::CTR_TX::mask;
    const TOGGLES: u32 =
        EPR::STAT_RX::mask | EPR::STAT_TX::mask | EPR::DTOG_RX::mask | EPR::DTOG_TX::mask;
    const PLAIN: u32 = EPR::EA::mask | EPR::EP_TYPE::mask | EPR::EP_KIND::mask;

    (old & written & COMPLETE)
        | ((old ^ written) & TOGGLES)
        | (old & EPR::SETUP::mask)
        | (written & PLAIN)
}

/// Ignores every transfer
pub struct Sink;

impl EndpointHandler for Sink {}

/// Records the platform hooks that the device calls
#[derive(Default)]
pub struct Board {
    pub calls: heapless::Vec<&'static str, 8>,
}

impl Board {
    fn record(&mut self, call: &'static str) {
        let _ = self.calls.push(call);
    }
}

impl Platform for Board {
    fn power_up(&mut self) {
        self.record("power_up");
    }
    fn delay_us(&mut self, _: u32) {
        self.record("delay_us");
    }
    fn enable_interrupt(&mut self) {
        self.record("enable_interrupt");
    }
    fn disable_interrupt(&mut self) {
        self.record("disable_interrupt");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn endpoint_register_writes() {
        let hw = Hardware::new();
        let epr = &hw.usb.EPR[4];
        epr.force(EPR::CTR_RX::mask | EPR::SETUP::mask | (0b10 << EPR::STAT_RX::offset));

        // Writing ones toggles, writing zero clears the transfer flag.
        epr.write(EPR::CTR_TX::mask | (0b11 << EPR::STAT_RX::offset) | 2);
        assert_eq!(
            epr.read(),
            EPR::SETUP::mask | (0b01 << EPR::STAT_RX::offset) | 2
        );

        // SETUP can't be written.
        epr.write(0);
        assert_eq!(epr.read(), EPR::SETUP::mask | (0b01 << EPR::STAT_RX::offset));
    }
}
