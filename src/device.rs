//! The USB device
//!
//! [`Device`] borrows the configurations, and owns the endpoint table and
//! the default endpoint. It answers the standard requests itself, including
//! descriptor requests, and routes every other transfer to the handlers
//! supplied with the interfaces and the [`DeviceBuilder`].
//!
//! The endpoint table always starts with the default endpoint. When the
//! host selects a configuration, the configuration's endpoints follow in
//! interface order, and packet memory is laid out again for the new table.

use crate::{
    configuration::{decode_interface_string, Configuration},
    control::{ControlEndpoint, ControlIo, RequestHandler, Stage},
    descriptor::{DescriptorWriter, MAX_DESCRIPTOR_SIZE},
    endpoint::{self, Endpoint, EndpointIo, Stat, Token},
    interface::Binding,
    pma::{self, Regions},
    ral::{self, Instances},
    setup::SetupPacket,
    Peripherals, Platform, MAX_CONFIGURATIONS, MAX_ENDPOINTS, MAX_PACKET_SIZE,
};
use usb_device::{
    control::{Request, RequestType},
    descriptor::descriptor_type,
    device::UsbVidPid,
    UsbDirection, UsbError,
};

const MANUFACTURER_STRING: u8 = 1;
const PRODUCT_STRING: u8 = 2;
const SERIAL_NUMBER_STRING: u8 = 3;

/// US English
const LANGUAGE_ID: [u8; 2] = [0x09, 0x04];

/// USB 1.10
const BCD_USB: u16 = 0x0110;

struct Identity<'a> {
    vid_pid: UsbVidPid,
    release: u16,
    manufacturer: Option<&'a str>,
    product: Option<&'a str>,
    serial_number: Option<&'a str>,
}

/// Assembles a [`Device`]
///
/// Structural problems, like too many endpoints or buffers that don't fit
/// into packet memory, are reported here instead of at run time.
pub struct DeviceBuilder<'a> {
    identity: Identity<'a>,
    max_packet_size_0: u16,
    configurations: &'a mut [Configuration<'a>],
    requests: Option<&'a mut dyn RequestHandler>,
}

impl<'a> DeviceBuilder<'a> {
    pub fn new(vid_pid: UsbVidPid) -> Self {
        DeviceBuilder {
            identity: Identity {
                vid_pid,
                release: 0x0100,
                manufacturer: None,
                product: None,
                serial_number: None,
            },
            max_packet_size_0: MAX_PACKET_SIZE as u16,
            configurations: &mut [],
            requests: None,
        }
    }

    pub fn manufacturer(mut self, manufacturer: &'a str) -> Self {
        self.identity.manufacturer = Some(manufacturer);
        self
    }

    pub fn product(mut self, product: &'a str) -> Self {
        self.identity.product = Some(product);
        self
    }

    /// Usually comes from the MCU's unique ID
    pub fn serial_number(mut self, serial_number: &'a str) -> Self {
        self.identity.serial_number = Some(serial_number);
        self
    }

    /// `bcdDevice`
    pub fn device_release(mut self, release: u16) -> Self {
        self.identity.release = release;
        self
    }

    /// Packet size of the default endpoint: 8, 16, 32, or 64
    pub fn max_packet_size_0(mut self, size: u8) -> Result<Self, UsbError> {
        match size {
            8 | 16 | 32 | 64 => {
                self.max_packet_size_0 = size.into();
                Ok(self)
            }
            _ => Err(UsbError::InvalidEndpoint),
        }
    }

    /// Handle class, vendor, and unsupported standard requests
    pub fn request_handler(mut self, requests: &'a mut dyn RequestHandler) -> Self {
        self.requests = Some(requests);
        self
    }

    /// The configurations the host can choose from, in order
    ///
    /// The device borrows them. Fails if there are more than eight, or if a
    /// configuration descriptor won't fit into the descriptor buffer.
    pub fn configurations(
        mut self,
        configurations: &'a mut [Configuration<'a>],
    ) -> Result<Self, UsbError> {
        if configurations.len() > MAX_CONFIGURATIONS {
            return Err(UsbError::EndpointOverflow);
        }
        if configurations
            .iter()
            .any(|configuration| configuration.descriptor_size() > MAX_DESCRIPTOR_SIZE)
        {
            return Err(UsbError::BufferOverflow);
        }
        self.configurations = configurations;
        Ok(self)
    }

    /// Create the device
    ///
    /// Fails if a configuration's buffers don't fit into packet memory next
    /// to the default endpoint. Nothing touches the hardware until
    /// [`init`](Device::init).
    pub fn build<P: Peripherals>(self, peripherals: P) -> Result<Device<'a>, UsbError> {
        let control = ControlEndpoint::new(self.max_packet_size_0);
        for configuration in self.configurations.iter() {
            let mut sizes: heapless::Vec<(u16, u16), MAX_ENDPOINTS> = heapless::Vec::new();
            let endpoints = core::iter::once(&control.endpoint).chain(
                configuration
                    .interfaces()
                    .iter()
                    .flat_map(|interface| interface.bindings())
                    .map(|binding| &binding.endpoint),
            );
            for ep in endpoints {
                sizes
                    .push((ep.tx_size(), ep.rx_size()))
                    .map_err(|_| UsbError::EndpointOverflow)?;
            }
            pma::layout(&sizes)?;
        }

        Ok(Device {
            hw: ral::instances(peripherals),
            control,
            configurations: self.configurations,
            table: heapless::Vec::new(),
            configuration: 0,
            identity: self.identity,
            requests: self.requests,
        })
    }
}

/// An entry in the endpoint table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Control,
    /// Endpoint of an interface in the active configuration
    Interface { interface: usize, endpoint: usize },
}

/// A USB device
///
/// The configuration tree stays with the caller. The device keeps the
/// endpoint table, and the state of the default endpoint.
pub struct Device<'a> {
    hw: Instances,
    control: ControlEndpoint,
    configurations: &'a mut [Configuration<'a>],
    table: heapless::Vec<Slot, MAX_ENDPOINTS>,
    /// Zero when unconfigured, otherwise `bConfigurationValue`
    configuration: u8,
    identity: Identity<'a>,
    requests: Option<&'a mut dyn RequestHandler>,
}

/// Find the endpoint and handler behind an interface slot
fn binding<'c, 'a>(
    configurations: &'c mut [Configuration<'a>],
    configuration: u8,
    interface: usize,
    endpoint: usize,
) -> Option<&'c mut Binding<'a>> {
    let index = usize::from(configuration).checked_sub(1)?;
    configurations
        .get_mut(index)?
        .interfaces_mut()
        .get_mut(interface)?
        .binding_mut(endpoint)
}

impl<'a> Device<'a> {
    /// Bring up the peripheral, and connect to the bus
    ///
    /// Afterwards, call [`handle_irq`](Device::handle_irq) from the USB
    /// interrupt.
    pub fn init<P: Platform>(&mut self, platform: &mut P) {
        platform.power_up();
        ral::modify_reg!(ral::usb, &self.hw.usb, BCDR, DPPU: 0);

        ral::modify_reg!(ral::usb, &self.hw.usb, CNTR, PDWN: 0);
        // Analog startup time
        platform.delay_us(1);

        ral::write_reg!(ral::usb, &self.hw.usb, BTABLE, 0);
        self.control.reset();
        self.configuration = 0;
        self.activate();

        ral::write_reg!(ral::usb, &self.hw.usb, ISTR, 0);
        // Also releases the reset, FRES.
        ral::write_reg!(ral::usb, &self.hw.usb, CNTR, CTRM: 1, RESETM: 1);
        platform.enable_interrupt();

        ral::modify_reg!(ral::usb, &self.hw.usb, BCDR, DPPU: 1);
        debug!("INITIALIZED");
    }

    /// Disconnect from the bus, and power down the peripheral
    pub fn detach<P: Platform>(&mut self, platform: &mut P) {
        ral::modify_reg!(ral::usb, &self.hw.usb, BCDR, DPPU: 0);
        platform.disable_interrupt();
        ral::write_reg!(ral::usb, &self.hw.usb, CNTR, FRES: 1, PDWN: 1);
        self.control.reset();
        self.configuration = 0;
        self.table.clear();
        debug!("DETACHED");
    }

    /// The active configuration value, or zero when unconfigured
    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    /// Access an endpoint of the active configuration
    ///
    /// `index` is the endpoint's place in the table, which is also its
    /// endpoint number. Returns `None` for the default endpoint, and for
    /// endpoints that aren't active.
    pub fn endpoint(&mut self, index: usize) -> Option<EndpointIo<'_>> {
        match *self.table.get(index)? {
            Slot::Control => None,
            Slot::Interface {
                interface,
                endpoint,
            } => {
                let binding =
                    binding(self.configurations, self.configuration, interface, endpoint)?;
                Some(EndpointIo::new(&mut binding.endpoint, &self.hw))
            }
        }
    }

    /// Switch configurations
    ///
    /// Zero returns to the unconfigured state. Returns `false`, and keeps the
    /// current configuration, if there's no configuration `value`.
    pub fn set_configuration(&mut self, value: u8) -> bool {
        if usize::from(value) > self.configurations.len() {
            warn!("No configuration {}", value);
            return false;
        }
        debug!("CONFIGURATION {}", value);
        self.configuration = value;
        self.activate();
        true
    }

    /// Rebuild the endpoint table for the current configuration, then bind
    /// every endpoint to its registers and packet memory
    fn activate(&mut self) {
        self.table.clear();
        // Table has room for the default endpoint.
        let _ = self.table.push(Slot::Control);
        let active = usize::from(self.configuration)
            .checked_sub(1)
            .and_then(|index| self.configurations.get(index));
        if let Some(configuration) = active {
            'interfaces: for (interface, iface) in configuration.interfaces().iter().enumerate() {
                for endpoint in 0..iface.num_endpoints() {
                    if self
                        .table
                        .push(Slot::Interface {
                            interface,
                            endpoint,
                        })
                        .is_err()
                    {
                        warn!("Endpoint table full");
                        break 'interfaces;
                    }
                }
            }
        }

        let regions = match self.layout() {
            Ok(regions) => regions,
            Err(_err) => {
                warn!("Packet memory layout failed: {:?}", _err);
                self.configuration = 0;
                self.table.truncate(1);
                self.layout().unwrap_or_default()
            }
        };

        for (index, (slot, regions)) in self.table.iter().zip(regions).enumerate() {
            match *slot {
                Slot::Control => self.control.endpoint.bind(&self.hw, index, regions),
                Slot::Interface {
                    interface,
                    endpoint,
                } => {
                    if let Some(binding) =
                        binding(self.configurations, self.configuration, interface, endpoint)
                    {
                        binding.endpoint.bind(&self.hw, index, regions);
                    }
                }
            }
        }
        for index in self.table.len()..MAX_ENDPOINTS {
            endpoint::disable(&self.hw.usb, index);
        }
    }

    fn slot_endpoint(&self, slot: Slot) -> Option<&Endpoint> {
        match slot {
            Slot::Control => Some(&self.control.endpoint),
            Slot::Interface {
                interface,
                endpoint,
            } => {
                let index = usize::from(self.configuration).checked_sub(1)?;
                self.configurations
                    .get(index)?
                    .interfaces()
                    .get(interface)?
                    .bindings()
                    .get(endpoint)
                    .map(|binding| &binding.endpoint)
            }
        }
    }

    fn layout(&self) -> Result<heapless::Vec<Regions, MAX_ENDPOINTS>, UsbError> {
        let mut sizes: heapless::Vec<(u16, u16), MAX_ENDPOINTS> = heapless::Vec::new();
        for &slot in &self.table {
            let ep = self.slot_endpoint(slot).ok_or(UsbError::InvalidEndpoint)?;
            sizes
                .push((ep.tx_size(), ep.rx_size()))
                .map_err(|_| UsbError::EndpointOverflow)?;
        }
        pma::layout(&sizes)
    }

    /// Handle the USB interrupt
    pub fn handle_irq(&mut self) {
        let istr = ral::read_reg!(ral::usb, &self.hw.usb, ISTR);

        if istr & ral::usb::ISTR::RESET::mask != 0 {
            let clear = !ral::usb::ISTR::RESET::mask & 0xFFFF;
            ral::write_reg!(ral::usb, &self.hw.usb, ISTR, clear);
            ral::write_reg!(ral::usb, &self.hw.usb, DADDR, EF: 1, ADD: 0);
            debug!("RESET");
            self.control.reset();
            self.configuration = 0;
            self.activate();
        }

        if istr & ral::usb::ISTR::CTR::mask != 0 {
            let index = ((istr & ral::usb::ISTR::EP_ID::mask) >> ral::usb::ISTR::EP_ID::offset) as usize;
            self.correct_transfer(index);
        }
    }

    fn correct_transfer(&mut self, index: usize) {
        match self.table.get(index).copied() {
            Some(Slot::Control) => self.correct_transfer_control(),
            Some(Slot::Interface {
                interface,
                endpoint,
            }) => {
                if let Some(binding) =
                    binding(self.configurations, self.configuration, interface, endpoint)
                {
                    binding.endpoint.correct_transfer(&self.hw, &mut *binding.handler);
                }
            }
            None => {
                warn!("Transfer on EP{}, which isn't in the table", index);
            }
        }
    }

    fn correct_transfer_control(&mut self) {
        let mut buffer = [0; MAX_PACKET_SIZE];
        let completion = self.control.endpoint.complete(&self.hw, &mut buffer);
        let next_setup = matches!(completion.received, Some((Token::Setup, _)));

        // The IN completion comes first. It may carry the status stage of a
        // SET_ADDRESS, and the SETUP that follows starts a new transfer.
        if completion.transmitted {
            if let Some(counter) = self.control.on_in_complete(&self.hw.usb) {
                if !next_setup {
                    self.dispatch(Stage::In(counter), &[]);
                }
            }
        }

        if let Some((token, len)) = completion.received {
            match token {
                Token::Setup => {
                    if let Some(_setup) = self.control.on_setup(&buffer[..len]) {
                        trace!("SETUP {:?}", _setup);
                        self.dispatch(Stage::Setup, &[]);
                    }
                }
                Token::Out => {
                    let counter = self.control.on_out();
                    self.dispatch(Stage::Out(counter), &buffer[..len]);
                }
            }
            self.control.endpoint.set_rx_status(&self.hw, Stat::Valid);
        }
    }

    /// Route one stage of a control transfer
    fn dispatch(&mut self, stage: Stage, data: &[u8]) {
        let setup = *self.control.setup();

        if setup.request_type() == RequestType::Standard && is_standard(setup.request) {
            match stage {
                Stage::Setup | Stage::In(_) => self.standard_request(&setup),
                // Status stage
                Stage::Out(_) => {}
            }
        } else if setup.direction() == UsbDirection::In && matches!(stage, Stage::Out(_)) {
            // Status stage of a control read
        } else if let Some(requests) = self.requests.as_deref_mut() {
            let mut io = ControlIo::new(&mut self.control, &self.hw);
            requests.on_request(&mut io, stage, data);
        } else if !matches!(stage, Stage::In(_)) {
            debug!("Unhandled request {:#x}", setup.request);
            self.control.send_zlp(&self.hw);
        }
    }

    fn standard_request(&mut self, setup: &SetupPacket) {
        match setup.request {
            Request::GET_STATUS => {
                self.control.send_long(&self.hw, &[0, 0], setup.length);
            }
            Request::GET_DESCRIPTOR => self.send_descriptor(setup),
            Request::SET_ADDRESS => {
                self.control.latch_address(setup.value as u8);
                self.control.send_zlp(&self.hw);
            }
            Request::GET_CONFIGURATION => {
                let configuration = self.configuration;
                self.control
                    .send_long(&self.hw, &[configuration], setup.length);
            }
            Request::SET_CONFIGURATION => {
                self.set_configuration(setup.value as u8);
                self.control.send_zlp(&self.hw);
            }
            _ => self.control.send_zlp(&self.hw),
        }
    }

    fn send_descriptor(&mut self, setup: &SetupPacket) {
        let mut buffer = [0; MAX_DESCRIPTOR_SIZE];
        let mut writer = DescriptorWriter::new(&mut buffer);
        let (kind, index) = setup.descriptor_type_index();
        let result = match kind {
            descriptor_type::DEVICE => self.device_descriptor(&mut writer),
            descriptor_type::CONFIGURATION => self.configuration_descriptor(&mut writer, index),
            descriptor_type::STRING => self.string_descriptor(&mut writer, index),
            _ => Err(UsbError::Unsupported),
        };
        match result {
            Ok(()) => self
                .control
                .send_long(&self.hw, writer.written(), setup.length),
            Err(_err) => {
                debug!("GET_DESCRIPTOR {} {}: {:?}", kind, index, _err);
                self.control.send_zlp(&self.hw);
            }
        }
    }

    pub(crate) fn device_descriptor(&self, writer: &mut DescriptorWriter) -> Result<(), UsbError> {
        let string = |string: Option<&str>, index| if string.is_some() { index } else { 0 };
        let [bcd_lo, bcd_hi] = BCD_USB.to_le_bytes();
        let [vid_lo, vid_hi] = self.identity.vid_pid.0.to_le_bytes();
        let [pid_lo, pid_hi] = self.identity.vid_pid.1.to_le_bytes();
        let [release_lo, release_hi] = self.identity.release.to_le_bytes();
        writer.write(
            descriptor_type::DEVICE,
            &[
                bcd_lo,
                bcd_hi,
                0, // class
                0, // subclass
                0, // protocol
                self.control.endpoint.tx_size() as u8,
                vid_lo,
                vid_hi,
                pid_lo,
                pid_hi,
                release_lo,
                release_hi,
                string(self.identity.manufacturer, MANUFACTURER_STRING),
                string(self.identity.product, PRODUCT_STRING),
                string(self.identity.serial_number, SERIAL_NUMBER_STRING),
                self.configurations.len() as u8,
            ],
        )
    }

    pub(crate) fn configuration_descriptor(
        &self,
        writer: &mut DescriptorWriter,
        index: u8,
    ) -> Result<(), UsbError> {
        self.configurations
            .get(usize::from(index))
            .ok_or(UsbError::Unsupported)?
            .write_descriptor(writer, index)
    }

    pub(crate) fn string_descriptor(
        &self,
        writer: &mut DescriptorWriter,
        index: u8,
    ) -> Result<(), UsbError> {
        let string = match index {
            0 => return writer.write(descriptor_type::STRING, &LANGUAGE_ID),
            MANUFACTURER_STRING => self.identity.manufacturer,
            PRODUCT_STRING => self.identity.product,
            SERIAL_NUMBER_STRING => self.identity.serial_number,
            _ => decode_interface_string(index).and_then(|(configuration, interface)| {
                self.configurations
                    .get(configuration)?
                    .interfaces()
                    .get(interface)?
                    .description_string()
            }),
        };
        writer.string(string.ok_or(UsbError::Unsupported)?)
    }
}

fn is_standard(request: u8) -> bool {
    matches!(
        request,
        Request::GET_STATUS
            | Request::GET_DESCRIPTOR
            | Request::SET_ADDRESS
            | Request::GET_CONFIGURATION
            | Request::SET_CONFIGURATION
    )
}
