//! USB transport seam
//!
//! `UsbTransport` is the handful of operations a session needs from an open
//! device. `RusbTransport` implements it on top of libusb; tests use the
//! scripted transport in `mock`.

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, UsbContext};
use tracing::{debug, warn};

use super::profile::{resolve_family, DeviceIdentity};
use super::session::SessionError;

/// Transfer type of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Bulk,
    Isochronous,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub kind: EndpointKind,
    pub is_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// Endpoint bound for streaming reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamEndpoint {
    pub interface: u8,
    pub address: u8,
    pub kind: EndpointKind,
}

/// Operations on an open device
pub trait UsbTransport: Send {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, rusb::Error>;

    fn claim_interface(&mut self, interface: u8) -> Result<(), rusb::Error>;

    fn release_interface(&mut self, interface: u8) -> Result<(), rusb::Error>;

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;

    /// Blocking read from the streaming endpoint
    fn read_stream(
        &mut self,
        endpoint: &StreamEndpoint,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), rusb::Error>;
}

/// Opens devices by identity
pub trait UsbHost {
    type Transport: UsbTransport + 'static;

    fn open(&self, identity: &DeviceIdentity) -> Result<Self::Transport, SessionError>;

    /// Attached devices present in the profile table
    fn discover(&self) -> Result<Vec<DeviceIdentity>, SessionError>;
}

/// libusb result code for an error
pub fn libusb_code(err: rusb::Error) -> i32 {
    match err {
        rusb::Error::Io => -1,
        rusb::Error::InvalidParam => -2,
        rusb::Error::Access => -3,
        rusb::Error::NoDevice => -4,
        rusb::Error::NotFound => -5,
        rusb::Error::Busy => -6,
        rusb::Error::Timeout => -7,
        rusb::Error::Overflow => -8,
        rusb::Error::Pipe => -9,
        rusb::Error::Interrupted => -10,
        rusb::Error::NoMem => -11,
        rusb::Error::NotSupported => -12,
        _ => -99,
    }
}

/// Numeric code of a transfer result: byte count or negative libusb code
pub fn result_code(result: &Result<usize, rusb::Error>) -> i32 {
    match result {
        Ok(n) => *n as i32,
        Err(e) => libusb_code(*e),
    }
}

// === libusb ===

/// Host backed by a libusb context
pub struct RusbHost {
    context: Context,
}

impl RusbHost {
    pub fn new() -> Result<Self, rusb::Error> {
        Ok(Self {
            context: Context::new()?,
        })
    }

    fn identity_of(device: &Device<Context>) -> Option<DeviceIdentity> {
        let descriptor = device.device_descriptor().ok()?;
        supported_identity(descriptor.vendor_id(), descriptor.product_id(), || {
            let idx = descriptor.serial_number_string_index()?;
            let handle = device.open().ok()?;
            handle.read_string_descriptor_ascii(idx).ok()
        })
    }
}

/// Identity of a device in the profile table. The serial is only read
/// (which means opening the device) once the ids are known to match.
fn supported_identity(
    vendor_id: u16,
    product_id: u16,
    read_serial: impl FnOnce() -> Option<String>,
) -> Option<DeviceIdentity> {
    let identity = DeviceIdentity::new(vendor_id, product_id);
    resolve_family(&identity).ok()?;
    Some(match read_serial() {
        Some(serial) => identity.with_serial(serial),
        None => identity,
    })
}

impl UsbHost for RusbHost {
    type Transport = RusbTransport;

    fn open(&self, identity: &DeviceIdentity) -> Result<RusbTransport, SessionError> {
        let devices = self.context.devices()?;

        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if descriptor.vendor_id() != identity.vendor_id
                || descriptor.product_id() != identity.product_id
            {
                continue;
            }

            let handle = device.open().map_err(|e| match e {
                rusb::Error::Access => SessionError::NoPermission,
                rusb::Error::NotFound | rusb::Error::NoDevice => SessionError::NoSuchDevice,
                other => SessionError::Usb(other),
            })?;

            if let Some(wanted) = &identity.serial_number {
                let serial = descriptor
                    .serial_number_string_index()
                    .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
                if serial.as_deref() != Some(wanted.as_str()) {
                    debug!("Skipping {}: serial {:?}", identity, serial);
                    continue;
                }
            }

            debug!(
                "Opened {} at bus {} address {}",
                identity,
                device.bus_number(),
                device.address()
            );
            return Ok(RusbTransport { device, handle });
        }

        Err(SessionError::NoSuchDevice)
    }

    fn discover(&self) -> Result<Vec<DeviceIdentity>, SessionError> {
        let devices = self.context.devices()?;

        Ok(devices
            .iter()
            .filter_map(|device| Self::identity_of(&device))
            .collect())
    }
}

/// Open libusb device handle
pub struct RusbTransport {
    device: Device<Context>,
    handle: DeviceHandle<Context>,
}

impl UsbTransport for RusbTransport {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, rusb::Error> {
        let config = self.device.active_config_descriptor()?;

        let mut interfaces = Vec::new();
        for interface in config.interfaces() {
            let mut endpoints = Vec::new();
            for descriptor in interface.descriptors() {
                for endpoint in descriptor.endpoint_descriptors() {
                    let kind = match endpoint.transfer_type() {
                        rusb::TransferType::Bulk => EndpointKind::Bulk,
                        rusb::TransferType::Isochronous => EndpointKind::Isochronous,
                        _ => EndpointKind::Other,
                    };
                    endpoints.push(EndpointInfo {
                        address: endpoint.address(),
                        kind,
                        is_in: matches!(endpoint.direction(), rusb::Direction::In),
                    });
                }
            }
            interfaces.push(InterfaceInfo {
                number: interface.number(),
                endpoints,
            });
        }

        Ok(interfaces)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        match self.handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                if let Err(e) = self.handle.detach_kernel_driver(interface) {
                    warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    );
                }
            }
            Ok(false) => {}
            Err(e) => debug!(
                "Could not check kernel driver status for interface {}: {}",
                interface, e
            ),
        }

        self.handle.claim_interface(interface)
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        self.handle.release_interface(interface)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        self.handle
            .write_control(request_type, request, value, index, data, timeout)
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        self.handle
            .read_control(request_type, request, value, index, buf, timeout)
    }

    fn read_stream(
        &mut self,
        endpoint: &StreamEndpoint,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        match endpoint.kind {
            EndpointKind::Bulk => self.handle.read_bulk(endpoint.address, buf, timeout),
            // libusb only exposes isochronous transfers through the async API
            EndpointKind::Isochronous | EndpointKind::Other => Err(rusb::Error::NotSupported),
        }
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), rusb::Error> {
        self.handle.clear_halt(endpoint)
    }
}
