//! Device session: open, configure, stream control, release

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::events::EventSink;

use super::profile::{ControlTransfer, DeviceIdentity, DeviceProfile, InitStep};
use super::state::{SessionState, SharedState};
use super::usb::{libusb_code, result_code, EndpointKind, StreamEndpoint, UsbTransport};

/// Timeout for vendor control transfers
const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unsupported device {vendor_id:04x}:{product_id:04x}")]
    UnsupportedDevice { vendor_id: u16, product_id: u16 },

    #[error("permission denied for USB device")]
    NoPermission,

    #[error("device not found")]
    NoSuchDevice,

    #[error("failed to claim interface {interface} (code {code})")]
    ClaimFailed { interface: u8, code: i32 },

    #[error("no bulk or isochronous IN endpoint")]
    NoEndpoint,

    #[error("control transfer failed during {step} (code {code})")]
    ControlTransferFailed { step: &'static str, code: i32 },

    #[error("operation not valid in state {0:?}")]
    InvalidState(SessionState),

    #[error("session is faulted; select the device again")]
    Faulted,

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

/// Tuning applied during configure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub frequency_hz: u32,
    pub sample_rate_hz: u32,
}

/// Exclusive handle on an opened, claimed device
pub struct DeviceSession<T: UsbTransport> {
    transport: T,
    identity: DeviceIdentity,
    profile: &'static DeviceProfile,
    endpoint: StreamEndpoint,
    state: Arc<SharedState>,
    events: EventSink,
    released: bool,
}

impl<T: UsbTransport> DeviceSession<T> {
    /// Resolve the streaming endpoint and claim its interface
    pub fn open(
        mut transport: T,
        identity: DeviceIdentity,
        profile: &'static DeviceProfile,
        events: EventSink,
    ) -> Result<Self, SessionError> {
        let mut interfaces = transport.interfaces()?;
        interfaces.sort_by_key(|i| i.number);

        let has_in = |kind: EndpointKind| {
            interfaces
                .iter()
                .any(|i| i.endpoints.iter().any(|e| e.is_in && e.kind == kind))
        };
        let kind = if has_in(EndpointKind::Bulk) {
            EndpointKind::Bulk
        } else if has_in(EndpointKind::Isochronous) {
            events.warning("No bulk IN endpoint, falling back to isochronous");
            EndpointKind::Isochronous
        } else {
            events.error(format!("{}: no usable IN endpoint", identity));
            return Err(SessionError::NoEndpoint);
        };

        let mut last_failure = None;
        for interface in &interfaces {
            let endpoint = match interface
                .endpoints
                .iter()
                .find(|e| e.is_in && e.kind == kind)
            {
                Some(e) => e,
                None => continue,
            };

            match transport.claim_interface(interface.number) {
                Ok(()) => {
                    events.info(format!(
                        "Claimed interface {} endpoint 0x{:02x} ({:?}), result 0",
                        interface.number, endpoint.address, kind
                    ));
                    let endpoint = StreamEndpoint {
                        interface: interface.number,
                        address: endpoint.address,
                        kind,
                    };
                    return Ok(Self {
                        transport,
                        identity,
                        profile,
                        endpoint,
                        state: Arc::new(SharedState::new(SessionState::Opened)),
                        events,
                        released: false,
                    });
                }
                Err(e) => {
                    let code = libusb_code(e);
                    events.warning(format!(
                        "Claim of interface {} failed: {} (code {})",
                        interface.number, e, code
                    ));
                    last_failure = Some(SessionError::ClaimFailed {
                        interface: interface.number,
                        code,
                    });
                }
            }
        }

        Err(last_failure.unwrap_or(SessionError::NoEndpoint))
    }

    /// Run the family init sequence.
    ///
    /// Every step runs even if an earlier one failed. The first failed step is
    /// returned as an error after the sequence completes; the session is
    /// configured either way.
    pub fn configure(&mut self, tuning: &Tuning) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Opened | SessionState::Configured => {}
            other => return Err(SessionError::InvalidState(other)),
        }

        let profile = self.profile;
        let mut first_failure = None;
        for step in profile.init_sequence {
            let label = step.label();
            let transfers = match step {
                InitStep::Control { transfer, .. } => vec![transfer.clone()],
                InitStep::Query { transfer, .. } => {
                    let result = self.control(transfer);
                    match &result {
                        Ok(_) => self.events.debug(format!(
                            "{}: result {}",
                            label,
                            result_code(&result)
                        )),
                        Err(e) => self.events.debug(format!(
                            "{}: not answered ({}), code {}",
                            label,
                            e,
                            result_code(&result)
                        )),
                    }
                    continue;
                }
                InitStep::SetFrequency => (profile.frequency_setter)(tuning.frequency_hz),
                InitStep::SetSampleRate => (profile.sample_rate_setter)(tuning.sample_rate_hz),
                InitStep::ResetEndpoint => {
                    let code = match self.reset_endpoint() {
                        Ok(()) => 0,
                        Err(e) => libusb_code(e),
                    };
                    self.report_step(label, code, &mut first_failure);
                    continue;
                }
            };

            let mut code = 0;
            for transfer in &transfers {
                let result = self.control(transfer);
                code = result_code(&result);
                if result.is_err() {
                    break;
                }
            }
            self.report_step(label, code, &mut first_failure);
        }

        self.state.set(SessionState::Configured);
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn report_step(
        &self,
        label: &'static str,
        code: i32,
        first_failure: &mut Option<SessionError>,
    ) {
        if code < 0 {
            self.events
                .warning(format!("{} ({}): failed, result {}", label, self.profile.family, code));
            first_failure.get_or_insert(SessionError::ControlTransferFailed { step: label, code });
        } else {
            self.events
                .info(format!("{} ({}): result {}", label, self.profile.family, code));
        }
    }

    /// Issue one vendor control transfer
    fn control(&mut self, transfer: &ControlTransfer) -> Result<usize, rusb::Error> {
        if transfer.is_in() {
            let mut buf = vec![0u8; transfer.length as usize];
            self.transport.read_control(
                transfer.request_type,
                transfer.request,
                transfer.value,
                transfer.index,
                &mut buf,
                CONTROL_TIMEOUT,
            )
        } else {
            self.transport.write_control(
                transfer.request_type,
                transfer.request,
                transfer.value,
                transfer.index,
                &transfer.data,
                CONTROL_TIMEOUT,
            )
        }
    }

    /// Put the device into streaming mode
    pub fn send_start(&mut self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Faulted => return Err(SessionError::Faulted),
            SessionState::Configured | SessionState::Stopped => {}
            other => return Err(SessionError::InvalidState(other)),
        }

        if let Some(command) = &self.profile().start_command {
            let result = self.control(command);
            self.events
                .info(format!("Start streaming: result {}", result_code(&result)));
            if let Err(e) = result {
                return Err(SessionError::ControlTransferFailed {
                    step: "start streaming",
                    code: libusb_code(e),
                });
            }
        }

        self.state.set(SessionState::Streaming);
        Ok(())
    }

    /// Issue the family stop command, if any
    pub fn send_stop(&mut self) {
        if let Some(command) = &self.profile().stop_command {
            let result = self.control(command);
            self.events
                .info(format!("Stop streaming: result {}", result_code(&result)));
        }
        if self.state() != SessionState::Faulted {
            self.state.set(SessionState::Stopped);
        }
    }

    /// Flush the streaming endpoint: vendor reset transfers, then clear-halt
    pub fn reset_endpoint(&mut self) -> Result<(), rusb::Error> {
        for transfer in self.profile().endpoint_reset {
            self.control(transfer)?;
        }
        self.transport.clear_halt(self.endpoint.address)
    }

    /// One bounded-timeout read from the streaming endpoint
    pub fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, rusb::Error> {
        let endpoint = self.endpoint;
        self.transport.read_stream(&endpoint, buf, timeout)
    }

    pub fn mark_faulted(&self) {
        self.state.set(SessionState::Faulted);
    }

    /// Release the claimed interface; safe to call more than once
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match self.transport.release_interface(self.endpoint.interface) {
            Ok(()) => debug!("Released interface {}", self.endpoint.interface),
            Err(e) => self.events.debug(format!(
                "Release of interface {} failed: {}",
                self.endpoint.interface, e
            )),
        }
        if self.state() != SessionState::Faulted {
            self.state.set(SessionState::Idle);
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// State cell readable while another thread owns the session
    pub fn shared_state(&self) -> Arc<SharedState> {
        self.state.clone()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn profile(&self) -> &'static DeviceProfile {
        self.profile
    }

    pub fn endpoint(&self) -> StreamEndpoint {
        self.endpoint
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }
}

impl<T: UsbTransport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        self.release();
    }
}
