//! Supported receivers and their USB command sets
//!
//! Each family gets one static profile. Vendor requests follow the vendors'
//! host libraries (librtlsdr, libhackrf, libairspy). Tuner programming beyond
//! frequency/sample-rate selection is not attempted.

use std::borrow::Cow;
use std::fmt;

use crate::sdr::SampleFormat;

use super::session::SessionError;

/// Vendor OUT: host to device, vendor request, device recipient
pub const VENDOR_OUT: u8 = 0x40;
/// Vendor IN: device to host, vendor request, device recipient
pub const VENDOR_IN: u8 = 0xC0;

/// USB identity of an attached device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            serial_number: None,
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)?;
        if let Some(serial) = &self.serial_number {
            write!(f, " SN {}", serial)?;
        }
        Ok(())
    }
}

/// Receiver family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    Rtl2832,
    Airspy,
    HackRf,
    Unknown,
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceFamily::Rtl2832 => "RTL2832U",
            DeviceFamily::Airspy => "Airspy",
            DeviceFamily::HackRf => "HackRF",
            DeviceFamily::Unknown => "generic",
        };
        f.write_str(name)
    }
}

/// One vendor control transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTransfer {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Payload for OUT transfers
    pub data: Cow<'static, [u8]>,
    /// Bytes to read for IN transfers
    pub length: u16,
}

impl ControlTransfer {
    pub const fn out(request: u8, value: u16, index: u16, data: &'static [u8]) -> Self {
        Self {
            request_type: VENDOR_OUT,
            request,
            value,
            index,
            data: Cow::Borrowed(data),
            length: 0,
        }
    }

    pub const fn read(request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type: VENDOR_IN,
            request,
            value,
            index,
            data: Cow::Borrowed(&[]),
            length,
        }
    }

    pub fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

/// Steps of the configure sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitStep {
    /// A fixed transfer whose failure is reported and skipped
    Control {
        label: &'static str,
        transfer: ControlTransfer,
    },
    /// Best-effort read whose result is only logged
    Query {
        label: &'static str,
        transfer: ControlTransfer,
    },
    SetFrequency,
    SetSampleRate,
    ResetEndpoint,
}

impl InitStep {
    pub fn label(&self) -> &'static str {
        match self {
            InitStep::Control { label, .. } | InitStep::Query { label, .. } => label,
            InitStep::SetFrequency => "frequency set",
            InitStep::SetSampleRate => "sample rate set",
            InitStep::ResetEndpoint => "bulk endpoint reset",
        }
    }
}

/// Command set for one family
#[derive(Debug)]
pub struct DeviceProfile {
    pub family: DeviceFamily,
    pub sample_format: SampleFormat,
    pub init_sequence: &'static [InitStep],
    pub start_command: Option<ControlTransfer>,
    pub stop_command: Option<ControlTransfer>,
    /// Vendor transfers that flush the streaming endpoint, run before clear-halt
    pub endpoint_reset: &'static [ControlTransfer],
    pub frequency_setter: fn(u32) -> Vec<ControlTransfer>,
    pub sample_rate_setter: fn(u32) -> Vec<ControlTransfer>,
}

/// Known (vendor, product) pairs
const DEVICE_TABLE: &[(u16, u16, DeviceFamily, &str)] = &[
    (0x0bda, 0x2832, DeviceFamily::Rtl2832, "RTL2832U DVB-T"),
    (0x0bda, 0x2834, DeviceFamily::Rtl2832, "RTL2834 DVB-T"),
    (0x0bda, 0x2837, DeviceFamily::Rtl2832, "RTL2837 DVB-T"),
    (0x0bda, 0x2838, DeviceFamily::Rtl2832, "RTL2838 DVB-T"),
    (0x1d50, 0x604b, DeviceFamily::HackRf, "HackRF Jawbreaker"),
    (0x1d50, 0x6089, DeviceFamily::HackRf, "HackRF One"),
    (0x1d50, 0x60a1, DeviceFamily::Airspy, "Airspy Mini"),
    (0x03eb, 0x800c, DeviceFamily::Airspy, "Airspy R2"),
    (0x03eb, 0x800d, DeviceFamily::Unknown, "Airspy HF+"),
];

/// Resolve the family of an identity by exact (vendor, product) match
pub fn resolve_family(identity: &DeviceIdentity) -> Result<DeviceFamily, SessionError> {
    DEVICE_TABLE
        .iter()
        .find(|(vid, pid, _, _)| *vid == identity.vendor_id && *pid == identity.product_id)
        .map(|(_, _, family, _)| *family)
        .ok_or(SessionError::UnsupportedDevice {
            vendor_id: identity.vendor_id,
            product_id: identity.product_id,
        })
}

/// Product name from the table
pub fn device_name(identity: &DeviceIdentity) -> Option<&'static str> {
    DEVICE_TABLE
        .iter()
        .find(|(vid, pid, _, _)| *vid == identity.vendor_id && *pid == identity.product_id)
        .map(|(_, _, _, name)| *name)
}

/// Look up the shared profile for an identity
pub fn lookup(identity: &DeviceIdentity) -> Result<&'static DeviceProfile, SessionError> {
    resolve_family(identity).map(profile_for)
}

pub fn profile_for(family: DeviceFamily) -> &'static DeviceProfile {
    match family {
        DeviceFamily::Rtl2832 => &RTL2832,
        DeviceFamily::Airspy => &AIRSPY,
        DeviceFamily::HackRf => &HACKRF,
        DeviceFamily::Unknown => &GENERIC,
    }
}

// === RTL2832U ===
// Register writes: request 0, value = register address, index = (block << 8) | 0x10.
// Blocks: 1 = USB, 2 = SYS, 0 = demod page 0 (demod writes use index page | 0x10).

const RTL_USB_BLOCK_WRITE: u16 = (1 << 8) | 0x10;
const RTL_SYS_BLOCK_WRITE: u16 = (2 << 8) | 0x10;
const RTL_SYS_BLOCK_READ: u16 = 2 << 8;
const RTL_DEMOD_PAGE1_WRITE: u16 = 0x10 | 1;
const RTL_USB_EPA_CTL: u16 = 0x2148;
const RTL_USB_SYSCTL: u16 = 0x2000;
const RTL_SYS_DEMOD_CTL: u16 = 0x3000;
const RTL_SYS_GPI: u16 = 0x3004;
/// Crystal frequency used for the resampler ratio
const RTL_XTAL_HZ: u64 = 28_800_000;

static RTL2832_INIT: [InitStep; 8] = [
    InitStep::Control {
        label: "device reset",
        transfer: ControlTransfer::out(0, RTL_USB_SYSCTL, RTL_USB_BLOCK_WRITE, &[0x09]),
    },
    InitStep::Query {
        label: "tuner query",
        transfer: ControlTransfer::read(0, RTL_SYS_GPI, RTL_SYS_BLOCK_READ, 1),
    },
    InitStep::Control {
        label: "tuner enable",
        transfer: ControlTransfer::out(0, RTL_SYS_DEMOD_CTL, RTL_SYS_BLOCK_WRITE, &[0xe8]),
    },
    InitStep::Control {
        label: "demod soft reset",
        transfer: ControlTransfer::out(0, 0x01 << 8 | 0x20, RTL_DEMOD_PAGE1_WRITE, &[0x14]),
    },
    InitStep::Control {
        label: "AGC enable",
        transfer: ControlTransfer::out(0, 0x19 << 8 | 0x20, RTL_DEMOD_PAGE1_WRITE, &[0x25]),
    },
    InitStep::SetFrequency,
    InitStep::SetSampleRate,
    InitStep::ResetEndpoint,
];

static RTL_EPA_RESET: [ControlTransfer; 2] = [
    ControlTransfer::out(0, RTL_USB_EPA_CTL, RTL_USB_BLOCK_WRITE, &[0x10, 0x02]),
    ControlTransfer::out(0, RTL_USB_EPA_CTL, RTL_USB_BLOCK_WRITE, &[0x00, 0x00]),
];

fn rtl_frequency(hz: u32) -> Vec<ControlTransfer> {
    // IF frequency register pair on demod page 1, 22-bit two's complement of the offset
    let if_word = ((-(hz as i64) * (1 << 22)) / RTL_XTAL_HZ as i64) as u32 & 0x3F_FFFF;
    let bytes = if_word.to_be_bytes();
    vec![
        demod_write(0x19, &[bytes[1] & 0x3F]),
        demod_write(0x1a, &[bytes[2]]),
        demod_write(0x1b, &[bytes[3]]),
    ]
}

fn rtl_sample_rate(hz: u32) -> Vec<ControlTransfer> {
    let ratio = ((RTL_XTAL_HZ << 22) / hz.max(1) as u64) as u32 & 0x0FFF_FFFC;
    let bytes = ratio.to_be_bytes();
    vec![
        demod_write(0x9f, &[bytes[0], bytes[1]]),
        demod_write(0xa1, &[bytes[2], bytes[3]]),
    ]
}

fn demod_write(register: u16, data: &[u8]) -> ControlTransfer {
    ControlTransfer {
        request_type: VENDOR_OUT,
        request: 0,
        value: (register << 8) | 0x20,
        index: RTL_DEMOD_PAGE1_WRITE,
        data: Cow::Owned(data.to_vec()),
        length: 0,
    }
}

static RTL2832: DeviceProfile = DeviceProfile {
    family: DeviceFamily::Rtl2832,
    sample_format: SampleFormat::U8Offset,
    init_sequence: &RTL2832_INIT,
    start_command: Some(ControlTransfer::out(
        0,
        RTL_USB_EPA_CTL,
        RTL_USB_BLOCK_WRITE,
        &[0x00, 0x00],
    )),
    stop_command: Some(ControlTransfer::out(
        0,
        RTL_USB_EPA_CTL,
        RTL_USB_BLOCK_WRITE,
        &[0x10, 0x02],
    )),
    endpoint_reset: &RTL_EPA_RESET,
    frequency_setter: rtl_frequency,
    sample_rate_setter: rtl_sample_rate,
};

// === HackRF ===

const HACKRF_SET_TRANSCEIVER_MODE: u8 = 1;
const HACKRF_SAMPLE_RATE_SET: u8 = 6;
const HACKRF_BOARD_ID_READ: u8 = 14;
const HACKRF_SET_FREQ: u8 = 16;
const HACKRF_AMP_ENABLE: u8 = 17;
const HACKRF_SET_LNA_GAIN: u8 = 19;
const HACKRF_RESET: u8 = 30;

const HACKRF_MODE_OFF: u16 = 0;
const HACKRF_MODE_RECEIVE: u16 = 1;

static HACKRF_INIT: [InitStep; 7] = [
    InitStep::Control {
        label: "device reset",
        transfer: ControlTransfer::out(HACKRF_RESET, 0, 0, &[]),
    },
    InitStep::Query {
        label: "board id query",
        transfer: ControlTransfer::read(HACKRF_BOARD_ID_READ, 0, 0, 1),
    },
    InitStep::Control {
        label: "amplifier enable",
        transfer: ControlTransfer::out(HACKRF_AMP_ENABLE, 1, 0, &[]),
    },
    // LNA gain is set through an IN request; index carries the gain in dB
    InitStep::Query {
        label: "LNA gain",
        transfer: ControlTransfer::read(HACKRF_SET_LNA_GAIN, 0, 32, 1),
    },
    InitStep::SetFrequency,
    InitStep::SetSampleRate,
    InitStep::ResetEndpoint,
];

fn hackrf_frequency(hz: u32) -> Vec<ControlTransfer> {
    let mhz = hz / 1_000_000;
    let rest = hz % 1_000_000;
    let mut data = mhz.to_le_bytes().to_vec();
    data.extend_from_slice(&rest.to_le_bytes());
    vec![ControlTransfer {
        request_type: VENDOR_OUT,
        request: HACKRF_SET_FREQ,
        value: 0,
        index: 0,
        data: Cow::Owned(data),
        length: 0,
    }]
}

fn hackrf_sample_rate(hz: u32) -> Vec<ControlTransfer> {
    let mut data = hz.to_le_bytes().to_vec();
    data.extend_from_slice(&1u32.to_le_bytes());
    vec![ControlTransfer {
        request_type: VENDOR_OUT,
        request: HACKRF_SAMPLE_RATE_SET,
        value: 0,
        index: 0,
        data: Cow::Owned(data),
        length: 0,
    }]
}

static HACKRF: DeviceProfile = DeviceProfile {
    family: DeviceFamily::HackRf,
    sample_format: SampleFormat::I8,
    init_sequence: &HACKRF_INIT,
    start_command: Some(ControlTransfer::out(
        HACKRF_SET_TRANSCEIVER_MODE,
        HACKRF_MODE_RECEIVE,
        0,
        &[],
    )),
    stop_command: Some(ControlTransfer::out(
        HACKRF_SET_TRANSCEIVER_MODE,
        HACKRF_MODE_OFF,
        0,
        &[],
    )),
    endpoint_reset: &[],
    frequency_setter: hackrf_frequency,
    sample_rate_setter: hackrf_sample_rate,
};

// === Airspy ===

const AIRSPY_RESET: u8 = 0;
const AIRSPY_RECEIVER_MODE: u8 = 1;
const AIRSPY_READ_BOARD_ID: u8 = 9;
const AIRSPY_SET_SAMPLERATE: u8 = 12;
const AIRSPY_SET_FREQ: u8 = 13;
const AIRSPY_SET_LNA_AGC: u8 = 17;
const AIRSPY_SET_MIXER_AGC: u8 = 18;

static AIRSPY_INIT: [InitStep; 8] = [
    InitStep::Control {
        label: "device reset",
        transfer: ControlTransfer::out(AIRSPY_RESET, 0, 0, &[]),
    },
    InitStep::Query {
        label: "board id query",
        transfer: ControlTransfer::read(AIRSPY_READ_BOARD_ID, 0, 0, 1),
    },
    InitStep::Query {
        label: "LNA AGC enable",
        transfer: ControlTransfer::read(AIRSPY_SET_LNA_AGC, 0, 1, 1),
    },
    InitStep::Query {
        label: "mixer AGC enable",
        transfer: ControlTransfer::read(AIRSPY_SET_MIXER_AGC, 0, 1, 1),
    },
    InitStep::Control {
        label: "receiver idle",
        transfer: ControlTransfer::out(AIRSPY_RECEIVER_MODE, 0, 0, &[]),
    },
    InitStep::SetFrequency,
    InitStep::SetSampleRate,
    InitStep::ResetEndpoint,
];

fn airspy_frequency(hz: u32) -> Vec<ControlTransfer> {
    vec![ControlTransfer {
        request_type: VENDOR_OUT,
        request: AIRSPY_SET_FREQ,
        value: 0,
        index: 0,
        data: Cow::Owned(hz.to_le_bytes().to_vec()),
        length: 0,
    }]
}

fn airspy_sample_rate(hz: u32) -> Vec<ControlTransfer> {
    // index 0 selects the highest native rate, 1 the lower one
    let index = if hz >= 6_000_000 { 0 } else { 1 };
    vec![ControlTransfer::read(AIRSPY_SET_SAMPLERATE, 0, index, 1)]
}

static AIRSPY: DeviceProfile = DeviceProfile {
    family: DeviceFamily::Airspy,
    sample_format: SampleFormat::I16Le,
    init_sequence: &AIRSPY_INIT,
    start_command: Some(ControlTransfer::out(AIRSPY_RECEIVER_MODE, 1, 0, &[])),
    stop_command: Some(ControlTransfer::out(AIRSPY_RECEIVER_MODE, 0, 0, &[])),
    endpoint_reset: &[],
    frequency_setter: airspy_frequency,
    sample_rate_setter: airspy_sample_rate,
};

// === Generic bulk streamer ===

static GENERIC_INIT: [InitStep; 1] = [InitStep::ResetEndpoint];

fn no_transfers(_: u32) -> Vec<ControlTransfer> {
    Vec::new()
}

static GENERIC: DeviceProfile = DeviceProfile {
    family: DeviceFamily::Unknown,
    sample_format: SampleFormat::I16Le,
    init_sequence: &GENERIC_INIT,
    start_command: None,
    stop_command: None,
    endpoint_reset: &[],
    frequency_setter: no_transfers,
    sample_rate_setter: no_transfers,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_table_entry_resolves() {
        for &(vid, pid, family, _) in DEVICE_TABLE {
            let identity = DeviceIdentity::new(vid, pid);
            assert_eq!(resolve_family(&identity).unwrap(), family);
            // deterministic
            assert_eq!(resolve_family(&identity).unwrap(), family);
            assert_eq!(lookup(&identity).unwrap().family, family);
        }
    }

    #[test]
    fn test_unknown_pairs_are_unsupported() {
        for (vid, pid) in [(0x0bda, 0x0001), (0x1234, 0x2838), (0x1d50, 0x0000), (0, 0)] {
            let identity = DeviceIdentity::new(vid, pid);
            assert!(matches!(
                resolve_family(&identity),
                Err(SessionError::UnsupportedDevice { vendor_id, product_id })
                    if vendor_id == vid && product_id == pid
            ));
        }
    }

    #[test]
    fn test_serial_does_not_affect_resolution() {
        let identity = DeviceIdentity::new(0x0bda, 0x2838).with_serial("00000001");
        assert_eq!(resolve_family(&identity).unwrap(), DeviceFamily::Rtl2832);
        assert_eq!(identity.to_string(), "0bda:2838 SN 00000001");
    }

    #[test]
    fn test_profiles_end_with_endpoint_reset() {
        for family in [
            DeviceFamily::Rtl2832,
            DeviceFamily::HackRf,
            DeviceFamily::Airspy,
            DeviceFamily::Unknown,
        ] {
            let steps = profile_for(family).init_sequence;
            assert_eq!(steps.last(), Some(&InitStep::ResetEndpoint));
        }
    }

    #[test]
    fn test_hackrf_frequency_payload() {
        let transfers = hackrf_frequency(466_050_000);
        assert_eq!(transfers.len(), 1);
        assert_eq!(&transfers[0].data[..4], &466u32.to_le_bytes());
        assert_eq!(&transfers[0].data[4..], &50_000u32.to_le_bytes());
    }

    #[test]
    fn test_rtl_sample_rate_ratio() {
        let transfers = rtl_sample_rate(2_400_000);
        // 28.8 MHz / 2.4 MHz = 12, in 22-bit fixed point
        let ratio = u32::from_be_bytes([
            transfers[0].data[0],
            transfers[0].data[1],
            transfers[1].data[0],
            transfers[1].data[1],
        ]);
        assert_eq!(ratio, 12 << 22);
    }

    #[test]
    fn test_control_direction() {
        assert!(ControlTransfer::read(9, 0, 0, 1).is_in());
        assert!(!ControlTransfer::out(1, 0, 0, &[]).is_in());
    }
}
