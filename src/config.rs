//! Configuration loaded from environment variables

use std::time::Duration;

use thiserror::Error;

use crate::device::{DeviceIdentity, Tuning};
use crate::sdr::{CaptureConfig, SlicerConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a hex USB id, got {value:?}")]
    InvalidHexId { name: &'static str, value: String },

    #[error("{present} is set but {missing} is not")]
    IncompleteIdentity {
        present: &'static str,
        missing: &'static str,
    },
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// USB vendor id of the device to use (first supported device if unset)
    pub vendor_id: Option<u16>,

    /// USB product id of the device to use
    pub product_id: Option<u16>,

    /// Serial number filter
    pub serial: Option<String>,

    /// Tuned frequency in Hz
    pub center_freq_hz: u32,

    /// Sample rate programmed into the device
    pub device_sample_rate: u32,

    /// Post-demodulation sample rate seen by the bit slicer
    pub demod_sample_rate: u32,

    /// POCSAG bit rate
    pub baud_rate: u32,

    pub read_timeout_ms: u64,
    pub read_buffer_size: usize,

    /// Capacity of the capture to decoder queue, in chunks
    pub chunk_queue_depth: usize,

    pub loop_yield_ms: u64,
    pub throughput_report_bytes: u64,

    /// Periodic stats log interval
    pub stats_interval_secs: u64,

    /// Write pages, status and stats to stdout as JSON lines
    pub json_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vendor_id: None,
            product_id: None,
            serial: None,
            center_freq_hz: 466_050_000,
            device_sample_rate: 2_400_000,
            demod_sample_rate: 24_000,
            baud_rate: 1200,
            read_timeout_ms: 1000,
            read_buffer_size: 16 * 1024,
            chunk_queue_depth: 64,
            loop_yield_ms: 1,
            throughput_report_bytes: 4 * 1024 * 1024,
            stats_interval_secs: 10,
            json_output: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any name-to-value lookup
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let parse_or = |name: &str, default: u64| -> u64 {
            get(name)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };

        let vendor_id = parse_hex_id("SDR_VENDOR_ID", get("SDR_VENDOR_ID"))?;
        let product_id = parse_hex_id("SDR_PRODUCT_ID", get("SDR_PRODUCT_ID"))?;
        match (vendor_id, product_id) {
            (Some(_), None) => {
                return Err(ConfigError::IncompleteIdentity {
                    present: "SDR_VENDOR_ID",
                    missing: "SDR_PRODUCT_ID",
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompleteIdentity {
                    present: "SDR_PRODUCT_ID",
                    missing: "SDR_VENDOR_ID",
                })
            }
            _ => {}
        }

        Ok(Self {
            vendor_id,
            product_id,

            serial: get("SDR_SERIAL")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),

            center_freq_hz: get("CENTER_FREQ_HZ")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.center_freq_hz),

            device_sample_rate: get("DEVICE_SAMPLE_RATE")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.device_sample_rate),

            demod_sample_rate: get("DEMOD_SAMPLE_RATE")
                .and_then(|s| s.trim().parse().ok())
                .filter(|&rate| rate > 0)
                .unwrap_or(defaults.demod_sample_rate),

            baud_rate: get("BAUD_RATE")
                .and_then(|s| s.trim().parse().ok())
                .filter(|&rate| rate > 0)
                .unwrap_or(defaults.baud_rate),

            read_timeout_ms: parse_or("READ_TIMEOUT_MS", defaults.read_timeout_ms),

            read_buffer_size: parse_or("READ_BUFFER_SIZE", defaults.read_buffer_size as u64)
                .max(512) as usize,

            chunk_queue_depth: parse_or("CHUNK_QUEUE_DEPTH", defaults.chunk_queue_depth as u64)
                .max(1) as usize,

            loop_yield_ms: parse_or("LOOP_YIELD_MS", defaults.loop_yield_ms),

            throughput_report_bytes: parse_or(
                "THROUGHPUT_REPORT_BYTES",
                defaults.throughput_report_bytes,
            ),

            stats_interval_secs: parse_or("STATS_INTERVAL_SECS", defaults.stats_interval_secs)
                .max(1),

            json_output: get("OUTPUT_FORMAT")
                .map(|s| s.trim().eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.json_output),
        })
    }

    /// Device requested explicitly, if any
    pub fn identity(&self) -> Option<DeviceIdentity> {
        let identity = DeviceIdentity::new(self.vendor_id?, self.product_id?);
        Some(match &self.serial {
            Some(serial) => identity.with_serial(serial.clone()),
            None => identity,
        })
    }

    pub fn tuning(&self) -> Tuning {
        Tuning {
            frequency_hz: self.center_freq_hz,
            sample_rate_hz: self.device_sample_rate,
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            buffer_size: self.read_buffer_size,
            loop_yield: Duration::from_millis(self.loop_yield_ms),
            throughput_report_bytes: self.throughput_report_bytes,
        }
    }

    pub fn slicer_config(&self) -> SlicerConfig {
        SlicerConfig {
            sample_rate: self.demod_sample_rate,
            baud_rate: self.baud_rate,
        }
    }
}

/// Parse "0bda", "0x0bda" or "0BDA"
fn parse_hex_id(name: &'static str, value: Option<String>) -> Result<Option<u16>, ConfigError> {
    let value = match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => return Ok(None),
    };

    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    u16::from_str_radix(digits, 16)
        .map(Some)
        .map_err(|_| ConfigError::InvalidHexId {
            name,
            value: value.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.identity(), None);
        assert_eq!(config.slicer_config().samples_per_bit(), 20);
        assert_eq!(config.capture_config().buffer_size, 16384);
        assert_eq!(config.capture_config().read_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_identity_from_hex() {
        let config = config_from(&[
            ("SDR_VENDOR_ID", "0x0bda"),
            ("SDR_PRODUCT_ID", "2838"),
            ("SDR_SERIAL", "00000001"),
        ])
        .unwrap();

        let identity = config.identity().unwrap();
        assert_eq!(identity.vendor_id, 0x0bda);
        assert_eq!(identity.product_id, 0x2838);
        assert_eq!(identity.serial_number.as_deref(), Some("00000001"));
    }

    #[test]
    fn test_invalid_hex_is_an_error() {
        let err = config_from(&[("SDR_VENDOR_ID", "rtl"), ("SDR_PRODUCT_ID", "2838")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidHexId {
                name: "SDR_VENDOR_ID",
                value: "rtl".to_string()
            }
        );
    }

    #[test]
    fn test_half_identity_is_an_error() {
        let err = config_from(&[("SDR_PRODUCT_ID", "6089")]).unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteIdentity { .. }));
    }

    #[test]
    fn test_numeric_fallbacks() {
        let config = config_from(&[
            ("CENTER_FREQ_HZ", "929612500"),
            ("BAUD_RATE", "0"),
            ("READ_TIMEOUT_MS", "not-a-number"),
            ("CHUNK_QUEUE_DEPTH", "8"),
        ])
        .unwrap();

        assert_eq!(config.tuning().frequency_hz, 929_612_500);
        assert_eq!(config.baud_rate, 1200);
        assert_eq!(config.read_timeout_ms, 1000);
        assert_eq!(config.chunk_queue_depth, 8);
    }

    #[test]
    fn test_output_format() {
        assert!(config_from(&[("OUTPUT_FORMAT", "JSON")]).unwrap().json_output);
        assert!(!config_from(&[("OUTPUT_FORMAT", "text")]).unwrap().json_output);
        assert!(!config_from(&[]).unwrap().json_output);
    }
}
