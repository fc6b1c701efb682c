//! USB SDR device handling: profiles, transport, session lifecycle

pub mod manager;
pub mod profile;
pub mod session;
pub mod state;
pub mod usb;

pub use manager::DeviceManager;
pub use profile::DeviceIdentity;
pub use session::{DeviceSession, Tuning};
pub use state::{SessionState, SessionStats, StatsSnapshot};
pub use usb::{RusbHost, UsbTransport};
