//! Streaming acquisition loop
//!
//! Owns the device session on a dedicated thread, issues bounded-timeout bulk
//! reads and forwards every non-empty read to the decoder in arrival order.
//! Transfer errors are retried in place up to `MAX_CONSECUTIVE_ERRORS`;
//! disconnection ends the loop at once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use tracing::{debug, info, trace};

use crate::device::usb::libusb_code;
use crate::device::{DeviceSession, SessionStats, UsbTransport};

/// Consecutive transfer errors before the session is faulted
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Consecutive permission errors before an endpoint reset is tried
const ACCESS_ERRORS_BEFORE_RESET: u32 = 3;

/// Timeouts reported individually before switching to every Nth
const TIMEOUT_REPORT_FIRST: u64 = 5;
const TIMEOUT_REPORT_EVERY: u64 = 50;

/// Bytes included in the first-data hex dump
const FIRST_DATA_DUMP: usize = 16;

/// Cooperative cancellation flag, checked once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raw bytes from one bulk read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleChunk {
    pub bytes: Vec<u8>,
}

impl SampleChunk {
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Acquisition loop parameters
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub read_timeout: Duration,
    pub buffer_size: usize,
    pub loop_yield: Duration,
    /// Bytes between throughput status events
    pub throughput_report_bytes: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(1000),
            buffer_size: 16 * 1024,
            loop_yield: Duration::from_millis(1),
            throughput_report_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Named class of a failed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFailure {
    Disconnected,
    Cancelled,
    Io,
    InvalidArgument,
    TimedOut,
    PermissionDenied,
    Stalled,
    Overflow,
    Busy,
    Other,
}

impl From<rusb::Error> for TransferFailure {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::NoDevice | rusb::Error::NotFound => TransferFailure::Disconnected,
            rusb::Error::Interrupted => TransferFailure::Cancelled,
            rusb::Error::Io => TransferFailure::Io,
            rusb::Error::InvalidParam => TransferFailure::InvalidArgument,
            rusb::Error::Timeout => TransferFailure::TimedOut,
            rusb::Error::Access => TransferFailure::PermissionDenied,
            rusb::Error::Pipe => TransferFailure::Stalled,
            rusb::Error::Overflow => TransferFailure::Overflow,
            rusb::Error::Busy => TransferFailure::Busy,
            _ => TransferFailure::Other,
        }
    }
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferFailure::Disconnected => "device-disconnected",
            TransferFailure::Cancelled => "transfer-cancelled",
            TransferFailure::Io => "io-error",
            TransferFailure::InvalidArgument => "invalid-argument",
            TransferFailure::TimedOut => "timed-out",
            TransferFailure::PermissionDenied => "permission-denied",
            TransferFailure::Stalled => "endpoint-stalled",
            TransferFailure::Overflow => "overflow",
            TransferFailure::Busy => "busy",
            TransferFailure::Other => "unknown-error",
        };
        f.write_str(name)
    }
}

fn should_report_timeout(consecutive: u64) -> bool {
    consecutive <= TIMEOUT_REPORT_FIRST || consecutive % TIMEOUT_REPORT_EVERY == 0
}

/// Acquisition loop. Blocks until cancelled or faulted, then hands the
/// session back to the caller.
pub fn run<T: UsbTransport>(
    mut session: DeviceSession<T>,
    chunk_tx: Sender<SampleChunk>,
    cancel: &CancelToken,
    stats: &SessionStats,
    config: &CaptureConfig,
) -> DeviceSession<T> {
    let events = session.events().clone();
    let mut buffer = vec![0u8; config.buffer_size];

    let mut consecutive_errors = 0u32;
    let mut consecutive_timeouts = 0u64;
    let mut access_streak = 0u32;
    let mut reset_attempted = false;
    let mut first_data = true;
    let mut bytes_since_report = 0u64;
    let mut total_bytes = 0u64;
    let mut last_report = Instant::now();

    info!(
        "Capture loop started on endpoint 0x{:02x} ({} byte reads, {} ms timeout)",
        session.endpoint().address,
        config.buffer_size,
        config.read_timeout.as_millis()
    );

    loop {
        if cancel.is_cancelled() {
            session.send_stop();
            events.info(format!("Capture stopped after {} bytes", total_bytes));
            break;
        }

        match session.read_chunk(&mut buffer, config.read_timeout) {
            Ok(n) if n > 0 => {
                consecutive_errors = 0;
                consecutive_timeouts = 0;
                access_streak = 0;
                reset_attempted = false;

                stats.record_chunk(n);
                total_bytes += n as u64;
                bytes_since_report += n as u64;

                if first_data {
                    first_data = false;
                    events.info(format!(
                        "First sample data received ({} bytes): {}",
                        n,
                        hex::encode(&buffer[..n.min(FIRST_DATA_DUMP)])
                    ));
                }

                if chunk_tx
                    .send(SampleChunk {
                        bytes: buffer[..n].to_vec(),
                    })
                    .is_err()
                {
                    events.warning("Decoder is gone, stopping capture");
                    session.send_stop();
                    break;
                }

                if bytes_since_report >= config.throughput_report_bytes {
                    let elapsed = last_report.elapsed().as_secs_f64().max(0.001);
                    events.info(format!(
                        "Streaming: {:.1} MiB received, {:.0} KiB/s",
                        total_bytes as f64 / (1024.0 * 1024.0),
                        bytes_since_report as f64 / 1024.0 / elapsed
                    ));
                    bytes_since_report = 0;
                    last_report = Instant::now();
                }
            }
            Ok(_) | Err(rusb::Error::Timeout) => {
                consecutive_timeouts += 1;
                stats.record_timeout();
                if should_report_timeout(consecutive_timeouts) {
                    events.debug(format!(
                        "Read timed out ({} in a row), code {}",
                        consecutive_timeouts,
                        libusb_code(rusb::Error::Timeout)
                    ));
                } else {
                    trace!("Read timed out ({} in a row)", consecutive_timeouts);
                }
            }
            Err(e) => {
                let failure = TransferFailure::from(e);
                stats.record_transfer_error();

                if failure == TransferFailure::Disconnected {
                    session.mark_faulted();
                    events.error(format!(
                        "Transfer failed: {} (code {}), capture halted",
                        failure,
                        libusb_code(e)
                    ));
                    break;
                }

                consecutive_errors += 1;
                events.warning(format!(
                    "Transfer error {}/{}: {} (code {})",
                    consecutive_errors,
                    MAX_CONSECUTIVE_ERRORS,
                    failure,
                    libusb_code(e)
                ));

                if failure == TransferFailure::PermissionDenied {
                    access_streak += 1;
                    if access_streak >= ACCESS_ERRORS_BEFORE_RESET && !reset_attempted {
                        reset_attempted = true;
                        stats.record_endpoint_reset();
                        match session.reset_endpoint() {
                            Ok(()) => events.info("Endpoint reset, result 0"),
                            Err(e) => events.warning(format!(
                                "Endpoint reset failed: {} (code {})",
                                e,
                                libusb_code(e)
                            )),
                        }
                    }
                } else {
                    access_streak = 0;
                }

                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    session.mark_faulted();
                    events.error(format!(
                        "Capture halted after {} consecutive transfer errors",
                        consecutive_errors
                    ));
                    break;
                }
            }
        }

        thread::sleep(config.loop_yield);
    }

    debug!(
        "Capture loop exited in state {:?}, {} bytes total",
        session.state(),
        total_bytes
    );
    session
}

/// Acquisition loop running on its own thread
pub struct CaptureHandle<T: UsbTransport + 'static> {
    cancel: CancelToken,
    thread: JoinHandle<DeviceSession<T>>,
}

impl<T: UsbTransport + 'static> CaptureHandle<T> {
    pub fn spawn(
        session: DeviceSession<T>,
        chunk_tx: Sender<SampleChunk>,
        stats: Arc<SessionStats>,
        config: CaptureConfig,
    ) -> Result<Self> {
        let cancel = CancelToken::new();
        let thread_cancel = cancel.clone();

        let thread = thread::Builder::new()
            .name("sdr-capture".to_string())
            .spawn(move || run(session, chunk_tx, &thread_cancel, &stats, &config))
            .context("Failed to spawn capture thread")?;

        Ok(Self { cancel, thread })
    }

    /// True once the loop has returned on its own (faulted)
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Cancel, wait for the in-flight read to finish, and take the session back
    pub fn stop(self) -> Option<DeviceSession<T>> {
        self.cancel.cancel();
        self.thread.join().ok()
    }
}
