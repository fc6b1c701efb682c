//! POCSAG Capture - native USB SDR pager decoder
//!
//! Streams samples from an RTL2832U, HackRF or Airspy over libusb, slices
//! them into bits, and decodes POCSAG batches with BCH correction.

mod config;
mod decoder;
mod device;
mod events;
mod pocsag;
mod sdr;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use device::{DeviceManager, RusbHost, SessionState};
use events::{EventSink, Record, Severity};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pocsag_capture=info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("===========================================");
    info!("   POCSAG Capture - Native USB SDR");
    info!("   in-process bit sync + BCH decoder");
    info!("===========================================");

    let config = Config::from_env().context("Invalid configuration")?;

    info!("Configuration:");
    info!("  Center frequency: {:.4} MHz", config.center_freq_hz as f64 / 1e6);
    info!("  Device sample rate: {} S/s", config.device_sample_rate);
    info!(
        "  Demod sample rate: {} S/s at {} baud",
        config.demod_sample_rate, config.baud_rate
    );
    info!(
        "  Bulk reads: {} bytes, {} ms timeout",
        config.read_buffer_size, config.read_timeout_ms
    );
    if config.json_output {
        info!("  Output: JSON lines on stdout");
    }

    let (events, mut stream) = EventSink::channel();
    let host = RusbHost::new().context("Failed to initialise libusb")?;
    let mut manager = DeviceManager::new(host, &config, events.clone());

    let identity = match config.identity() {
        Some(identity) => {
            info!("Using requested device {}", identity);
            identity
        }
        None => {
            info!("Searching for supported SDR devices...");
            let found = manager.discover().context("USB enumeration failed")?;
            for identity in &found {
                info!("  Found {}", identity);
            }
            match found.into_iter().next() {
                Some(identity) => identity,
                None => bail!("No supported SDR device found. Set SDR_VENDOR_ID/SDR_PRODUCT_ID or check permissions."),
            }
        }
    };

    if let Err(e) = manager.select_device(identity) {
        error!("Failed to open device: {}", e);
        error!("Make sure the device is connected and you have USB permissions.");
        return Err(e.into());
    }
    manager.start().context("Failed to start streaming")?;

    info!("===========================================");
    info!("  Receiving... Press Ctrl+C to stop.");
    info!("===========================================");

    let mut stats_timer = tokio::time::interval(Duration::from_secs(config.stats_interval_secs));
    stats_timer.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut pages = 0u64;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutdown requested");
                break;
            }
            Some(message) = stream.message_rx.recv() => {
                pages += 1;
                info!(">>> PAGE {} | {} | {}", message.address, message.function, message.text);
                if config.json_output {
                    emit(&Record::Page(&message))?;
                }
            }
            Some(status) = stream.status_rx.recv() => {
                // already mirrored to tracing by the sink
                if config.json_output {
                    emit(&Record::Status(&status))?;
                }
                if status.severity == Severity::Error && manager.state() == SessionState::Faulted {
                    warn!("Session faulted: {}", status.text);
                    break;
                }
            }
            _ = stats_timer.tick() => {
                let snapshot = manager.stats().snapshot();
                info!("[Stats] {}", snapshot);
                if config.json_output {
                    emit(&Record::Stats { state: manager.state(), stats: snapshot })?;
                }
                if manager.state() == SessionState::Faulted {
                    warn!("Session faulted");
                    break;
                }
            }
        }
    }

    manager.teardown();

    // pages decoded while stopping
    for message in stream.drain_messages() {
        pages += 1;
        info!(">>> PAGE {} | {} | {}", message.address, message.function, message.text);
        if config.json_output {
            emit(&Record::Page(&message))?;
        }
    }

    let snapshot = manager.stats().snapshot();
    info!("Final stats: {}", snapshot);
    if config.json_output {
        emit(&Record::Stats { state: manager.state(), stats: snapshot })?;
    }
    info!(
        "Shutdown complete. Pages decoded: {}, events dropped: {}",
        pages,
        events.dropped()
    );
    Ok(())
}

fn emit(record: &Record<'_>) -> Result<()> {
    let line = record.to_json_line().context("Failed to encode output record")?;
    println!("{}", line);
    Ok(())
}
