//! Device manager - control surface over one session and its workers

use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::decoder::DecoderRunner;
use crate::events::EventSink;
use crate::sdr::{CaptureConfig, CaptureHandle, SlicerConfig};

use super::profile::{device_name, lookup, DeviceIdentity};
use super::session::{DeviceSession, SessionError, Tuning};
use super::state::{SessionState, SessionStats, SharedState};
use super::usb::{UsbHost, UsbTransport};

/// Capture and decoder threads of a streaming session
struct Pipeline<T: UsbTransport + 'static> {
    capture: CaptureHandle<T>,
    decoder: DecoderRunner,
}

/// Owns the selected session and starts/stops streaming on it
pub struct DeviceManager<H: UsbHost> {
    host: H,
    events: EventSink,
    tuning: Tuning,
    capture_config: CaptureConfig,
    slicer_config: SlicerConfig,
    queue_depth: usize,
    stats: Arc<SessionStats>,
    state: Arc<SharedState>,
    /// Present while selected and not streaming
    session: Option<DeviceSession<H::Transport>>,
    /// Present while streaming
    pipeline: Option<Pipeline<H::Transport>>,
}

impl<H: UsbHost> DeviceManager<H> {
    pub fn new(host: H, config: &Config, events: EventSink) -> Self {
        Self {
            host,
            events,
            tuning: config.tuning(),
            capture_config: config.capture_config(),
            slicer_config: config.slicer_config(),
            queue_depth: config.chunk_queue_depth.max(1),
            stats: SessionStats::new(),
            state: Arc::new(SharedState::new(SessionState::Idle)),
            session: None,
            pipeline: None,
        }
    }

    /// Open and configure a device, replacing any current session
    pub fn select_device(&mut self, identity: DeviceIdentity) -> Result<(), SessionError> {
        self.teardown();

        let profile = match lookup(&identity) {
            Ok(profile) => profile,
            Err(e) => {
                self.events.error(format!("{}: {}", identity, e));
                return Err(e);
            }
        };

        self.events.info(format!(
            "Selected {} ({}, {})",
            identity,
            device_name(&identity).unwrap_or("unnamed"),
            profile.family
        ));
        self.state.set(SessionState::PermissionRequested);

        let transport = match self.host.open(&identity) {
            Ok(transport) => transport,
            Err(e) => {
                self.events.error(format!("Open failed: {}", e));
                self.state.set(SessionState::Idle);
                return Err(e);
            }
        };

        let mut session =
            match DeviceSession::open(transport, identity, profile, self.events.clone()) {
                Ok(session) => session,
                Err(e) => {
                    self.events.error(format!("Session setup failed: {}", e));
                    self.state.set(SessionState::Idle);
                    return Err(e);
                }
            };

        match session.configure(&self.tuning) {
            Ok(()) => self.events.info("Device configured"),
            Err(SessionError::ControlTransferFailed { step, code }) => self.events.warning(
                format!("Device configured with errors (first: {}, code {})", step, code),
            ),
            Err(e) => {
                self.state.set(SessionState::Idle);
                return Err(e);
            }
        }

        self.stats = SessionStats::new();
        self.state = session.shared_state();
        self.session = Some(session);
        Ok(())
    }

    /// Start streaming. A no-op while already streaming.
    pub fn start(&mut self) -> Result<()> {
        self.reap_finished();
        if self.pipeline.is_some() {
            debug!("start() while streaming, ignored");
            return Ok(());
        }

        let mut session = match self.session.take() {
            Some(session) => session,
            None => return Err(SessionError::InvalidState(self.state()).into()),
        };

        if let Err(e) = session.send_start() {
            self.events.error(format!("Start failed: {}", e));
            self.session = Some(session);
            return Err(e.into());
        }

        let (chunk_tx, chunk_rx) = bounded(self.queue_depth);
        let decoder = DecoderRunner::spawn(
            chunk_rx,
            session.profile().sample_format,
            self.slicer_config,
            self.events.clone(),
            self.stats.clone(),
        )?;
        let capture = CaptureHandle::spawn(
            session,
            chunk_tx,
            self.stats.clone(),
            self.capture_config.clone(),
        )?;

        self.events.info("Streaming started");
        self.pipeline = Some(Pipeline { capture, decoder });
        Ok(())
    }

    /// Stop streaming and wait for both workers. A no-op while not streaming.
    pub fn stop(&mut self) {
        let pipeline = match self.pipeline.take() {
            Some(pipeline) => pipeline,
            None => {
                debug!("stop() while not streaming, ignored");
                return;
            }
        };

        // capture exits first and drops the chunk sender, letting the decoder drain
        let session = pipeline.capture.stop();
        if let Some(final_stats) = pipeline.decoder.join() {
            info!(
                "Decoder drained: {} batches, {} messages",
                final_stats.decode.batches, final_stats.decode.messages
            );
        }

        match session {
            Some(session) => self.session = Some(session),
            None => {
                self.events.error("Capture thread panicked; session lost");
                self.state.set(SessionState::Faulted);
            }
        }
    }

    /// Release all hardware; safe to call repeatedly
    pub fn teardown(&mut self) {
        self.stop();
        if let Some(mut session) = self.session.take() {
            session.release();
            self.events.info(format!("Released {}", session.identity()));
        }
        self.state = Arc::new(SharedState::new(SessionState::Idle));
    }

    /// Join workers of a loop that ended on its own
    fn reap_finished(&mut self) {
        let faulted = self.state() == SessionState::Faulted;
        let finished = self
            .pipeline
            .as_ref()
            .map(|p| faulted || p.capture.is_finished())
            .unwrap_or(false);
        if finished {
            warn!("Capture loop ended by itself in state {:?}", self.state());
            self.stop();
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn stats(&self) -> &Arc<SessionStats> {
        &self.stats
    }

    #[cfg(test)]
    pub fn is_streaming(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Attached supported devices
    pub fn discover(&self) -> Result<Vec<DeviceIdentity>, SessionError> {
        self.host.discover()
    }
}

impl<H: UsbHost> Drop for DeviceManager<H> {
    fn drop(&mut self) {
        self.teardown();
    }
}
