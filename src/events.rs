//! Message and status delivery to the presentation layer
//!
//! Producers (capture and decoder threads) never block: both streams are
//! unbounded tokio channels, read by whoever owns the `EventStream`. Every
//! status line is also mirrored to `tracing` at the matching level.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::device::{SessionState, StatsSnapshot};
use crate::pocsag::DecodedMessage;

/// Status severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Human-readable status line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub text: String,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}: {}", self.timestamp.format("%H:%M:%S"), self.severity, self.text)
    }
}

/// One line of machine-readable output
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record<'a> {
    Page(&'a DecodedMessage),
    Status(&'a StatusEvent),
    Stats {
        state: SessionState,
        #[serde(flatten)]
        stats: StatsSnapshot,
    },
}

impl Record<'_> {
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Producer side, cheap to clone into worker threads
#[derive(Debug, Clone)]
pub struct EventSink {
    status_tx: mpsc::UnboundedSender<StatusEvent>,
    message_tx: mpsc::UnboundedSender<DecodedMessage>,
    /// Events sent after the consumer went away
    dropped: Arc<AtomicU64>,
}

/// Consumer side
#[derive(Debug)]
pub struct EventStream {
    pub status_rx: mpsc::UnboundedReceiver<StatusEvent>,
    pub message_rx: mpsc::UnboundedReceiver<DecodedMessage>,
}

impl EventSink {
    pub fn channel() -> (EventSink, EventStream) {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        (
            EventSink {
                status_tx,
                message_tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            EventStream {
                status_rx,
                message_rx,
            },
        )
    }

    pub fn status(&self, severity: Severity, text: impl Into<String>) {
        let text = text.into();
        match severity {
            Severity::Debug => debug!("{}", text),
            Severity::Info => info!("{}", text),
            Severity::Warning => warn!("{}", text),
            Severity::Error => error!("{}", text),
        }

        // a dropped receiver only means nobody is listening any more
        let sent = self.status_tx.send(StatusEvent {
            timestamp: Utc::now(),
            severity,
            text,
        });
        if sent.is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn debug(&self, text: impl Into<String>) {
        self.status(Severity::Debug, text);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.status(Severity::Info, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.status(Severity::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.status(Severity::Error, text);
    }

    pub fn message(&self, message: DecodedMessage) {
        debug!("Page queued: {}", message);
        if self.message_tx.send(message).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventStream {
    /// Drain everything queued so far without waiting
    #[cfg(test)]
    pub fn drain_status(&mut self) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.status_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Pages queued but not yet received
    pub fn drain_messages(&mut self) -> Vec<DecodedMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.message_rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}
