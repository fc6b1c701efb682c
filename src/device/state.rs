//! Per-session state tracking

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::sdr::SyncStats;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    PermissionRequested,
    Opened,
    Configured,
    Streaming,
    Stopped,
    Faulted,
}

impl SessionState {
    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::PermissionRequested,
            2 => SessionState::Opened,
            3 => SessionState::Configured,
            4 => SessionState::Streaming,
            5 => SessionState::Stopped,
            _ => SessionState::Faulted,
        }
    }
}

/// Session state readable from any thread
#[derive(Debug)]
pub struct SharedState(AtomicU8);

impl SharedState {
    pub fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: SessionState) {
        self.0.store(state.to_u8(), Ordering::SeqCst);
    }
}

/// Statistics for one session
#[derive(Debug, Default)]
pub struct SessionStats {
    pub chunks_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub timeouts: AtomicU64,
    pub transfer_errors: AtomicU64,
    pub endpoint_resets: AtomicU64,
    pub chunks_decoded: AtomicU64,
    pub samples_processed: AtomicU64,
    pub preambles_detected: AtomicU64,
    pub syncs_detected: AtomicU64,
    pub batches_decoded: AtomicU64,
    pub corrected_codewords: AtomicU64,
    pub uncorrectable_codewords: AtomicU64,
    pub messages_decoded: AtomicU64,
}

/// Plain copy of `SessionStats`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub timeouts: u64,
    pub transfer_errors: u64,
    pub endpoint_resets: u64,
    pub chunks_decoded: u64,
    pub samples_processed: u64,
    pub preambles_detected: u64,
    pub syncs_detected: u64,
    pub batches_decoded: u64,
    pub corrected_codewords: u64,
    pub uncorrectable_codewords: u64,
    pub messages_decoded: u64,
}

impl SessionStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_chunk(&self, bytes: usize) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transfer_error(&self) {
        self.transfer_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_endpoint_reset(&self) {
        self.endpoint_resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the decoder's running totals
    pub fn update_decoder(&self, chunks: u64, sync: &SyncStats) {
        self.chunks_decoded.store(chunks, Ordering::Relaxed);
        self.samples_processed
            .store(sync.samples_processed, Ordering::Relaxed);
        self.preambles_detected
            .store(sync.preambles_detected, Ordering::Relaxed);
        self.syncs_detected.store(sync.syncs_detected, Ordering::Relaxed);
        self.batches_decoded
            .store(sync.decode.batches, Ordering::Relaxed);
        self.corrected_codewords
            .store(sync.decode.corrected_codewords, Ordering::Relaxed);
        self.uncorrectable_codewords
            .store(sync.decode.uncorrectable_codewords, Ordering::Relaxed);
        self.messages_decoded
            .store(sync.decode.messages, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            transfer_errors: self.transfer_errors.load(Ordering::Relaxed),
            endpoint_resets: self.endpoint_resets.load(Ordering::Relaxed),
            chunks_decoded: self.chunks_decoded.load(Ordering::Relaxed),
            samples_processed: self.samples_processed.load(Ordering::Relaxed),
            preambles_detected: self.preambles_detected.load(Ordering::Relaxed),
            syncs_detected: self.syncs_detected.load(Ordering::Relaxed),
            batches_decoded: self.batches_decoded.load(Ordering::Relaxed),
            corrected_codewords: self.corrected_codewords.load(Ordering::Relaxed),
            uncorrectable_codewords: self.uncorrectable_codewords.load(Ordering::Relaxed),
            messages_decoded: self.messages_decoded.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Chunks: {} ({} KiB) | Timeouts: {} | Errors: {} | Resets: {} | Preambles: {} | Syncs: {} | Batches: {} | Corrected: {} | Uncorrectable: {} | Messages: {}",
            self.chunks_received,
            self.bytes_received / 1024,
            self.timeouts,
            self.transfer_errors,
            self.endpoint_resets,
            self.preambles_detected,
            self.syncs_detected,
            self.batches_decoded,
            self.corrected_codewords,
            self.uncorrectable_codewords,
            self.messages_decoded
        )
    }
}
