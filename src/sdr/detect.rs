//! POCSAG bit synchronization
//!
//! Turns a post-demodulation sample stream into bits, then walks the bits
//! through three states:
//! - SearchingPreamble: wait for 576 bits of 1010... alternation
//! - SearchingSync: slide one bit at a time until the sync word appears
//! - ReceivingBatch: take 16 codewords, decode them, go back to sync search
//!
//! Resynchronization happens after every batch rather than waiting for a new
//! preamble, so a signal that is still on the air relocks within one codeword.

use std::borrow::Borrow;
use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::pocsag::{
    decode_batch, Codeword, DecodeStats, DecodedMessage, BATCH_CODEWORDS, CODEWORD_BITS,
    SYNC_WORD,
};

/// Preamble length in bits
pub const PREAMBLE_BITS: usize = 576;

/// Decay of the running magnitude average, per sample
const AVERAGE_ALPHA: f32 = 0.01;

/// Decoder states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    SearchingPreamble,
    SearchingSync,
    ReceivingBatch,
}

/// Slicer parameters
#[derive(Debug, Clone, Copy)]
pub struct SlicerConfig {
    /// Post-demodulation sample rate in Hz
    pub sample_rate: u32,
    /// POCSAG bit rate
    pub baud_rate: u32,
}

impl SlicerConfig {
    pub fn samples_per_bit(&self) -> usize {
        (self.sample_rate / self.baud_rate.max(1)).max(1) as usize
    }
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            baud_rate: 1200,
        }
    }
}

/// Rolling buffer of sliced bits
#[derive(Debug, Default)]
pub struct BitWindow {
    bits: VecDeque<bool>,
}

impl BitWindow {
    pub fn push(&mut self, bit: bool) {
        self.bits.push_back(bit);
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    /// Drop the oldest bit
    pub fn pop_front(&mut self) {
        self.bits.pop_front();
    }

    /// Keep only the newest `n` bits
    pub fn keep_last(&mut self, n: usize) {
        let excess = self.bits.len().saturating_sub(n);
        self.bits.drain(..excess);
    }

    /// Number of bit changes across the newest `n` bits
    pub fn transitions_in_last(&self, n: usize) -> usize {
        if self.bits.len() < 2 {
            return 0;
        }
        let start = self.bits.len().saturating_sub(n);
        self.bits
            .range(start..)
            .zip(self.bits.range(start + 1..))
            .filter(|(a, b)| a != b)
            .count()
    }

    /// Pack the newest 32 bits, most significant first
    pub fn last_word(&self) -> u32 {
        let start = self.bits.len().saturating_sub(CODEWORD_BITS);
        pack(self.bits.range(start..))
    }

    /// Remove and pack the oldest 32 bits
    pub fn take_word(&mut self) -> u32 {
        let n = CODEWORD_BITS.min(self.bits.len());
        pack(self.bits.drain(..n))
    }
}

fn pack(bits: impl IntoIterator<Item = impl Borrow<bool>>) -> u32 {
    bits.into_iter()
        .fold(0u32, |acc, b| (acc << 1) | (*b.borrow() as u32))
}

/// Synchronizer statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub samples_processed: u64,
    pub bits_sliced: u64,
    pub preambles_detected: u64,
    pub syncs_detected: u64,
    pub decode: DecodeStats,
}

/// Bit slicer plus preamble/sync/batch state machine
pub struct BitSynchronizer {
    samples_per_bit: usize,
    /// Sum and count of samples in the current bit period
    bit_sum: f32,
    bit_samples: usize,
    /// Running average of sample magnitude (adaptive noise floor)
    running_average: f32,
    state: DecoderState,
    window: BitWindow,
    batch: Vec<Codeword>,
    pub stats: SyncStats,
}

impl BitSynchronizer {
    pub fn new(config: SlicerConfig) -> Self {
        Self {
            samples_per_bit: config.samples_per_bit(),
            bit_sum: 0.0,
            bit_samples: 0,
            running_average: 0.0,
            state: DecoderState::SearchingPreamble,
            window: BitWindow::default(),
            batch: Vec::with_capacity(BATCH_CODEWORDS),
            stats: SyncStats::default(),
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn threshold(&self) -> f32 {
        self.running_average * 0.5
    }

    /// Process a block of samples and return decoded messages
    pub fn process_samples(&mut self, samples: &[f32]) -> Vec<DecodedMessage> {
        let mut messages = Vec::new();

        for &sample in samples {
            self.running_average =
                self.running_average * (1.0 - AVERAGE_ALPHA) + sample.abs() * AVERAGE_ALPHA;
            self.bit_sum += sample;
            self.bit_samples += 1;

            if self.bit_samples >= self.samples_per_bit {
                let average = self.bit_sum / self.bit_samples as f32;
                self.bit_sum = 0.0;
                self.bit_samples = 0;
                messages.extend(self.push_bit(average > self.threshold()));
            }
        }

        self.stats.samples_processed += samples.len() as u64;
        messages
    }

    /// Feed one sliced bit through the state machine
    pub fn push_bit(&mut self, bit: bool) -> Vec<DecodedMessage> {
        self.stats.bits_sliced += 1;
        self.window.push(bit);

        match self.state {
            DecoderState::SearchingPreamble => {
                self.search_preamble();
                Vec::new()
            }
            DecoderState::SearchingSync => {
                self.search_sync();
                Vec::new()
            }
            DecoderState::ReceivingBatch => self.receive_batch(),
        }
    }

    /// Feed a sequence of bits
    #[cfg(test)]
    pub fn push_bits(&mut self, bits: &[bool]) -> Vec<DecodedMessage> {
        bits.iter().flat_map(|&bit| self.push_bit(bit)).collect()
    }

    fn search_preamble(&mut self) {
        if self.window.len() < PREAMBLE_BITS {
            return;
        }

        let transitions = self.window.transitions_in_last(PREAMBLE_BITS);
        // more than 90% of the preamble length
        if transitions * 10 > PREAMBLE_BITS * 9 {
            self.stats.preambles_detected += 1;
            debug!("Preamble detected ({} transitions)", transitions);
            self.window.clear();
            self.state = DecoderState::SearchingSync;
        } else if self.window.len() > PREAMBLE_BITS * 2 {
            self.window.keep_last(PREAMBLE_BITS);
        }
    }

    fn search_sync(&mut self) {
        if self.window.len() < CODEWORD_BITS {
            return;
        }

        if self.window.last_word() == SYNC_WORD {
            self.stats.syncs_detected += 1;
            trace!("Sync word found");
            self.window.clear();
            self.batch.clear();
            self.state = DecoderState::ReceivingBatch;
        } else {
            self.window.pop_front();
        }
    }

    fn receive_batch(&mut self) -> Vec<DecodedMessage> {
        if self.window.len() < CODEWORD_BITS {
            return Vec::new();
        }

        self.batch.push(Codeword(self.window.take_word()));
        if self.batch.len() < BATCH_CODEWORDS {
            return Vec::new();
        }

        let messages = decode_batch(&self.batch, &mut self.stats.decode);
        self.batch.clear();
        self.state = DecoderState::SearchingSync;
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pocsag::testutil::{
        address_codeword, alpha_codewords, batch_with, message_codeword, preamble, transmission,
        word_bits,
    };
    use crate::pocsag::FunctionCode;

    fn synchronizer() -> BitSynchronizer {
        BitSynchronizer::new(SlicerConfig::default())
    }

    /// Alternating bits with `flips` pairs broken so that transitions drop
    fn preamble_with_transitions(transitions: usize) -> Vec<bool> {
        // 576 bits have 575 adjacent pairs; repeat bits to remove transitions
        let mut bits = Vec::with_capacity(PREAMBLE_BITS);
        let mut remaining_breaks = (PREAMBLE_BITS - 1) - transitions;
        let mut value = true;
        bits.push(value);
        while bits.len() < PREAMBLE_BITS {
            if remaining_breaks > 0 {
                remaining_breaks -= 1;
            } else {
                value = !value;
            }
            bits.push(value);
        }
        bits
    }

    #[test]
    fn test_samples_per_bit() {
        assert_eq!(SlicerConfig::default().samples_per_bit(), 20);
        let config = SlicerConfig {
            sample_rate: 100,
            baud_rate: 1200,
        };
        assert_eq!(config.samples_per_bit(), 1);
    }

    #[test]
    fn test_bit_window_packing() {
        let mut window = BitWindow::default();
        for bit in word_bits(0xDEAD_BEEF) {
            window.push(bit);
        }
        window.push(true);
        assert_eq!(window.last_word(), 0xBD5B_7DDF);
        assert_eq!(window.take_word(), 0xDEAD_BEEF);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_bit_window_keep_last() {
        let mut window = BitWindow::default();
        for bit in preamble(100) {
            window.push(bit);
        }
        window.keep_last(10);
        assert_eq!(window.len(), 10);
        assert_eq!(window.transitions_in_last(10), 9);
    }

    #[test]
    fn test_preamble_detected_on_perfect_alternation() {
        let mut sync = synchronizer();
        sync.push_bits(&preamble(PREAMBLE_BITS - 1));
        assert_eq!(sync.state(), DecoderState::SearchingPreamble);
        sync.push_bit(false);
        assert_eq!(sync.state(), DecoderState::SearchingSync);
        assert_eq!(sync.stats.preambles_detected, 1);
    }

    #[test]
    fn test_preamble_threshold_boundary() {
        // 519 transitions is the smallest count above 90% of 576
        let mut sync = synchronizer();
        sync.push_bits(&preamble_with_transitions(519));
        assert_eq!(sync.state(), DecoderState::SearchingSync);

        let mut sync = synchronizer();
        sync.push_bits(&preamble_with_transitions(518));
        assert_eq!(sync.state(), DecoderState::SearchingPreamble);
    }

    #[test]
    fn test_preamble_rejected_at_89_percent() {
        let transitions = PREAMBLE_BITS * 89 / 100;
        let mut sync = synchronizer();
        sync.push_bits(&preamble_with_transitions(transitions));
        assert_eq!(sync.state(), DecoderState::SearchingPreamble);
    }

    #[test]
    fn test_preamble_accepted_above_90_percent() {
        let transitions = PREAMBLE_BITS * 95 / 100;
        let mut sync = synchronizer();
        sync.push_bits(&preamble_with_transitions(transitions));
        assert_eq!(sync.state(), DecoderState::SearchingSync);
    }

    #[test]
    fn test_preamble_search_window_is_bounded() {
        let mut sync = synchronizer();
        sync.push_bits(&vec![true; PREAMBLE_BITS * 5]);
        assert_eq!(sync.state(), DecoderState::SearchingPreamble);
        assert!(sync.window.len() <= PREAMBLE_BITS * 2);
    }

    #[test]
    fn test_preamble_found_after_noise() {
        let mut bits = vec![false; 1000];
        bits.extend(preamble(PREAMBLE_BITS));
        let mut sync = synchronizer();
        sync.push_bits(&bits);
        assert_eq!(sync.state(), DecoderState::SearchingSync);
    }

    #[test]
    fn test_sync_search_slides_one_bit() {
        let mut sync = synchronizer();
        sync.push_bits(&preamble(PREAMBLE_BITS));

        // garbage that does not form the sync word
        sync.push_bits(&[true, true, false, true, true, false, false]);
        assert_eq!(sync.state(), DecoderState::SearchingSync);
        sync.push_bits(&word_bits(SYNC_WORD));
        assert_eq!(sync.state(), DecoderState::ReceivingBatch);
        assert_eq!(sync.stats.syncs_detected, 1);
    }

    #[test]
    fn test_decodes_hi_message() {
        let words = alpha_codewords("HI");
        let batch = batch_with(&[(0, address_codeword(0x1F00F, 1)), (1, words[0].0)]);

        let mut sync = synchronizer();
        let messages = sync.push_bits(&transmission(&[batch]));

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].address, format!("{:07}", 0x1F00F << 3));
        assert_eq!(messages[0].function, FunctionCode::Text1);
        assert_eq!(messages[0].text, "HI");
    }

    #[test]
    fn test_state_after_every_batch_is_searching_sync() {
        let batch = batch_with(&[(2, address_codeword(9, 0)), (3, message_codeword(0x99999))]);
        let bits = transmission(&[batch, batch, batch]);
        let first_batch_end = PREAMBLE_BITS + 17 * CODEWORD_BITS;

        let mut sync = synchronizer();
        let mut total = 0;
        for (i, &bit) in bits.iter().enumerate() {
            total += sync.push_bit(bit).len();
            let consumed = i + 1;
            if consumed >= first_batch_end && (consumed - PREAMBLE_BITS) % (17 * CODEWORD_BITS) == 0 {
                assert_eq!(sync.state(), DecoderState::SearchingSync, "after bit {}", consumed);
            }
        }

        assert_eq!(total, 3);
        assert_eq!(sync.stats.decode.batches, 3);
        assert_eq!(sync.stats.preambles_detected, 1);
    }

    #[test]
    fn test_corrupted_codeword_in_stream_is_corrected() {
        let batch = batch_with(&[
            (0, address_codeword(77, 0) ^ (1 << 17)),
            (1, message_codeword(0x12345) ^ (1 << 3)),
        ]);

        let mut sync = synchronizer();
        let messages = sync.push_bits(&transmission(&[batch]));

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "12345");
        assert_eq!(sync.stats.decode.corrected_codewords, 2);
    }

    #[test]
    fn test_slicer_recovers_bits_from_samples() {
        let words = alpha_codewords("OK");
        let batch = batch_with(&[(0, address_codeword(321, 2)), (1, words[0].0)]);
        let bits = transmission(&[batch]);

        let config = SlicerConfig::default();
        let samples: Vec<f32> = bits
            .iter()
            .flat_map(|&bit| {
                let level = if bit { 0.8 } else { 0.0 };
                std::iter::repeat(level).take(config.samples_per_bit())
            })
            .collect();

        let mut sync = BitSynchronizer::new(config);
        let mut messages = Vec::new();
        for block in samples.chunks(1000) {
            messages.extend(sync.process_samples(block));
        }

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "OK");
        assert_eq!(sync.stats.samples_processed, samples.len() as u64);
    }

    #[test]
    fn test_threshold_tracks_signal_level() {
        let mut sync = synchronizer();
        sync.process_samples(&vec![1.0; 2000]);
        let loud = sync.threshold();
        sync.process_samples(&vec![0.1; 2000]);
        let quiet = sync.threshold();
        assert!(loud > 0.45 && loud < 0.51);
        assert!(quiet < 0.06);
    }
}
