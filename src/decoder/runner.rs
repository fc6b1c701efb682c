//! Decoder runner - turns sample chunks into pages on its own thread
//!
//! Chunks arrive over a bounded crossbeam channel in acquisition order. The
//! runner exits once every sender is gone and the queue is drained, so a
//! stop never discards samples already handed over.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::device::SessionStats;
use crate::events::EventSink;
use crate::sdr::{BitSynchronizer, SampleChunk, SampleFormat, SampleTable, SlicerConfig, SyncStats};

/// Handle on the decoding thread
pub struct DecoderRunner {
    thread: JoinHandle<SyncStats>,
}

impl DecoderRunner {
    pub fn spawn(
        chunk_rx: Receiver<SampleChunk>,
        format: SampleFormat,
        slicer: SlicerConfig,
        events: EventSink,
        stats: Arc<SessionStats>,
    ) -> Result<Self> {
        info!(
            "Starting decoder: {:?} samples, {} Hz, {} baud ({} samples/bit)",
            format,
            slicer.sample_rate,
            slicer.baud_rate,
            slicer.samples_per_bit()
        );

        let thread = thread::Builder::new()
            .name("pocsag-decoder".to_string())
            .spawn(move || {
                run_decoder(
                    chunk_rx,
                    SampleTable::new(format),
                    BitSynchronizer::new(slicer),
                    events,
                    stats,
                )
            })
            .context("Failed to spawn decoder thread")?;

        Ok(Self { thread })
    }

    /// Wait for the queue to drain and return the final counters
    pub fn join(self) -> Option<SyncStats> {
        match self.thread.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                warn!("Decoder thread panicked");
                None
            }
        }
    }
}

fn run_decoder(
    chunk_rx: Receiver<SampleChunk>,
    table: SampleTable,
    mut sync: BitSynchronizer,
    events: EventSink,
    stats: Arc<SessionStats>,
) -> SyncStats {
    let bytes_per_sample = table.format().bytes_per_sample();
    // a multi-byte sample may straddle two reads
    let mut pending: Vec<u8> = Vec::new();
    let mut samples: Vec<f32> = Vec::new();
    let mut chunks = 0u64;
    let mut first_message = true;

    for chunk in chunk_rx.iter() {
        if chunk.is_empty() {
            continue;
        }
        chunks += 1;
        pending.extend_from_slice(&chunk.bytes);
        let usable = pending.len() - pending.len() % bytes_per_sample;

        samples.clear();
        table.convert(&pending[..usable], &mut samples);
        pending.drain(..usable);

        let before = sync.stats;
        let messages = sync.process_samples(&samples);

        if sync.stats.preambles_detected > before.preambles_detected {
            events.debug(format!(
                "Preamble detected ({} so far)",
                sync.stats.preambles_detected
            ));
        }
        let dropped = sync.stats.decode.uncorrectable_codewords
            - before.decode.uncorrectable_codewords;
        if dropped > 0 {
            debug!("{} uncorrectable codewords dropped", dropped);
        }

        for message in messages {
            if first_message {
                first_message = false;
                events.info("First page decoded! Decoder is working.");
            }
            events.message(message);
        }

        stats.update_decoder(chunks, &sync.stats);
    }

    info!(
        "Decoder stopped. Chunks: {}, Batches: {}, Messages: {}",
        chunks, sync.stats.decode.batches, sync.stats.decode.messages
    );
    sync.stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pocsag::testutil::{address_codeword, alpha_codewords, batch_with, transmission};
    use crate::pocsag::FunctionCode;
    use crossbeam_channel::bounded;

    /// Bits rendered as offset-binary bytes, full scale
    fn u8_samples(bits: &[bool], samples_per_bit: usize) -> Vec<u8> {
        bits.iter()
            .flat_map(|&bit| std::iter::repeat(if bit { 255 } else { 0 }).take(samples_per_bit))
            .collect()
    }

    #[test]
    fn test_decodes_pages_from_chunks() {
        let words = alpha_codewords("HI");
        let batch = batch_with(&[(0, address_codeword(0x1F00F, 1)), (1, words[0].0)]);
        let slicer = SlicerConfig::default();
        let bytes = u8_samples(&transmission(&[batch, batch]), slicer.samples_per_bit());

        let (tx, rx) = bounded(4);
        let (sink, mut stream) = EventSink::channel();
        let stats = SessionStats::new();
        let runner =
            DecoderRunner::spawn(rx, SampleFormat::U8Offset, slicer, sink, stats.clone()).unwrap();

        for chunk in bytes.chunks(16384) {
            tx.send(SampleChunk {
                bytes: chunk.to_vec(),
            })
            .unwrap();
        }
        drop(tx);
        let final_stats = runner.join().unwrap();

        let messages = stream.drain_messages();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.text == "HI"));
        assert_eq!(messages[0].function, FunctionCode::Text1);
        assert_eq!(final_stats.decode.batches, 2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_decoded, 2);
        assert_eq!(snapshot.preambles_detected, 1);
        assert_eq!(snapshot.samples_processed, bytes.len() as u64);
    }

    #[test]
    fn test_sixteen_bit_samples_split_across_chunks() {
        let words = alpha_codewords("OK");
        let batch = batch_with(&[(4, address_codeword(42, 3)), (5, words[0].0)]);
        let slicer = SlicerConfig::default();
        let bits = transmission(&[batch]);
        let bytes: Vec<u8> = bits
            .iter()
            .flat_map(|&bit| {
                let level: i16 = if bit { 16000 } else { -16000 };
                std::iter::repeat(level.to_le_bytes())
                    .take(slicer.samples_per_bit())
                    .flatten()
            })
            .collect();

        let (tx, rx) = bounded(4);
        let (sink, mut stream) = EventSink::channel();
        let runner =
            DecoderRunner::spawn(rx, SampleFormat::I16Le, slicer, sink, SessionStats::new())
                .unwrap();

        // odd chunk size splits samples between reads
        for chunk in bytes.chunks(1001) {
            tx.send(SampleChunk {
                bytes: chunk.to_vec(),
            })
            .unwrap();
        }
        drop(tx);
        let final_stats = runner.join().unwrap();

        let messages = stream.drain_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "OK");
        assert_eq!(final_stats.samples_processed, (bytes.len() / 2) as u64);
    }

    #[test]
    fn test_exits_when_sender_dropped() {
        let (tx, rx) = bounded::<SampleChunk>(1);
        let (sink, _stream) = EventSink::channel();
        let runner = DecoderRunner::spawn(
            rx,
            SampleFormat::I8,
            SlicerConfig::default(),
            sink,
            SessionStats::new(),
        )
        .unwrap();
        drop(tx);
        let final_stats = runner.join().unwrap();
        assert_eq!(final_stats.samples_processed, 0);
    }
}
