//! USB sample acquisition and POCSAG bit synchronization
//!
//! 1. Read raw sample bytes from the device's streaming endpoint
//! 2. Convert them to amplitudes for the device's sample format
//! 3. Slice bits against an adaptive threshold
//! 4. Find preamble and sync, collect 16-codeword batches

pub mod capture;
mod demod;
mod detect;

pub use capture::{CaptureConfig, CaptureHandle, SampleChunk};
pub use demod::{SampleFormat, SampleTable};
pub use detect::{BitSynchronizer, SlicerConfig, SyncStats};
#[cfg(test)]
pub use detect::PREAMBLE_BITS;
