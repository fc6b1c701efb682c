//! Decoding worker fed by the acquisition loop

mod runner;

pub use runner::DecoderRunner;
