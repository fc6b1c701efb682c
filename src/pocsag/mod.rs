//! POCSAG codeword correction and batch decoding

mod bch;
pub mod parser;
#[cfg(test)]
pub mod testutil;
mod types;

pub use parser::{decode_batch, DecodeStats};
pub use types::{Codeword, DecodedMessage, BATCH_CODEWORDS, CODEWORD_BITS, SYNC_WORD};
#[cfg(test)]
pub use types::FunctionCode;
