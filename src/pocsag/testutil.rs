//! Codeword and bit stream builders for tests

use super::bch::encode;
use super::types::{Codeword, IDLE_CODEWORD, SYNC_WORD};
use crate::sdr::PREAMBLE_BITS;

/// Address codeword for an 18-bit address field and function code
pub fn address_codeword(address_field: u32, function: u8) -> u32 {
    encode(((address_field & 0x3_FFFF) << 13) | ((function as u32 & 0x3) << 11))
}

/// Message codeword carrying 20 data bits
pub fn message_codeword(data: u32) -> u32 {
    encode(0x8000_0000 | ((data & 0xF_FFFF) << 11))
}

/// Pack text as 7-bit characters into message codewords, zero padded
pub fn alpha_codewords(text: &str) -> Vec<Codeword> {
    let mut bits: Vec<bool> = text
        .bytes()
        .flat_map(|ch| (0..7).rev().map(move |i| (ch >> i) & 1 == 1))
        .collect();
    while bits.len() % 20 != 0 {
        bits.push(false);
    }

    bits.chunks(20)
        .map(|chunk| {
            let data = chunk.iter().fold(0u32, |acc, &b| (acc << 1) | b as u32);
            Codeword(message_codeword(data))
        })
        .collect()
}

/// Alternating preamble starting with a one
pub fn preamble(len: usize) -> Vec<bool> {
    (0..len).map(|i| i % 2 == 0).collect()
}

/// Bits of a word, most significant first
pub fn word_bits(word: u32) -> Vec<bool> {
    (0..32).rev().map(|i| (word >> i) & 1 == 1).collect()
}

/// A batch of idle codewords with some slots replaced
pub fn batch_with(slots: &[(usize, u32)]) -> [u32; 16] {
    let mut batch = [IDLE_CODEWORD; 16];
    for &(index, word) in slots {
        batch[index] = word;
    }
    batch
}

/// Full transmission: preamble, then sync word and batch for each batch
pub fn transmission(batches: &[[u32; 16]]) -> Vec<bool> {
    let mut bits = preamble(PREAMBLE_BITS);
    for batch in batches {
        bits.extend(word_bits(SYNC_WORD));
        for &word in batch {
            bits.extend(word_bits(word));
        }
    }
    bits
}
