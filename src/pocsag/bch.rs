//! BCH(31,21) syndrome and single-bit correction for POCSAG codewords
//!
//! Codeword layout (bit 31 = MSB):
//! - bits 31..11: 21 information bits
//! - bits 10..1: 10 BCH check bits
//! - bit 0: even parity over the whole word

/// Generator polynomial x^10 + x^9 + x^8 + x^6 + x^5 + x^3 + 1
const BCH_POLY: u32 = 0x769;

/// Remainder of the upper 31 bits divided by the generator over GF(2)
fn poly_remainder(word: u32) -> u32 {
    let mut data = word >> 1;
    for i in (10..31).rev() {
        if data & (1 << i) != 0 {
            data ^= BCH_POLY << (i - 10);
        }
    }
    data & 0x3FF
}

/// Compute the syndrome of a codeword.
///
/// The low bit holds the parity check, the upper ten bits the polynomial
/// remainder. Zero means the word is valid as received.
pub fn syndrome(codeword: u32) -> u32 {
    (poly_remainder(codeword) << 1) | (codeword.count_ones() & 1)
}

/// Result of running correction over one codeword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Syndrome was zero
    Clean(u32),
    /// A single flipped bit was repaired
    Corrected { codeword: u32, bit: u8 },
}

/// Check a codeword and try every single-bit flip if it is damaged.
///
/// Returns `None` when no flip yields a zero syndrome.
pub fn correct(codeword: u32) -> Option<Correction> {
    if syndrome(codeword) == 0 {
        return Some(Correction::Clean(codeword));
    }

    (0..32u8)
        .map(|bit| (bit, codeword ^ (1 << bit)))
        .find(|&(_, candidate)| syndrome(candidate) == 0)
        .map(|(bit, codeword)| Correction::Corrected { codeword, bit })
}

/// Fill in check and parity bits for the 21 information bits of `word`
#[cfg(test)]
pub fn encode(word: u32) -> u32 {
    let info = word & 0xFFFF_F800;
    let check = poly_remainder(info);
    let body = info | (check << 1);
    body | (body.count_ones() & 1)
}
