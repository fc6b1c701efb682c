//! POCSAG batch parser

use super::bch::{self, Correction};
use super::types::{Codeword, DecodedMessage, FunctionCode};
use tracing::{debug, trace};

/// Numeric digit lookup table
const NUMERIC_CHARS: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '*', 'U', ' ', '-', ')', '(',
];

/// Counters updated while decoding batches
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStats {
    pub batches: u64,
    pub corrected_codewords: u64,
    pub uncorrectable_codewords: u64,
    pub messages: u64,
}

/// Correct one codeword, updating the counters
fn correct(raw: Codeword, stats: &mut DecodeStats) -> Option<Codeword> {
    match bch::correct(raw.0) {
        Some(Correction::Clean(cw)) => Some(Codeword(cw)),
        Some(Correction::Corrected { codeword, bit }) => {
            stats.corrected_codewords += 1;
            trace!("Corrected bit {} in codeword {:08X}", bit, raw.0);
            Some(Codeword(codeword))
        }
        None => {
            stats.uncorrectable_codewords += 1;
            debug!("Uncorrectable codeword {:08X}", raw.0);
            None
        }
    }
}

/// Decode one batch of codewords into messages.
///
/// An address codeword starts a message; the message codewords that follow it
/// up to the next address codeword (or idle word) form the payload. Message
/// codewords that fail correction are dropped from the payload.
///
/// The low three address bits come from the frame the address codeword sits
/// in rather than being left zero: address field 100 in frame 3 is `0000803`.
pub fn decode_batch(batch: &[Codeword], stats: &mut DecodeStats) -> Vec<DecodedMessage> {
    stats.batches += 1;

    let mut messages = Vec::new();
    let mut i = 0;

    while i < batch.len() {
        let raw = batch[i];
        if !raw.is_address() || raw.is_idle() {
            i += 1;
            continue;
        }

        let Some(address_cw) = correct(raw, stats) else {
            i += 1;
            continue;
        };
        // correction can move the flag bit; recheck
        if !address_cw.is_address() || address_cw.is_idle() {
            i += 1;
            continue;
        }

        let frame = (i / 2) as u32;
        let address = (address_cw.address_field() << 3) | frame;
        let function = FunctionCode::from_bits(address_cw.function_bits());

        let mut payload = Vec::new();
        let mut j = i + 1;
        while j < batch.len() && !batch[j].is_address() {
            if let Some(cw) = correct(batch[j], stats) {
                payload.push(cw);
            }
            j += 1;
        }

        if !payload.is_empty() {
            let text = decode_payload(&payload, function);
            if !text.is_empty() {
                stats.messages += 1;
                messages.push(DecodedMessage::new(address, function, text));
            }
        }

        i = j;
    }

    messages
}

/// Decode message codewords according to the function code
pub fn decode_payload(words: &[Codeword], function: FunctionCode) -> String {
    match function {
        FunctionCode::Numeric => decode_numeric(words),
        FunctionCode::Text1 | FunctionCode::Text2 | FunctionCode::Text3 => {
            decode_alphanumeric(words)
        }
    }
}

/// Decode numeric pages: five 4-bit digits per codeword
pub fn decode_numeric(words: &[Codeword]) -> String {
    let text: String = words
        .iter()
        .flat_map(|cw| {
            let data = cw.data_bits();
            (0..5).map(move |i| NUMERIC_CHARS[((data >> (16 - i * 4)) & 0xF) as usize])
        })
        .collect();

    text.trim().to_string()
}

/// Decode alphanumeric pages: 7-bit characters packed across codewords
pub fn decode_alphanumeric(words: &[Codeword]) -> String {
    let mut text = String::new();
    let mut acc: u64 = 0;
    let mut bits = 0u32;

    'words: for cw in words {
        acc = (acc << 20) | cw.data_bits() as u64;
        bits += 20;

        while bits >= 7 {
            let ch = ((acc >> (bits - 7)) & 0x7F) as u8;
            bits -= 7;

            match ch {
                0 => break 'words,
                32..=126 => text.push(ch as char),
                _ => {}
            }
        }
        acc &= (1u64 << bits) - 1;
    }

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pocsag::testutil::{address_codeword, alpha_codewords, message_codeword};
    use crate::pocsag::types::IDLE_CODEWORD;

    fn idle_batch() -> Vec<Codeword> {
        vec![Codeword(IDLE_CODEWORD); 16]
    }

    #[test]
    fn test_numeric_table_covers_all_digits() {
        let cw1 = message_codeword(0x01234);
        let cw2 = message_codeword(0x56789);
        let cw3 = message_codeword(0xABCDE);
        let cw4 = message_codeword(0xF0000);
        let text = decode_numeric(&[cw1, cw2, cw3, cw4].map(Codeword));
        assert_eq!(text, "0123456789*U -)(0000");
    }

    #[test]
    fn test_numeric_trims_padding() {
        let text = decode_numeric(&[Codeword(message_codeword(0xC12CC))]);
        assert_eq!(text, "12");
    }

    #[test]
    fn test_alphanumeric_hi() {
        let words = alpha_codewords("HI");
        assert_eq!(decode_alphanumeric(&words), "HI");
    }

    #[test]
    fn test_alphanumeric_spans_codewords() {
        let words = alpha_codewords("HELLO WORLD");
        assert!(words.len() > 1);
        assert_eq!(decode_alphanumeric(&words), "HELLO WORLD");
    }

    #[test]
    fn test_alphanumeric_stops_at_terminator() {
        // 'A', NUL, 'B' followed by padding
        let data = (0x41 << 13) | (0x42 >> 1);
        let second = ((0x42 & 1) << 19) | (0x43 << 12);
        let words = [message_codeword(data), message_codeword(second)].map(Codeword);
        assert_eq!(decode_alphanumeric(&words), "A");
    }

    #[test]
    fn test_alphanumeric_drops_unprintable() {
        // 'A', 0x07 (bell), 'B'
        let data = (0x41 << 13) | (0x07 << 6) | (0x42 >> 1);
        let second = ((0x42 & 1) << 19) | (0x43 << 12);
        let words = [message_codeword(data), message_codeword(second)].map(Codeword);
        assert_eq!(decode_alphanumeric(&words), "ABC");
    }

    #[test]
    fn test_decode_batch_alpha_message() {
        let mut batch = idle_batch();
        batch[0] = Codeword(address_codeword(0x1234, 3));
        let words = alpha_codewords("HI");
        batch[1] = words[0];

        let mut stats = DecodeStats::default();
        let messages = decode_batch(&batch, &mut stats);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].address, format!("{:07}", 0x1234 << 3));
        assert_eq!(messages[0].function, FunctionCode::Text3);
        assert_eq!(messages[0].text, "HI");
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.batches, 1);
    }

    #[test]
    fn test_decode_batch_frame_position_extends_address() {
        let mut batch = idle_batch();
        // frame 3 holds codewords 6 and 7
        batch[6] = Codeword(address_codeword(100, 0));
        batch[7] = Codeword(message_codeword(0x12345));

        let mut stats = DecodeStats::default();
        let messages = decode_batch(&batch, &mut stats);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].address, format!("{:07}", (100 << 3) | 3));
        assert_eq!(messages[0].function, FunctionCode::Numeric);
        assert_eq!(messages[0].text, "12345");
    }

    #[test]
    fn test_decode_batch_corrects_single_bit_errors() {
        let mut batch = idle_batch();
        batch[0] = Codeword(address_codeword(0x2AAAA, 1) ^ (1 << 20));
        batch[1] = Codeword(alpha_codewords("OK")[0].0 ^ (1 << 5));

        let mut stats = DecodeStats::default();
        let messages = decode_batch(&batch, &mut stats);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "OK");
        assert_eq!(stats.corrected_codewords, 2);
    }

    #[test]
    fn test_decode_batch_skips_uncorrectable_address() {
        let mut batch = idle_batch();
        batch[0] = Codeword(address_codeword(42, 1) ^ 0b110);
        batch[1] = alpha_codewords("LOST")[0];
        batch[2] = Codeword(address_codeword(43, 1));
        let kept = alpha_codewords("KEPT");
        batch[3] = kept[0];
        batch[4] = kept[1];

        let mut stats = DecodeStats::default();
        let messages = decode_batch(&batch, &mut stats);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "KEPT");
        assert_eq!(stats.uncorrectable_codewords, 1);
    }

    #[test]
    fn test_decode_batch_drops_bad_message_codeword_without_terminating() {
        let words = alpha_codewords("ABCDEFGH");
        assert!(words.len() >= 3);

        let mut batch = idle_batch();
        batch[0] = Codeword(address_codeword(7, 2));
        batch[1] = words[0];
        batch[2] = Codeword(words[1].0 ^ 0b1100_0000);
        batch[3] = words[2];

        let mut stats = DecodeStats::default();
        let messages = decode_batch(&batch, &mut stats);

        assert_eq!(messages.len(), 1);
        assert_eq!(stats.uncorrectable_codewords, 1);
        // the surviving codewords are still decoded as one payload
        let expected = decode_alphanumeric(&[words[0], words[2]]);
        assert_eq!(messages[0].text, expected);
    }

    #[test]
    fn test_address_without_payload_emits_nothing() {
        let mut batch = idle_batch();
        batch[0] = Codeword(address_codeword(5, 0));

        let mut stats = DecodeStats::default();
        assert!(decode_batch(&batch, &mut stats).is_empty());
        assert_eq!(stats.messages, 0);
    }

    #[test]
    fn test_empty_text_is_not_emitted() {
        let mut batch = idle_batch();
        batch[0] = Codeword(address_codeword(5, 0));
        // all spaces
        batch[1] = Codeword(message_codeword(0xCCCCC));

        let mut stats = DecodeStats::default();
        assert!(decode_batch(&batch, &mut stats).is_empty());
    }
}
