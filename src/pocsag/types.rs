//! POCSAG data types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Batch sync word
pub const SYNC_WORD: u32 = 0x7CD2_15D8;

/// Idle codeword, fills unused slots of a batch
pub const IDLE_CODEWORD: u32 = 0x7A89_C197;

/// Bits per codeword
pub const CODEWORD_BITS: usize = 32;

/// Codewords per batch (8 frames of 2)
pub const BATCH_CODEWORDS: usize = 16;

/// 32-bit POCSAG codeword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codeword(pub u32);

impl Codeword {
    /// Address codewords have the top bit clear
    pub fn is_address(self) -> bool {
        self.0 & 0x8000_0000 == 0
    }

    pub fn is_idle(self) -> bool {
        self.0 == IDLE_CODEWORD
    }

    /// 18-bit address field (bits 30..13)
    pub fn address_field(self) -> u32 {
        (self.0 >> 13) & 0x3_FFFF
    }

    /// 2-bit function code (bits 12..11)
    pub fn function_bits(self) -> u8 {
        ((self.0 >> 11) & 0x3) as u8
    }

    /// 20 message data bits (bits 30..11)
    pub fn data_bits(self) -> u32 {
        (self.0 >> 11) & 0xF_FFFF
    }
}

/// Function code carried by an address codeword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FunctionCode {
    Numeric,
    Text1,
    Text2,
    Text3,
}

impl FunctionCode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::Numeric,
            1 => Self::Text1,
            2 => Self::Text2,
            _ => Self::Text3,
        }
    }

    /// Type tag shown alongside the message
    pub fn tag(self) -> &'static str {
        match self {
            Self::Numeric => "NUM",
            Self::Text1 => "TXT1",
            Self::Text2 => "TXT2",
            Self::Text3 => "TXT3",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A decoded page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedMessage {
    pub timestamp: DateTime<Utc>,

    /// 21-bit address as a 7-digit decimal string
    pub address: String,

    pub function: FunctionCode,

    pub text: String,
}

impl DecodedMessage {
    pub fn new(address: u32, function: FunctionCode, text: String) -> Self {
        Self {
            timestamp: Utc::now(),
            address: format_address(address),
            function,
            text,
        }
    }
}

impl fmt::Display for DecodedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.address,
            self.function,
            self.text
        )
    }
}

/// Format a 21-bit address as 7 decimal digits
pub fn format_address(address: u32) -> String {
    format!("{:07}", address & 0x1F_FFFF)
}
