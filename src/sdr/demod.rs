//! Raw bulk bytes to amplitude samples
//!
//! The receivers hand us already-demodulated baseband. All that is left is to
//! turn each device's sample encoding into f32 amplitudes in [-1, 1]:
//! - RTL2832U: 8-bit unsigned, offset binary (127.5 = zero)
//! - HackRF: 8-bit signed
//! - Airspy: 16-bit signed little endian

/// Sample encoding of a device family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8Offset,
    I8,
    I16Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8Offset | SampleFormat::I8 => 1,
            SampleFormat::I16Le => 2,
        }
    }
}

/// Pre-computed lookup table for the 8-bit formats
pub struct SampleTable {
    format: SampleFormat,
    table: Vec<f32>,
}

impl SampleTable {
    pub fn new(format: SampleFormat) -> Self {
        let table = match format {
            SampleFormat::U8Offset => (0..256u32)
                .map(|b| (b as f32 - 127.5) / 127.5)
                .collect(),
            SampleFormat::I8 => (0..256u32)
                .map(|b| (b as u8 as i8) as f32 / 128.0)
                .collect(),
            SampleFormat::I16Le => Vec::new(),
        };

        Self { format, table }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Convert a buffer of raw bytes, appending to `output`.
    /// A trailing partial sample is ignored.
    pub fn convert(&self, raw: &[u8], output: &mut Vec<f32>) {
        match self.format {
            SampleFormat::U8Offset | SampleFormat::I8 => {
                output.extend(raw.iter().map(|&b| self.table[b as usize]));
            }
            SampleFormat::I16Le => {
                output.extend(
                    raw.chunks_exact(2)
                        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0),
                );
            }
        }
    }
}
