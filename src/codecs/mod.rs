//! Codec trait and the three codec implementations
//!
//! All three codecs share one idea: encode the XOR difference between a
//! value and a reference value as a variable-length field keyed on its
//! leading/trailing zero runs. They differ in how the reference is chosen
//! and whether the value is preprocessed:
//!
//! - [`Xor64Codec`]: reference is always the previous value
//! - [`ErasureCodec`]: zeroes redundant mantissa bits (exactly invertible
//!   given the value's decimal precision) before the XOR step
//! - [`ChimpCodec`]: picks the best reference from a bounded history
//!   window via a hash-indexed lookup table
//!
//! Each block is self-terminating: the encoder pushes a reserved NaN
//! sentinel through the normal encoding path, and the decoder stops when
//! it reconstructs that pattern. The wire format is not self-describing;
//! the caller records which codec produced a block (see [`CodecId`]).

mod chimp;
mod erasure;
mod xor64;

pub use chimp::{ChimpCodec, ChimpDecoder, ChimpEncoder};
pub use erasure::{ErasureCodec, ErasureDecoder, ErasureEncoder};
pub use xor64::{Xor64Codec, Xor64Decoder, Xor64Encoder};

use serde::{Deserialize, Serialize};

/// Bit pattern that terminates every block: the quiet NaN
/// `0x7FF8000000000000` pushed through the normal encoding path.
pub(crate) const END_OF_STREAM: u64 = 0x7FF8_0000_0000_0000;

/// Substitute pattern for NaN data values.
///
/// Every NaN payload is canonicalized to this pattern on encode so the
/// reserved terminator above can never appear as data. Decoded NaNs
/// therefore compare as "is NaN", not bit-for-bit.
pub(crate) const DATA_NAN: u64 = 0x7FF8_0000_0000_0001;

/// Rounds a raw leading-zero count down to the nearest member of the
/// canonical set {0, 8, 12, 16, 18, 20, 22, 24}; counts >= 24 clamp to 24.
pub(crate) const LEADING_ROUND: [u32; 65] = [
    0, 0, 0, 0, 0, 0, 0, 0, //
    8, 8, 8, 8, 12, 12, 12, 12, //
    16, 16, 18, 18, 20, 20, 22, 22, //
    24, 24, 24, 24, 24, 24, 24, 24, //
    24, 24, 24, 24, 24, 24, 24, 24, //
    24, 24, 24, 24, 24, 24, 24, 24, //
    24, 24, 24, 24, 24, 24, 24, 24, //
    24, 24, 24, 24, 24, 24, 24, 24, 24,
];

/// 3-bit index of a canonical leading-zero count, indexed by raw count
pub(crate) const LEADING_REPRESENTATION: [u64; 65] = [
    0, 0, 0, 0, 0, 0, 0, 0, //
    1, 1, 1, 1, 2, 2, 2, 2, //
    3, 3, 4, 4, 5, 5, 6, 6, //
    7, 7, 7, 7, 7, 7, 7, 7, //
    7, 7, 7, 7, 7, 7, 7, 7, //
    7, 7, 7, 7, 7, 7, 7, 7, //
    7, 7, 7, 7, 7, 7, 7, 7, //
    7, 7, 7, 7, 7, 7, 7, 7, 7,
];

/// Canonical leading-zero count for each 3-bit index
pub(crate) const LEADING_DECODE: [u32; 8] = [0, 8, 12, 16, 18, 20, 22, 24];

/// Codec identifier, recorded by callers next to each compressed block.
///
/// Blocks carry no self-describing header; a block must be decompressed
/// by the codec variant that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CodecId {
    /// XOR against the previous value
    Xor64 = 0,
    /// Precision-aware erasure over the XOR engine
    Erasure = 1,
    /// XOR against the best match in a bounded history window
    Chimp = 2,
}

impl CodecId {
    /// Convert a stored byte back to a codec id
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(CodecId::Xor64),
            1 => Some(CodecId::Erasure),
            2 => Some(CodecId::Chimp),
            _ => None,
        }
    }

    /// Short codec name for logs and headers
    pub fn name(&self) -> &'static str {
        match self {
            CodecId::Xor64 => "xor64",
            CodecId::Erasure => "erasure",
            CodecId::Chimp => "chimp",
        }
    }
}

/// Running statistics for one codec instance
#[derive(Clone, Debug, Default)]
pub struct CodecStats {
    /// Number of blocks compressed
    pub blocks_compressed: u64,
    /// Number of blocks decompressed
    pub blocks_decompressed: u64,
    /// Average compression ratio (input bytes / output bytes)
    pub average_ratio: f64,
}

impl CodecStats {
    pub(crate) fn record_compressed(&mut self, input_bytes: usize, output_bytes: usize) {
        self.blocks_compressed += 1;
        let ratio = input_bytes as f64 / output_bytes.max(1) as f64;
        self.average_ratio = if self.blocks_compressed == 1 {
            ratio
        } else {
            (self.average_ratio * (self.blocks_compressed - 1) as f64 + ratio)
                / self.blocks_compressed as f64
        };
    }

    pub(crate) fn record_decompressed(&mut self) {
        self.blocks_decompressed += 1;
    }
}

/// Trait implemented by all codecs in the family.
///
/// Implementations are thread-safe (`Send + Sync`); each compress or
/// decompress call owns its bit buffer and codec state exclusively, so
/// concurrency happens at the granularity of independent blocks.
pub trait FloatCodec: Send + Sync {
    /// Unique identifier for this codec
    fn id(&self) -> CodecId;

    /// Compress a sequence of doubles into a self-terminating block.
    ///
    /// An empty input produces an empty block. There is no particular
    /// byte-length relationship between input and output.
    fn compress(&self, values: &[f64]) -> Vec<u8>;

    /// Decompress a block produced by the matching compressor.
    ///
    /// Consumes the block up to its internal sentinel; padding beyond it
    /// is ignored. An empty slice yields an empty sequence.
    fn decompress(&self, data: &[u8]) -> Result<Vec<f64>, crate::error::CodecError>;

    /// Snapshot of this codec's running statistics
    fn stats(&self) -> CodecStats;

    /// Short codec name
    fn name(&self) -> &'static str {
        self.id().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_id_from_byte() {
        assert_eq!(CodecId::from_byte(0), Some(CodecId::Xor64));
        assert_eq!(CodecId::from_byte(1), Some(CodecId::Erasure));
        assert_eq!(CodecId::from_byte(2), Some(CodecId::Chimp));
        assert_eq!(CodecId::from_byte(100), None);
    }

    #[test]
    fn test_codec_id_name() {
        assert_eq!(CodecId::Xor64.name(), "xor64");
        assert_eq!(CodecId::Erasure.name(), "erasure");
        assert_eq!(CodecId::Chimp.name(), "chimp");
    }

    #[test]
    fn test_leading_tables_are_consistent() {
        for raw in 0..=64usize {
            let rounded = LEADING_ROUND[raw];
            let index = LEADING_REPRESENTATION[raw] as usize;
            assert_eq!(LEADING_DECODE[index], rounded);
            assert!(rounded as usize <= raw);
        }
    }
}
