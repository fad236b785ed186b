//! History-indexed XOR codec ("Chimp")
//!
//! Instead of always XORing against the immediately previous value, this
//! codec keeps a ring buffer of the last `W` reconstructed patterns and
//! an associative index from each pattern's low bits to the most recent
//! position that produced them. A new value first probes the index: if a
//! live candidate shares enough trailing bits (more than `threshold`),
//! the XOR is taken against that historical value instead, which pays off
//! on series that oscillate between a few levels.
//!
//! Index entries are allowed to go stale; a candidate is only trusted
//! after checking `index - candidate < W`. Hash collisions on the low
//! bits are likewise harmless: a colliding candidate simply fails the
//! trailing-zero test and the codec falls back to the previous value.
//!
//! # Encoding
//!
//! With `log2w = log2(W)`, derived once per stream:
//!
//! - xor == 0: the reference slot index in `log2w + 2` bits (the top two
//!   bits are zero, doubling as the flag)
//! - history match: one `log2w + 11`-bit field packing
//!   `512*(W + slot) + 64*leadingIndex + significantBits` (its top two
//!   bits are always `01`), then the significant bits
//! - same leading-zero count as the previous window: `10`, then
//!   `64 - leadingZeros` raw bits
//! - new leading-zero count: `24 + leadingIndex` in 5 bits, then
//!   `64 - leadingZeros` raw bits
//!
//! A history match leaves `storedLeadingZeros` at the out-of-band value
//! 65 so the next value cannot silently reuse a stale window.
//!
//! # Reference
//!
//! Liakos, Papakonstantinopoulou and Kotidis, "Chimp: Efficient Lossless
//! Floating Point Compression for Time Series Databases", VLDB 2022
//! (the "Chimp128" variant).

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{
    CodecId, CodecStats, FloatCodec, DATA_NAN, END_OF_STREAM, LEADING_DECODE,
    LEADING_REPRESENTATION, LEADING_ROUND,
};
use crate::bit_stream::{BitReader, BitWriter};
use crate::error::CodecError;

/// Default history window length
pub const DEFAULT_WINDOW: usize = 128;

/// Marker forcing a fresh window announcement after a history match
const LEADING_AFTER_MATCH: u32 = 65;

/// Streaming encoder with a bounded history window.
pub struct ChimpEncoder {
    stored_leading: u32,
    stored_values: Vec<u64>,
    first: bool,
    size_bits: usize,
    window: usize,
    log2w: u32,
    threshold: u32,
    set_lsb: u64,
    /// Low-bit key -> most recent absolute position; entries may be stale
    indices: Vec<usize>,
    index: usize,
    current: usize,
    flag_zero_size: u32,
    flag_one_size: u32,
    out: BitWriter,
}

impl ChimpEncoder {
    /// Create an encoder with the default window of 128 values
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Create an encoder with a custom history length.
    ///
    /// # Panics
    ///
    /// `window` must be a power of two of at least 2; the flag widths are
    /// derived from `log2(window)` and a non-power-of-two would corrupt
    /// the stream.
    pub fn with_window(window: usize) -> Self {
        assert!(
            window.is_power_of_two() && window >= 2,
            "history window must be a power of two >= 2"
        );
        let log2w = window.trailing_zeros();
        let threshold = 6 + log2w;
        let set_lsb = (1u64 << (threshold + 1)) - 1;
        Self {
            stored_leading: u32::MAX,
            stored_values: vec![0; window],
            first: true,
            size_bits: 0,
            window,
            log2w,
            threshold,
            set_lsb,
            indices: vec![0; 1 << (threshold + 1)],
            index: 0,
            current: 0,
            flag_zero_size: log2w + 2,
            flag_one_size: log2w + 11,
            out: BitWriter::with_capacity(1024),
        }
    }

    /// Append one double to the block.
    ///
    /// NaN payloads are canonicalized to a single quiet-NaN pattern so
    /// the block terminator stays unambiguous.
    pub fn add_value(&mut self, value: f64) -> usize {
        let bits = if value.is_nan() {
            DATA_NAN
        } else {
            value.to_bits()
        };
        self.add_bits(bits)
    }

    /// Append one raw 64-bit pattern.
    ///
    /// Returns the number of bits this value occupied. The pattern
    /// `0x7FF8000000000000` is reserved as the block terminator.
    pub fn add_bits(&mut self, value: u64) -> usize {
        if self.first {
            self.write_first(value)
        } else {
            self.compress_value(value)
        }
    }

    /// Total encoded size so far, in bits
    pub fn size_bits(&self) -> usize {
        self.size_bits
    }

    /// Terminate the block: sentinel through the normal path, then flush.
    pub fn close(mut self) -> Vec<u8> {
        self.add_bits(END_OF_STREAM);
        self.out.finish()
    }

    fn write_first(&mut self, value: u64) -> usize {
        self.first = false;
        self.stored_values[self.current] = value;
        self.out.write_bits(value, 64);
        self.indices[(value & self.set_lsb) as usize] = self.index;
        self.size_bits += 64;
        64
    }

    fn compress_value(&mut self, value: u64) -> usize {
        let key = (value & self.set_lsb) as usize;
        let candidate = self.indices[key];
        let mut match_trailing = 0u32;

        // A candidate is only trusted while it is still inside the live
        // window; stale and colliding entries fall back to the previous
        // value.
        let (reference, xor) = if self.index - candidate < self.window {
            let temp = value ^ self.stored_values[candidate % self.window];
            let trailing = temp.trailing_zeros();
            if trailing > self.threshold {
                match_trailing = trailing;
                (candidate % self.window, temp)
            } else {
                let slot = self.index % self.window;
                (slot, self.stored_values[slot] ^ value)
            }
        } else {
            let slot = self.index % self.window;
            (slot, self.stored_values[slot] ^ value)
        };

        let written = if xor == 0 {
            self.out.write_bits(reference as u64, self.flag_zero_size);
            self.flag_zero_size as usize
        } else {
            let leading = LEADING_ROUND[xor.leading_zeros() as usize];
            if match_trailing > self.threshold {
                let significant = 64 - leading - match_trailing;
                let field = 512 * (self.window + reference) as u64
                    + 64 * LEADING_REPRESENTATION[leading as usize]
                    + u64::from(significant);
                self.out.write_bits(field, self.flag_one_size);
                self.out.write_bits(xor >> match_trailing, significant);
                self.stored_leading = LEADING_AFTER_MATCH;
                (self.flag_one_size + significant) as usize
            } else if leading == self.stored_leading {
                self.out.write_bits(0b10, 2);
                let significant = 64 - leading;
                self.out.write_bits(xor, significant);
                (2 + significant) as usize
            } else {
                self.stored_leading = leading;
                let significant = 64 - leading;
                self.out
                    .write_bits(24 + LEADING_REPRESENTATION[leading as usize], 5);
                self.out.write_bits(xor, significant);
                (5 + significant) as usize
            }
        };

        self.current = (self.current + 1) % self.window;
        self.stored_values[self.current] = value;
        self.index += 1;
        self.indices[key] = self.index;
        self.size_bits += written;
        written
    }
}

impl Default for ChimpEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming decoder maintaining the same ring buffer as the encoder.
pub struct ChimpDecoder<'a> {
    stored_leading: u32,
    stored_trailing: u32,
    stored_value: u64,
    stored_values: Vec<u64>,
    current: usize,
    first: bool,
    done: bool,
    window: usize,
    log2w: u32,
    initial_fill: u32,
    input: BitReader<'a>,
}

impl<'a> ChimpDecoder<'a> {
    /// Create a decoder for a block produced with the default window
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_window(data, DEFAULT_WINDOW)
    }

    /// Create a decoder for a block produced with history length `window`.
    ///
    /// # Panics
    ///
    /// Same constraint as [`ChimpEncoder::with_window`].
    pub fn with_window(data: &'a [u8], window: usize) -> Self {
        assert!(
            window.is_power_of_two() && window >= 2,
            "history window must be a power of two >= 2"
        );
        let log2w = window.trailing_zeros();
        Self {
            stored_leading: u32::MAX,
            stored_trailing: 0,
            stored_value: 0,
            stored_values: vec![0; window],
            current: 0,
            first: true,
            done: false,
            window,
            log2w,
            initial_fill: log2w + 9,
            input: BitReader::new(data),
        }
    }

    /// Decode the next double; `None` once the block terminator is seen.
    pub fn next_value(&mut self) -> Result<Option<f64>, CodecError> {
        Ok(self.next_bits()?.map(f64::from_bits))
    }

    /// Decode the next raw 64-bit pattern
    pub fn next_bits(&mut self) -> Result<Option<u64>, CodecError> {
        if self.done {
            return Ok(None);
        }
        if self.first {
            self.first = false;
            self.read_first()?;
        } else {
            self.read_next()?;
        }
        if self.done {
            Ok(None)
        } else {
            Ok(Some(self.stored_value))
        }
    }

    fn read_first(&mut self) -> Result<(), CodecError> {
        let value = self.input.read_bits(64)?;
        self.stored_value = value;
        self.stored_values[self.current] = value;
        if value == END_OF_STREAM {
            self.done = true;
        }
        Ok(())
    }

    fn read_next(&mut self) -> Result<(), CodecError> {
        match self.input.read_bits(2)? {
            0b11 => {
                // new leading-zero count
                let leading_index = self.input.read_bits(3)? as usize;
                self.stored_leading = LEADING_DECODE[leading_index];
                let value = self.input.read_bits(64 - self.stored_leading)?;
                self.accept(self.stored_value ^ value);
            }
            0b10 => {
                // same leading-zero count as the previous window
                if self.stored_leading > 64 {
                    return Err(CodecError::MalformedBlock(
                        "window reuse before any leading-zero announcement".to_string(),
                    ));
                }
                let value = self.input.read_bits(64 - self.stored_leading)?;
                self.accept(self.stored_value ^ value);
            }
            0b01 => {
                // history match with trailing-zero run
                let field = self.input.read_bits(self.initial_fill)?;
                let mut fill = self.initial_fill;
                fill -= self.log2w;
                let slot = ((field >> fill) as usize) & (self.window - 1);
                fill -= 3;
                let leading_index = ((field >> fill) & 0x7) as usize;
                self.stored_leading = LEADING_DECODE[leading_index];
                let mut significant = (field & 0x3F) as u32;
                if significant == 0 {
                    significant = 64;
                }
                if self.stored_leading + significant > 64 {
                    return Err(CodecError::MalformedBlock(format!(
                        "history match with {} leading zeros and {} significant bits",
                        self.stored_leading, significant
                    )));
                }
                self.stored_trailing = 64 - significant - self.stored_leading;
                self.stored_value = self.stored_values[slot];
                let value = self
                    .input
                    .read_bits(64 - self.stored_leading - self.stored_trailing)?;
                self.accept(self.stored_value ^ (value << self.stored_trailing));
            }
            _ => {
                // value equals the one at this history slot
                let slot = self.input.read_bits(self.log2w)? as usize;
                self.stored_value = self.stored_values[slot];
                self.push_ring(self.stored_value);
            }
        }
        Ok(())
    }

    fn accept(&mut self, value: u64) {
        if value == END_OF_STREAM {
            self.done = true;
        } else {
            self.stored_value = value;
            self.push_ring(value);
        }
    }

    fn push_ring(&mut self, value: u64) {
        self.current = (self.current + 1) % self.window;
        self.stored_values[self.current] = value;
    }
}

/// Block-level interface over [`ChimpEncoder`] / [`ChimpDecoder`].
///
/// The window length is part of the wire format: a block must be
/// decompressed with the same window it was compressed with.
pub struct ChimpCodec {
    window: usize,
    stats: Arc<Mutex<CodecStats>>,
}

impl ChimpCodec {
    /// Create a codec with the default window of 128 values
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Create a codec with a custom history length (power of two)
    pub fn with_window(window: usize) -> Self {
        assert!(
            window.is_power_of_two() && window >= 2,
            "history window must be a power of two >= 2"
        );
        Self {
            window,
            stats: Arc::new(Mutex::new(CodecStats::default())),
        }
    }
}

impl Default for ChimpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FloatCodec for ChimpCodec {
    fn id(&self) -> CodecId {
        CodecId::Chimp
    }

    fn compress(&self, values: &[f64]) -> Vec<u8> {
        if values.is_empty() {
            return Vec::new();
        }
        let mut encoder = ChimpEncoder::with_window(self.window);
        for &value in values {
            encoder.add_value(value);
        }
        let block = encoder.close();
        self.stats
            .lock()
            .record_compressed(values.len() * 8, block.len());
        debug!(
            codec = "chimp",
            window = self.window,
            values = values.len(),
            bytes = block.len(),
            "compressed block"
        );
        block
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<f64>, CodecError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let mut decoder = ChimpDecoder::with_window(data, self.window);
        let mut values = Vec::new();
        while let Some(value) = decoder.next_value()? {
            values.push(value);
        }
        self.stats.lock().record_decompressed();
        Ok(values)
    }

    fn stats(&self) -> CodecStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(values: &[f64]) -> Vec<f64> {
        let codec = ChimpCodec::new();
        let compressed = codec.compress(values);
        codec.decompress(&compressed).unwrap()
    }

    #[test]
    fn test_roundtrip_basic() {
        let values = vec![1.5, 1.5, 1.25];
        assert_eq!(roundtrip(&values), values);
    }

    #[test]
    fn test_roundtrip_single_and_empty() {
        assert_eq!(roundtrip(&[42.0]), vec![42.0]);
        let codec = ChimpCodec::new();
        assert!(codec.compress(&[]).is_empty());
        assert!(codec.decompress(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_history_match_beats_previous_value() {
        // The third value XORs against slot 0 (the earlier 5.0), not
        // against the adjacent 3.3: the distance-2 history diff is all
        // zeros, so the whole value costs one flag-zero field.
        let mut encoder = ChimpEncoder::new();
        encoder.add_value(5.0);
        encoder.add_value(3.3);
        let bits = encoder.add_value(5.0);
        assert_eq!(bits, (encoder.log2w + 2) as usize);

        assert_eq!(roundtrip(&[5.0, 3.3, 5.0]), vec![5.0, 3.3, 5.0]);
        // 3.0 collides with 5.0 on the low-bit key (both mantissas end in
        // zeros) and steals its index entry; the stream must still
        // round-trip through the fallback paths.
        assert_eq!(roundtrip(&[5.0, 3.0, 5.0]), vec![5.0, 3.0, 5.0]);
    }

    #[test]
    fn test_oscillating_series() {
        // Alternating levels are exactly what the history index is for.
        // (1.1 and 3.3 have distinct low-bit keys, so each probe finds
        // its own level two positions back.)
        let values: Vec<f64> = (0..500)
            .map(|i| if i % 2 == 0 { 1.1 } else { 3.3 })
            .collect();
        let codec = ChimpCodec::new();
        let compressed = codec.compress(&values);
        assert_eq!(codec.decompress(&compressed).unwrap(), values);
        // After the warm-up both levels sit in the window, so most values
        // cost only the flag-zero field.
        let bits_per_value = (compressed.len() * 8) as f64 / values.len() as f64;
        assert!(
            bits_per_value < 16.0,
            "expected history hits, got {:.1} bits/value",
            bits_per_value
        );
    }

    #[test]
    fn test_roundtrip_specials() {
        let values = vec![0.0, -0.0, f64::INFINITY, f64::NEG_INFINITY, 5.0e-324];
        let decoded = roundtrip(&values);
        for (orig, dec) in values.iter().zip(decoded.iter()) {
            assert_eq!(orig.to_bits(), dec.to_bits());
        }
    }

    #[test]
    fn test_roundtrip_nan() {
        let values = vec![1.0, f64::NAN, 2.0];
        let decoded = roundtrip(&values);
        assert_eq!(decoded.len(), 3);
        assert!(decoded[1].is_nan());
        assert_eq!(decoded[2], 2.0);
    }

    #[test]
    fn test_small_window() {
        let values: Vec<f64> = (0..100).map(|i| (i % 7) as f64 * 1.125).collect();
        let codec = ChimpCodec::with_window(8);
        let compressed = codec.compress(&values);
        assert_eq!(codec.decompress(&compressed).unwrap(), values);
    }

    #[test]
    fn test_window_mismatch_is_not_silently_correct() {
        // The window length is part of the wire format.
        let values: Vec<f64> = (0..50).map(|i| i as f64 * 0.3).collect();
        let compressed = ChimpCodec::with_window(128).compress(&values);
        let result = ChimpCodec::with_window(16).decompress(&compressed);
        if let Ok(decoded) = result {
            assert_ne!(decoded, values);
        }
    }

    #[test]
    fn test_slowly_drifting_series() {
        let values: Vec<f64> = (0..1000).map(|i| 100.0 + (i as f64 * 0.1).sin()).collect();
        assert_eq!(roundtrip(&values), values);
    }

    #[test]
    fn test_truncated_block_errors() {
        let codec = ChimpCodec::new();
        let compressed = codec.compress(&[1.5, 2.5, 3.5, 4.5]);
        let truncated = &compressed[..compressed.len() - 2];
        assert!(codec.decompress(truncated).is_err());
    }

    #[test]
    fn test_repeated_value_cost() {
        let mut encoder = ChimpEncoder::new();
        encoder.add_value(42.5);
        for _ in 0..10 {
            // log2w + 2 bits per repeat: the flag-zero path
            assert_eq!(encoder.add_value(42.5), 9);
        }
    }
}
