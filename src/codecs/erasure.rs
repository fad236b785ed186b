//! Precision-aware erasure codec
//!
//! Most real-world doubles are decimal values: a reading of `3.14` only
//! carries three significant digits, yet its binary mantissa is 52 bits
//! of mostly-redundant noise. This codec zeroes the redundant low
//! mantissa bits before handing the pattern to the XOR engine, which then
//! sees far longer trailing-zero runs. The erasure is exactly invertible:
//! given the significant-digit count (`beta*`), rounding the truncated
//! value up at the known decimal precision reproduces the original bit
//! pattern.
//!
//! # Per-value control prefix
//!
//! - `0`: erased value, same `beta*` as the previous erased value
//! - `10`: pattern passed through unmodified (zero, infinities, NaN, or
//!   values where erasure would not pay off)
//! - `11` + 4-bit `beta*`: erased value announcing a new `beta*`
//!
//! The control bits are interleaved into the same bit stream the inner
//! XOR engine writes to, and the close sequence emits one final `10`
//! cycle so the inner engine's sentinel also terminates the outer layer.
//!
//! # Reference
//!
//! Li et al., "Elf: Erasing-based Lossless Floating-Point Compression",
//! VLDB 2023.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::xor64::{Xor64Decoder, Xor64Encoder};
use super::{CodecId, CodecStats, FloatCodec, DATA_NAN};
use crate::decimal::{
    alpha_and_beta_star, f_alpha, get_sp, pow10_neg, round_up, BETA_UNSET,
};
use crate::error::CodecError;

/// Streaming encoder: erasure classification over an inner XOR engine.
pub struct ErasureEncoder {
    xor: Xor64Encoder,
    last_beta_star: i32,
    size_bits: usize,
}

impl ErasureEncoder {
    /// Create an encoder for a fresh block
    pub fn new() -> Self {
        Self {
            xor: Xor64Encoder::new(),
            last_beta_star: BETA_UNSET,
            size_bits: 0,
        }
    }

    /// Append one double to the block
    pub fn add_value(&mut self, value: f64) {
        let bits = value.to_bits();
        let pattern = if value == 0.0 || value.is_infinite() {
            self.write_control(0b10, 2);
            bits
        } else if value.is_nan() {
            self.write_control(0b10, 2);
            DATA_NAN
        } else {
            match self.erase(value, bits) {
                Some(erased) => erased,
                None => {
                    self.write_control(0b10, 2);
                    bits
                }
            }
        };
        self.size_bits += self.xor.add_bits(pattern);
    }

    /// Total encoded size so far, in bits
    pub fn size_bits(&self) -> usize {
        self.size_bits
    }

    /// Terminate the block: one final pass-through control cycle, then
    /// close the inner XOR stream.
    pub fn close(mut self) -> Vec<u8> {
        self.write_control(0b10, 2);
        self.xor.close()
    }

    /// Try to zero the redundant low mantissa bits of `value`.
    ///
    /// Writes the matching control prefix and returns the erased pattern
    /// when erasure pays off; returns `None` (and writes nothing) when
    /// the value must pass through unmodified.
    fn erase(&mut self, value: f64, bits: u64) -> Option<u64> {
        let (alpha, beta_star) = alpha_and_beta_star(value, self.last_beta_star);
        // alpha < 0 means there are no fractional decimal places to
        // exploit; beta_star must fit its 4-bit field.
        if alpha < 0 || beta_star >= 16 {
            return None;
        }
        let exponent = ((bits >> 52) & 0x7FF) as i32;
        let erase_bits = 52 - (f_alpha(alpha) + exponent - 1023);
        if erase_bits <= 4 || erase_bits >= 64 {
            return None;
        }
        let mask = u64::MAX << erase_bits;
        if bits & !mask == 0 {
            // Low bits already zero, nothing to gain.
            return None;
        }
        if beta_star == self.last_beta_star {
            self.write_control(0b0, 1);
        } else {
            self.write_control(0b11_0000 | beta_star as u64, 6);
            self.last_beta_star = beta_star;
        }
        Some(bits & mask)
    }

    fn write_control(&mut self, bits: u64, len: u32) {
        self.xor.writer().write_bits(bits, len);
        self.size_bits += len as usize;
    }
}

impl Default for ErasureEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming decoder over a finished erasure block.
pub struct ErasureDecoder<'a> {
    xor: Xor64Decoder<'a>,
    last_beta_star: i32,
    done: bool,
}

impl<'a> ErasureDecoder<'a> {
    /// Create a decoder positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            xor: Xor64Decoder::new(data),
            last_beta_star: BETA_UNSET,
            done: false,
        }
    }

    /// Decode the next double; `None` once the block terminator is seen.
    pub fn next_value(&mut self) -> Result<Option<f64>, CodecError> {
        if self.done {
            return Ok(None);
        }
        if !self.xor.reader().read_bit()? {
            // control 0: erased, beta* carried over
            self.recover()
        } else if !self.xor.reader().read_bit()? {
            // control 10: pattern passed through unmodified
            match self.xor.next_bits()? {
                Some(bits) => Ok(Some(f64::from_bits(bits))),
                None => {
                    self.done = true;
                    Ok(None)
                }
            }
        } else {
            // control 11: erased with a new beta*
            self.last_beta_star = self.xor.reader().read_bits(4)? as i32;
            self.recover()
        }
    }

    /// Read the erased pattern from the XOR engine and reconstruct the
    /// exact decimal value it stood for.
    fn recover(&mut self) -> Result<Option<f64>, CodecError> {
        let pattern = match self.xor.next_bits()? {
            Some(bits) => bits,
            None => {
                self.done = true;
                return Ok(None);
            }
        };
        let v_prime = f64::from_bits(pattern);
        if !v_prime.is_finite() || v_prime == 0.0 {
            return Err(CodecError::MalformedBlock(
                "erased pattern is not a finite nonzero value".to_string(),
            ));
        }
        if self.last_beta_star == BETA_UNSET {
            return Err(CodecError::MalformedBlock(
                "erased value before any significant-digit announcement".to_string(),
            ));
        }
        let sp = get_sp(v_prime.abs());
        if self.last_beta_star == 0 {
            // Exact power of ten; only the digit position survives.
            if sp >= 0 {
                return Err(CodecError::MalformedBlock(format!(
                    "power-of-ten recovery with non-negative digit position {}",
                    sp
                )));
            }
            let magnitude = pow10_neg(-sp - 1);
            Ok(Some(if v_prime < 0.0 { -magnitude } else { magnitude }))
        } else {
            let alpha = self.last_beta_star - sp - 1;
            if alpha < 0 {
                return Err(CodecError::MalformedBlock(format!(
                    "negative decimal scale {} during recovery",
                    alpha
                )));
            }
            Ok(Some(round_up(v_prime, alpha)))
        }
    }
}

/// Block-level interface over [`ErasureEncoder`] / [`ErasureDecoder`].
pub struct ErasureCodec {
    stats: Arc<Mutex<CodecStats>>,
}

impl ErasureCodec {
    /// Create a new codec instance
    pub fn new() -> Self {
        Self {
            stats: Arc::new(Mutex::new(CodecStats::default())),
        }
    }
}

impl Default for ErasureCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FloatCodec for ErasureCodec {
    fn id(&self) -> CodecId {
        CodecId::Erasure
    }

    fn compress(&self, values: &[f64]) -> Vec<u8> {
        if values.is_empty() {
            return Vec::new();
        }
        let mut encoder = ErasureEncoder::new();
        for &value in values {
            encoder.add_value(value);
        }
        let block = encoder.close();
        self.stats
            .lock()
            .record_compressed(values.len() * 8, block.len());
        debug!(
            codec = "erasure",
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
        let mut decoder = ErasureDecoder::new(data);
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
