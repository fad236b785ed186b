//! simian - lossless XOR-family compression for IEEE-754 double time series
//!
//! This library provides a family of codecs that compress sequences of
//! doubles by exploiting bit-level similarity between consecutive or
//! historically-similar values:
//!
//! - **xor64**: XOR against the previous value, with the nonzero span of
//!   the difference stored as a variable-length field keyed on its
//!   leading/trailing zero runs
//! - **erasure**: zeroes mantissa bits that are redundant given a value's
//!   decimal precision (exactly invertible), then feeds the XOR engine
//! - **chimp**: XOR against the best match among the last 128 values,
//!   found through a hash-indexed history table
//!
//! All three share one MSB-first bit-stream protocol and produce
//! self-terminating blocks: compression appends a reserved NaN sentinel,
//! and decompression consumes the block until it reconstructs it.
//!
//! # Example
//!
//! ```rust
//! use simian::{ErasureCodec, FloatCodec};
//!
//! let codec = ErasureCodec::new();
//! let values = vec![42.54, 42.55, 42.55, 42.61];
//!
//! let block = codec.compress(&values);
//! let decoded = codec.decompress(&block)?;
//! assert_eq!(decoded, values);
//! # Ok::<(), simian::CodecError>(())
//! ```
//!
//! Codecs are stateful per block and synchronous; parallelism happens at
//! the granularity of independent blocks. The wire format is not
//! self-describing: callers record which codec produced a block (see
//! [`CodecId`]) and hand it back to the same variant.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bit_stream;
pub mod codecs;
mod decimal;
pub mod error;

pub use codecs::{
    ChimpCodec, ChimpDecoder, ChimpEncoder, CodecId, CodecStats, ErasureCodec, ErasureDecoder,
    ErasureEncoder, FloatCodec, Xor64Codec, Xor64Decoder, Xor64Encoder,
};
pub use error::{CodecError, Result};
