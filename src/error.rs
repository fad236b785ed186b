//! Error types for the codec family

use thiserror::Error;

/// Errors surfaced while decoding a compressed block.
///
/// Encoding has no runtime failure modes: contract violations (such as
/// asking the bit writer for more than 64 bits at once) are debug
/// assertions, and precision-search overflow in the erasure codec is
/// handled by capping, not by failing.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The bit buffer was exhausted before the block's terminating
    /// sentinel was reached. Blocks are self-terminating, so hitting the
    /// end of the buffer mid-decode means the block is truncated.
    #[error("unexpected end of stream")]
    EndOfStream,

    /// A decoded control or flag field is outside its defined range,
    /// e.g. a trailing-zero count above 64 or a window announcement that
    /// does not fit in 64 bits.
    #[error("malformed block: {0}")]
    MalformedBlock(String),
}

/// Result type alias for decode operations
pub type Result<T> = std::result::Result<T, CodecError>;
