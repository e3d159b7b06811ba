//! Wire protocol error types.

use thiserror::Error;

/// Errors that can occur while framing or packing wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Input ended before the expected field was complete.
    #[error("unexpected end of input: needed {needed} more bytes")]
    UnexpectedEnd {
        /// Additional bytes required to finish the field.
        needed: usize,
    },

    /// A received frame is shorter than the minimum valid frame.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// A received frame exceeds the decoder's buffer.
    #[error("frame too long: maximum {max} bytes")]
    FrameTooLong {
        /// Maximum supported frame length.
        max: usize,
    },

    /// The frame check sequence did not match the frame contents.
    #[error("frame check mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    FcsMismatch {
        /// Check value carried by the frame.
        expected: u16,
        /// Check value computed from the frame contents.
        actual: u16,
    },

    /// A packed varint ran past its maximum width.
    #[error("packed integer overflows 32 bits")]
    VarintOverflow,

    /// A string field held invalid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// A string field was missing its terminator.
    #[error("unterminated string field")]
    UnterminatedString,

    /// A value does not fit the field it is being packed into.
    #[error("value too large for field: {0}")]
    ValueTooLarge(usize),
}
