//! Link error types.

use spinel_wire::WireError;
use thiserror::Error;

/// Errors reported by the NCP link.
///
/// Only [`LinkError::Corrupt`] and [`LinkError::Timeout`] feed the
/// recovery state machine; everything else is surfaced to the caller
/// without side effects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// No matching reply arrived within the response deadline.
    #[error("timed out waiting for NCP response")]
    Timeout,

    /// A reply matched the transaction ID but not the expected command
    /// and property; the NCP rejected the operation. Carries the
    /// last-status value when one was reported.
    #[error("NCP rejected operation (last status {0})")]
    Failed(u32),

    /// The frame decoder detected a malformed frame. The condition is
    /// sticky until recovery resets the framing layer.
    #[error("serial frame corruption: {0}")]
    Corrupt(WireError),

    /// A reply arrived but its payload did not parse as expected.
    #[error("failed to parse NCP reply: {0}")]
    Parse(WireError),

    /// The message ring could not supply a buffer within the bounded
    /// wait; the caller must drop the datagram.
    #[error("out of message buffers")]
    NoBuffers,

    /// The outgoing packet queue is full.
    #[error("outgoing packet queue full")]
    QueueFull,

    /// The receive FIFO overflowed; bytes were dropped at the interrupt
    /// boundary.
    #[error("receive FIFO overflow")]
    FifoOverflow,

    /// The serial transmitter made no progress within its deadline.
    #[error("serial transmitter stalled")]
    Busy,

    /// The operation is not permitted in the current module state
    /// (uninitialized, recovering, or asleep).
    #[error("link is not in a usable state")]
    InvalidState,

    /// A datagram exceeded the configured payload MTU.
    #[error("datagram exceeds MTU: {len} > {mtu}")]
    TooLarge {
        /// Datagram length submitted.
        len: usize,
        /// Configured payload MTU.
        mtu: usize,
    },
}

impl From<WireError> for LinkError {
    fn from(err: WireError) -> Self {
        LinkError::Parse(err)
    }
}
