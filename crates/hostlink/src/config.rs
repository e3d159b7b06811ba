//! Link configuration.

use std::time::Duration;

/// Largest IP datagram the link will carry.
pub const PAYLOAD_MTU: usize = 1280;

/// Tunables for the NCP link.
///
/// The defaults mirror the values the transport has shipped with; they
/// are configuration, not protocol, and may be adjusted per product.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// How long to wait for a matching reply frame.
    pub response_timeout: Duration,
    /// How long a datagram producer waits for ring space before the
    /// send is dropped.
    pub allocator_wait: Duration,
    /// How long a single serial write may stall before failing.
    pub write_timeout: Duration,
    /// Capacity of the transmit message ring in bytes.
    pub ring_capacity: usize,
    /// Depth of the outgoing packet queue.
    pub queue_depth: usize,
    /// Capacity of the receive byte FIFO.
    pub rx_fifo_capacity: usize,
    /// Free-slot threshold at which the receive interrupt is gated.
    pub rx_near_full_threshold: usize,
    /// Attempts at the post-reset handshake before recovery gives up.
    pub reset_attempts: usize,
    /// Largest IP datagram accepted for transmission.
    pub payload_mtu: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let rx_fifo_capacity = 128;
        LinkConfig {
            response_timeout: Duration::from_millis(3000),
            allocator_wait: Duration::from_millis(2000),
            write_timeout: Duration::from_millis(3000),
            ring_capacity: 5 * PAYLOAD_MTU,
            queue_depth: 16,
            rx_fifo_capacity,
            rx_near_full_threshold: rx_fifo_capacity / 10,
            reset_attempts: 3,
            payload_mtu: PAYLOAD_MTU,
        }
    }
}
