//! State shared between the link owner and other contexts.
//!
//! Exactly one execution context (the link owner) drives the serial
//! link, decoder, transaction engine, and transmit pump. Everything
//! producers and the interrupt source touch lives here, reachable only
//! through lock-free primitives or its own lock.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::config::LinkConfig;
use crate::event::DeviceRole;
use crate::fifo::RxFifo;
use crate::message::MessageRing;
use crate::queue::OutgoingQueue;
use crate::security::SecurityState;
use crate::signal::WakeFlag;

/// Cross-context link state.
pub(crate) struct Shared {
    /// Interrupt-to-owner byte ring.
    pub(crate) fifo: RxFifo,
    /// Transmit message ring allocator.
    pub(crate) ring: MessageRing,
    /// Outgoing datagram queue.
    pub(crate) queue: Mutex<OutgoingQueue>,
    /// Outgoing security policy state.
    pub(crate) security: SecurityState,
    /// Deduplicated transmit pump wake.
    pub(crate) pump_wake: WakeFlag,
    /// Pauses the pump without discarding queued datagrams.
    pub(crate) stall: AtomicBool,
    /// Sticky decode failure; bytes are dropped at the interrupt
    /// boundary until recovery clears it.
    pub(crate) decode_failed: AtomicBool,
    /// Cross-context request to run NCP recovery.
    pub(crate) recovery_requested: AtomicBool,
    /// The receive interrupt is currently gated for backpressure.
    pub(crate) rx_gated: AtomicBool,
    /// Cached device role from the most recent role update.
    pub(crate) device_role: AtomicU8,
}

impl Shared {
    pub(crate) fn new(config: &LinkConfig) -> Self {
        Shared {
            fifo: RxFifo::new(config.rx_fifo_capacity),
            ring: MessageRing::new(config.ring_capacity),
            queue: Mutex::new(OutgoingQueue::new(config.queue_depth)),
            security: SecurityState::new(),
            pump_wake: WakeFlag::new(),
            stall: AtomicBool::new(false),
            decode_failed: AtomicBool::new(false),
            recovery_requested: AtomicBool::new(false),
            rx_gated: AtomicBool::new(false),
            device_role: AtomicU8::new(DeviceRole::Detached.to_wire()),
        }
    }

    pub(crate) fn cached_role(&self) -> DeviceRole {
        DeviceRole::from_wire(self.device_role.load(Ordering::Acquire))
    }

    pub(crate) fn cache_role(&self, role: DeviceRole) {
        self.device_role.store(role.to_wire(), Ordering::Release);
    }
}
