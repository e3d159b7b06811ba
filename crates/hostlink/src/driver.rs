//! Serial driver seam and interrupt-side ingress.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::shared::Shared;

/// The physical serial link and NCP reset control.
///
/// Implementations wrap a UART (or a test double). All methods are
/// called from the link-owner context; received bytes flow in through
/// [`LineIngress`] instead.
pub trait SerialDriver {
    /// Power up and configure the serial interface.
    fn enable(&mut self);

    /// Disable the serial interface. Bytes arriving while disabled are
    /// lost, which is the point: recovery quiesces the line first.
    fn disable(&mut self);

    /// Try to write one byte. Returns `false` when the transmitter has
    /// no room; the caller retries under its own deadline.
    fn try_write(&mut self, byte: u8) -> bool;

    /// Gate or open the receive interrupt.
    fn set_rx_enabled(&mut self, enabled: bool);

    /// Physically reset the NCP.
    fn hard_reset(&mut self);
}

/// Directives for the interrupt shim after pushing a byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngressStatus {
    /// The FIFO is nearing full: disable the receive interrupt until
    /// the owner re-opens it.
    pub gate_rx: bool,
    /// The byte was dropped because the FIFO was full.
    pub overflow: bool,
}

/// Interrupt-side receive path.
///
/// `push_byte` is the only entry point intended for interrupt context:
/// it never blocks, never allocates, and touches nothing but the byte
/// FIFO, the wake channel, and two atomic flags. The returned
/// [`IngressStatus`] tells the platform shim whether to gate the
/// receive interrupt; the owner re-opens it once the FIFO drains.
#[derive(Clone)]
pub struct LineIngress {
    shared: Arc<Shared>,
    notify: Sender<()>,
    near_full_threshold: usize,
}

impl LineIngress {
    pub(crate) fn new(
        shared: Arc<Shared>,
        notify: Sender<()>,
        near_full_threshold: usize,
    ) -> Self {
        LineIngress {
            shared,
            notify,
            near_full_threshold,
        }
    }

    /// Ingest one received byte.
    pub fn push_byte(&self, byte: u8) -> IngressStatus {
        // After a framing failure every byte is garbage until recovery
        // resets the decoder; drop them here so the FIFO cannot wedge.
        if self.shared.decode_failed.load(Ordering::Acquire) {
            return IngressStatus::default();
        }

        let overflow = self.shared.fifo.push(byte).is_err();

        // Full channel means a wake is already pending.
        let _ = self.notify.try_send(());

        let gate_rx = self.shared.fifo.near_full(self.near_full_threshold);
        if gate_rx {
            self.shared.rx_gated.store(true, Ordering::Release);
        }

        IngressStatus { gate_rx, overflow }
    }
}
