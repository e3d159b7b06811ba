//! Producer-side datagram submission.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::security;
use crate::shared::Shared;

/// Handle the host network stack uses to submit outbound datagrams.
///
/// `send` stages the datagram in the transmit ring (waiting a bounded
/// time for space), applies the provisional-join security exception,
/// queues it, and wakes the pump. It is intended for a single producer
/// context; the link owner must not call it while holding a wait.
pub struct DatagramSender {
    shared: Arc<Shared>,
    notify: Sender<()>,
    allocator_wait: Duration,
    payload_mtu: usize,
}

impl DatagramSender {
    pub(crate) fn new(shared: Arc<Shared>, notify: Sender<()>, config: &LinkConfig) -> Self {
        DatagramSender {
            shared,
            notify,
            allocator_wait: config.allocator_wait,
            payload_mtu: config.payload_mtu,
        }
    }

    /// Submit one IP datagram for transmission. `legacy` routes it to
    /// the secondary legacy interface.
    ///
    /// Fails with [`LinkError::NoBuffers`] when ring space does not
    /// free up in time and with [`LinkError::QueueFull`] when the
    /// outgoing queue is full; in both cases the datagram is dropped
    /// and the caller decides whether to retry.
    pub fn send(&self, datagram: &[u8], legacy: bool) -> Result<(), LinkError> {
        if datagram.len() > self.payload_mtu {
            return Err(LinkError::TooLarge {
                len: datagram.len(),
                mtu: self.payload_mtu,
            });
        }

        let secure = self.shared.security.message_security_enabled();
        let mut message =
            self.shared
                .ring
                .allocate(secure, datagram.len(), self.allocator_wait)?;

        if let Err(err) = self.shared.ring.append(&mut message, datagram) {
            self.shared.ring.free(message);
            return Err(err);
        }

        if secure && self.shared.security.answer_insecurely() {
            // Replies to a provisional joiner on the recorded insecure
            // port go out unsecured until it turns secure on us.
            if let Some(src_port) = security::tcp_source_port(datagram) {
                if Some(src_port) == self.shared.security.insecure_source_port() {
                    message.set_secure(false);
                }
            }
        }

        message.set_legacy(legacy);

        if let Err((message, err)) = self.shared.queue.lock().enqueue(message) {
            log::error!("message queue full, dropping outgoing packet");
            self.shared.ring.free(message);
            return Err(err);
        }

        log::debug!(
            "IP TX len: {} secure: {} legacy: {}",
            datagram.len(),
            secure,
            legacy
        );

        if self.shared.pump_wake.raise() {
            let _ = self.notify.try_send(());
        }

        Ok(())
    }
}
