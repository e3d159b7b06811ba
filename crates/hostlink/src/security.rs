//! Outgoing-traffic security policy.
//!
//! Tracks whether outgoing datagrams must be secured and implements the
//! provisional-join exceptions: a joining device must open its TCP
//! source port as insecure before its first unsecured exchange, and a
//! device assisting a joiner keeps answering on the joiner's port
//! insecurely until a secured message arrives on that port.

use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};

/// The Thread stack is started; outgoing traffic is secured by default.
pub const SECURITY_FLAG_THREAD_STARTED: u8 = 0x01;
/// One or more insecure ports are registered on the NCP.
pub const SECURITY_FLAG_INSECURE_PORTS_ENABLED: u8 = 0x02;
/// This host opened an insecure source port for provisional join.
pub const SECURITY_FLAG_INSECURE_SOURCE_PORT: u8 = 0x04;
/// A secured message was received on the insecure port; answer securely
/// from now on.
pub const SECURITY_FLAG_SECURE_MSG_ON_INSECURE_PORT: u8 = 0x08;

const IPV6_HEADER_LEN: usize = 40;
const IPV6_NEXT_HEADER_OFFSET: usize = 6;
const IPV6_NEXT_HEADER_TCP: u8 = 6;
const TCP_SOURCE_PORT_OFFSET: usize = IPV6_HEADER_LEN;
const TCP_DEST_PORT_OFFSET: usize = IPV6_HEADER_LEN + 2;

/// Process-wide security state shared between the datagram producers
/// and the link owner.
#[derive(Debug, Default)]
pub struct SecurityState {
    flags: AtomicU8,
    insecure_source_port: AtomicU16,
}

impl SecurityState {
    /// Create state with all flags clear.
    pub fn new() -> Self {
        SecurityState {
            flags: AtomicU8::new(0),
            insecure_source_port: AtomicU16::new(0),
        }
    }

    /// Current flag bits.
    pub fn flags(&self) -> u8 {
        self.flags.load(Ordering::Acquire)
    }

    /// Set or clear a flag bit.
    pub fn set_flag(&self, flag: u8, enabled: bool) {
        if enabled {
            self.flags.fetch_or(flag, Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!flag, Ordering::AcqRel);
        }
    }

    /// Whether outgoing messages are secured by default.
    pub fn message_security_enabled(&self) -> bool {
        self.flags() & SECURITY_FLAG_THREAD_STARTED != 0
    }

    /// The source port this host registered as insecure, if any.
    pub fn insecure_source_port(&self) -> Option<u16> {
        let port = self.insecure_source_port.load(Ordering::Acquire);
        (port != 0).then_some(port)
    }

    /// Record the insecure source port selected by the host TCP stack.
    pub fn record_insecure_source_port(&self, port: u16) {
        self.insecure_source_port.store(port, Ordering::Release);
        self.set_flag(SECURITY_FLAG_INSECURE_SOURCE_PORT, true);
        log::debug!("opened insecure source port {port}");
    }

    /// Forget the insecure source port and its derived flags. Called
    /// when the last insecure port is removed from the NCP.
    pub fn clear_insecure_ports(&self) {
        self.insecure_source_port.store(0, Ordering::Release);
        self.flags.fetch_and(
            !(SECURITY_FLAG_INSECURE_PORTS_ENABLED
                | SECURITY_FLAG_INSECURE_SOURCE_PORT
                | SECURITY_FLAG_SECURE_MSG_ON_INSECURE_PORT),
            Ordering::AcqRel,
        );
    }

    /// The device is provisionally joining and has not yet opened its
    /// TCP source port; the next outgoing TCP datagram must register its
    /// source port as insecure.
    pub fn must_open_insecure_source_port(&self) -> bool {
        let flags = self.flags();
        flags & SECURITY_FLAG_THREAD_STARTED == 0
            && flags & SECURITY_FLAG_INSECURE_PORTS_ENABLED != 0
            && flags & SECURITY_FLAG_INSECURE_SOURCE_PORT == 0
    }

    /// The device is assisting a provisional joiner: replies on the
    /// insecure port go out unsecured until a secured message arrives on
    /// that port.
    pub fn answer_insecurely(&self) -> bool {
        let flags = self.flags();
        flags & SECURITY_FLAG_THREAD_STARTED != 0
            && flags & SECURITY_FLAG_INSECURE_PORTS_ENABLED != 0
            && flags & SECURITY_FLAG_SECURE_MSG_ON_INSECURE_PORT == 0
    }
}

/// Extract the TCP source port from a raw IPv6 datagram, if it carries
/// TCP directly.
pub fn tcp_source_port(datagram: &[u8]) -> Option<u16> {
    tcp_port_at(datagram, TCP_SOURCE_PORT_OFFSET)
}

/// Extract the TCP destination port from a raw IPv6 datagram, if it
/// carries TCP directly.
pub fn tcp_dest_port(datagram: &[u8]) -> Option<u16> {
    tcp_port_at(datagram, TCP_DEST_PORT_OFFSET)
}

fn tcp_port_at(datagram: &[u8], offset: usize) -> Option<u16> {
    if datagram.len() < offset + 2 {
        return None;
    }
    if datagram[IPV6_NEXT_HEADER_OFFSET] != IPV6_NEXT_HEADER_TCP {
        return None;
    }
    Some(u16::from_be_bytes([datagram[offset], datagram[offset + 1]]))
}
