//! Host-side serial transport for a Thread NCP
//!
//! This crate lets a host processor drive a Thread/6LoWPAN mesh stack
//! running on a network co-processor (NCP) reached over one
//! asynchronous serial link. It provides:
//!
//! - property get/set RPCs with transaction correlation and bounded
//!   waits ([`Link`]),
//! - outbound datagram staging and pumping under flow control
//!   ([`DatagramSender`] and the transmit pump),
//! - survival of NCP crashes and framing corruption via a recovery
//!   state machine,
//! - the provisional-join security policy for briefly unauthenticated
//!   traffic,
//! - a marshaler for callers outside the link-owner context
//!   ([`SafeApi`]).
//!
//! # Architecture
//!
//! Exactly one execution context owns the link. Bytes enter from the
//! receive interrupt through [`LineIngress`] into a lock-free FIFO; the
//! owner drains them through the HDLC decoder and either completes the
//! pending transaction or dispatches the frame as an unsolicited
//! notification. Outbound datagrams are staged in a ring allocator,
//! queued, and pumped to the NCP one confirmed transaction at a time.
//!
//! ```text
//! ISR ──> RxFifo ──> Decoder ──> { pending transaction | notifications }
//! host stack ──> MessageRing ──> OutgoingQueue ──> pump ──> encoder ──> UART
//! ```
//!
//! The owner advances by calling [`Link::poll`] in a loop; producers
//! and marshaled callers wake it through a deduplicated signal.

pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod fifo;
pub mod link;
pub mod marshal;
pub mod message;
pub mod outbound;
pub mod properties;
pub mod queue;
pub mod security;
pub mod signal;
pub mod transaction;

mod shared;

pub use config::LinkConfig;
pub use driver::{IngressStatus, LineIngress, SerialDriver};
pub use error::LinkError;
pub use event::{DeviceRole, LinkObserver, NullObserver, ScanResult};
pub use link::{Link, LinkParts, ModuleState};
pub use marshal::{SafeApi, SafeCommand, SafeValue};
pub use outbound::DatagramSender;
pub use properties::UnicastAddress;
