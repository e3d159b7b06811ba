//! Spinel wire protocol
//!
//! This crate provides the byte-level pieces of the Spinel host-NCP
//! protocol: HDLC-lite framing with a 16-bit frame check, the datatype
//! packing rules property values are encoded with, and the catalog of
//! command numbers, property keys, and status codes.
//!
//! # Protocol Overview
//!
//! Every frame carries a one-byte header (flag bits plus a 4-bit
//! transaction ID), a packed command number, a packed property key, and
//! opaque argument bytes whose encoding is dictated by the property:
//!
//! ```rust
//! use spinel_wire::{constants, hdlc, pack};
//!
//! // Build the body of a "set NET_STACK_UP = true" command.
//! let mut args = Vec::new();
//! pack::pack_bool(&mut args, true);
//! let body = pack::encode_frame_body(
//!     2,
//!     constants::CMD_PROP_VALUE_SET,
//!     constants::PROP_NET_STACK_UP,
//!     &args,
//! );
//!
//! // Frame it for the serial link.
//! let wire = hdlc::encode_frame(&body);
//!
//! // And back again.
//! let mut decoder = hdlc::Decoder::new();
//! let mut frames = Vec::new();
//! for byte in wire {
//!     if let hdlc::Decoded::Frame(f) = decoder.decode(byte) {
//!         frames.push(f);
//!     }
//! }
//! let frame = pack::Frame::parse(&frames[0]).unwrap();
//! assert_eq!(frame.tid(), 2);
//! ```

pub mod constants;
pub mod error;
pub mod hdlc;
pub mod pack;

pub use error::WireError;
pub use pack::Frame;
