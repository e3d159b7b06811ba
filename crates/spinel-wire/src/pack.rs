//! Spinel datatype packing and unpacking.
//!
//! Property values travel as a concatenation of primitively-encoded
//! fields. Integer widths, byte order, and the packed-varint form are
//! dictated by the property being addressed and must match the NCP
//! bit-for-bit.
//!
//! Encoding functions append to a `Vec<u8>`. Decoding functions take a
//! byte slice and return the decoded value together with the number of
//! bytes consumed, so callers can thread an offset through sequences of
//! fields.

use bytes::BufMut;

use crate::constants::{header_byte, header_tid};
use crate::error::WireError;

// ============================================================================
// Packed (variable width) unsigned integers
// ============================================================================

/// Append an unsigned integer in packed form: 7 value bits per byte,
/// least significant group first, high bit set on all but the last byte.
pub fn pack_uint(buf: &mut Vec<u8>, mut value: u32) {
    loop {
        let group = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(group);
            return;
        }
        buf.push(group | 0x80);
    }
}

/// Decode a packed unsigned integer.
pub fn unpack_uint(buf: &[u8]) -> Result<(u32, usize), WireError> {
    let mut value: u32 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= 5 {
            return Err(WireError::VarintOverflow);
        }
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(WireError::UnexpectedEnd { needed: 1 })
}

// ============================================================================
// Fixed width fields
// ============================================================================

/// Append an unsigned 8-bit field.
pub fn pack_u8(buf: &mut Vec<u8>, value: u8) {
    buf.put_u8(value);
}

/// Append a signed 8-bit field.
pub fn pack_i8(buf: &mut Vec<u8>, value: i8) {
    buf.put_i8(value);
}

/// Append an unsigned 16-bit little-endian field.
pub fn pack_u16(buf: &mut Vec<u8>, value: u16) {
    buf.put_u16_le(value);
}

/// Append an unsigned 32-bit little-endian field.
pub fn pack_u32(buf: &mut Vec<u8>, value: u32) {
    buf.put_u32_le(value);
}

/// Append a boolean field (one byte, 0 or 1).
pub fn pack_bool(buf: &mut Vec<u8>, value: bool) {
    buf.put_u8(u8::from(value));
}

/// Append an EUI-64 field (8 bytes, as stored).
pub fn pack_eui64(buf: &mut Vec<u8>, value: &[u8; 8]) {
    buf.put_slice(value);
}

/// Append an IPv6 address field (16 bytes, network order as stored).
pub fn pack_ipv6(buf: &mut Vec<u8>, value: &[u8; 16]) {
    buf.put_slice(value);
}

fn take<const N: usize>(buf: &[u8]) -> Result<[u8; N], WireError> {
    if buf.len() < N {
        return Err(WireError::UnexpectedEnd {
            needed: N - buf.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[..N]);
    Ok(out)
}

/// Decode an unsigned 8-bit field.
pub fn unpack_u8(buf: &[u8]) -> Result<(u8, usize), WireError> {
    let bytes = take::<1>(buf)?;
    Ok((bytes[0], 1))
}

/// Decode a signed 8-bit field.
pub fn unpack_i8(buf: &[u8]) -> Result<(i8, usize), WireError> {
    let bytes = take::<1>(buf)?;
    Ok((bytes[0] as i8, 1))
}

/// Decode an unsigned 16-bit little-endian field.
pub fn unpack_u16(buf: &[u8]) -> Result<(u16, usize), WireError> {
    let bytes = take::<2>(buf)?;
    Ok((u16::from_le_bytes(bytes), 2))
}

/// Decode an unsigned 32-bit little-endian field.
pub fn unpack_u32(buf: &[u8]) -> Result<(u32, usize), WireError> {
    let bytes = take::<4>(buf)?;
    Ok((u32::from_le_bytes(bytes), 4))
}

/// Decode a boolean field.
pub fn unpack_bool(buf: &[u8]) -> Result<(bool, usize), WireError> {
    let bytes = take::<1>(buf)?;
    Ok((bytes[0] != 0, 1))
}

/// Decode an EUI-64 field.
pub fn unpack_eui64(buf: &[u8]) -> Result<([u8; 8], usize), WireError> {
    Ok((take::<8>(buf)?, 8))
}

/// Decode an IPv6 address field.
pub fn unpack_ipv6(buf: &[u8]) -> Result<([u8; 16], usize), WireError> {
    Ok((take::<16>(buf)?, 16))
}

// ============================================================================
// Data and string fields
// ============================================================================

/// Append a data field with a 16-bit little-endian length prefix.
pub fn pack_data_with_len(buf: &mut Vec<u8>, data: &[u8]) -> Result<(), WireError> {
    let len =
        u16::try_from(data.len()).map_err(|_| WireError::ValueTooLarge(data.len()))?;
    buf.put_u16_le(len);
    buf.put_slice(data);
    Ok(())
}

/// Decode a length-prefixed data field.
pub fn unpack_data_with_len(buf: &[u8]) -> Result<(&[u8], usize), WireError> {
    let (len, consumed) = unpack_u16(buf)?;
    let len = len as usize;
    let rest = &buf[consumed..];
    if rest.len() < len {
        return Err(WireError::UnexpectedEnd {
            needed: len - rest.len(),
        });
    }
    Ok((&rest[..len], consumed + len))
}

/// Append a raw data field consuming the remainder of the value.
pub fn pack_data(buf: &mut Vec<u8>, data: &[u8]) {
    buf.put_slice(data);
}

/// Append a UTF-8 string field with its NUL terminator.
pub fn pack_utf8(buf: &mut Vec<u8>, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

/// Decode a NUL-terminated UTF-8 string field.
pub fn unpack_utf8(buf: &[u8]) -> Result<(&str, usize), WireError> {
    let nul = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or(WireError::UnterminatedString)?;
    let s = std::str::from_utf8(&buf[..nul]).map_err(|_| WireError::InvalidUtf8)?;
    Ok((s, nul + 1))
}

// ============================================================================
// Frame assembly and parsing
// ============================================================================

/// A parsed Spinel frame: `header | command | property key | argument bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Raw header byte (flag bits plus transaction ID).
    pub header: u8,
    /// Command number.
    pub command: u32,
    /// Property key the command addresses.
    pub key: u32,
    /// Opaque argument bytes, encoding dictated by the property.
    pub args: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Transaction ID carried in the header.
    pub fn tid(&self) -> u8 {
        header_tid(self.header)
    }

    /// Parse a frame from a decoded (unstuffed) payload.
    pub fn parse(buf: &'a [u8]) -> Result<Self, WireError> {
        if buf.is_empty() {
            return Err(WireError::FrameTooShort {
                expected: 3,
                actual: 0,
            });
        }

        let header = buf[0];
        let mut offset = 1;

        let (command, used) = unpack_uint(&buf[offset..])?;
        offset += used;
        let (key, used) = unpack_uint(&buf[offset..])?;
        offset += used;

        Ok(Frame {
            header,
            command,
            key,
            args: &buf[offset..],
        })
    }
}

/// Assemble the unframed body of an outgoing command:
/// `header | command | key | args`.
pub fn encode_frame_body(tid: u8, command: u32, key: u32, args: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + args.len());
    buf.push(header_byte(tid));
    pack_uint(&mut buf, command);
    pack_uint(&mut buf, key);
    buf.extend_from_slice(args);
    buf
}
