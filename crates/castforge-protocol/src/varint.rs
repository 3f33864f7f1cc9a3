//! Variable-length integers and the strings built on them.
//!
//! A VarInt stores an `i32` in 1–5 bytes, seven bits per byte, least
//! significant group first. The high bit of each byte says "more bytes
//! follow". Negative numbers are written as their two's complement bit
//! pattern, so they always take the full five bytes.

use bytes::{Buf, BufMut};

use crate::ProtocolError;

/// The longest a VarInt can be.
pub const MAX_VAR_INT_LEN: usize = 5;

/// Returns how many bytes `value` takes as a VarInt.
pub fn var_int_len(value: i32) -> usize {
    let value = value as u32;
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Appends `value` as a VarInt.
pub fn put_var_int(buf: &mut impl BufMut, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.put_u8(value as u8);
            return;
        }
        buf.put_u8((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
}

/// Reads one VarInt from the front of `buf`.
///
/// # Errors
/// - [`ProtocolError::Truncated`] if `buf` ends mid-value
/// - [`ProtocolError::VarIntTooLong`] if more than five bytes have the
///   continuation bit set
pub fn get_var_int(buf: &mut impl Buf) -> Result<i32, ProtocolError> {
    let mut value: u32 = 0;
    for position in 0..MAX_VAR_INT_LEN {
        if !buf.has_remaining() {
            return Err(ProtocolError::Truncated { needed: 1 });
        }
        let byte = buf.get_u8();
        value |= u32::from(byte & 0x7F) << (7 * position);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(ProtocolError::VarIntTooLong)
}

/// Appends a VarInt length prefix followed by the UTF-8 bytes of `value`.
pub fn put_string(buf: &mut impl BufMut, value: &str) {
    put_var_int(buf, value.len() as i32);
    buf.put_slice(value.as_bytes());
}

/// Reads a VarInt-prefixed UTF-8 string.
pub fn get_string(buf: &mut impl Buf) -> Result<String, ProtocolError> {
    let len = get_var_int(buf)?;
    let len = usize::try_from(len)
        .map_err(|_| ProtocolError::Encode(format!("negative string length {len}")))?;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated {
            needed: len - buf.remaining(),
        });
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidString)
}
