//! Plain framing, and the receiving side of both framings.
//!
//! Senders only need [`frame_plain`] (and
//! [`frame_compressed`](crate::frame_compressed)). The decoding helpers
//! are for peers, demos, and tests that want to check what went out.

use std::io::Read;

use bytes::{Buf, Bytes};
use castforge_protocol::{ProtocolError, get_var_int, put_var_int, var_int_len};
use flate2::read::ZlibDecoder;

use crate::{BufferPool, CodecError, MAXIMUM_UNCOMPRESSED_SIZE, PacketBuf};

/// Frames `payload` as `[VarInt length][payload]`, consuming it.
///
/// # Errors
/// Returns [`CodecError::PacketTooLarge`] if the length doesn't fit in a
/// VarInt.
pub fn frame_plain(payload: PacketBuf, pool: &BufferPool) -> Result<PacketBuf, CodecError> {
    let len = i32::try_from(payload.len()).map_err(|_| CodecError::PacketTooLarge {
        size: payload.len(),
        max: i32::MAX as usize,
    })?;

    let mut out = pool.acquire_with_capacity(var_int_len(len) + payload.len());
    put_var_int(out.as_mut_vec(), len);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Splits the first complete frame off the front of `buf`.
///
/// Returns the frame contents without the length prefix, or `Ok(None)` if
/// `buf` doesn't hold a whole frame yet (nothing is consumed in that case).
///
/// # Errors
/// Returns [`CodecError::MalformedFrame`] for a negative length and
/// [`CodecError::Protocol`] for an over-long length VarInt.
pub fn next_frame(buf: &mut Bytes) -> Result<Option<Bytes>, CodecError> {
    let mut header = &buf[..];
    let len = match get_var_int(&mut header) {
        Ok(len) => len,
        Err(ProtocolError::Truncated { .. }) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let len = usize::try_from(len)
        .map_err(|_| CodecError::MalformedFrame(format!("negative frame length {len}")))?;
    if header.len() < len {
        return Ok(None);
    }

    let header_len = buf.len() - header.len();
    buf.advance(header_len);
    Ok(Some(buf.split_to(len)))
}

/// Undoes the compressed framing for one frame's contents (as returned by
/// [`next_frame`]), yielding `[id][body]`.
///
/// # Errors
/// - [`CodecError::PacketTooLarge`] if the declared size is over the limit
/// - [`CodecError::Decompression`] if the zlib stream is corrupt
/// - [`CodecError::MalformedFrame`] if the inflated size doesn't match
pub fn inflate_frame(mut frame: Bytes) -> Result<Bytes, CodecError> {
    let data_len = get_var_int(&mut frame)?;
    let data_len = usize::try_from(data_len)
        .map_err(|_| CodecError::MalformedFrame(format!("negative data length {data_len}")))?;

    if data_len == 0 {
        return Ok(frame);
    }
    if data_len > MAXIMUM_UNCOMPRESSED_SIZE {
        return Err(CodecError::PacketTooLarge {
            size: data_len,
            max: MAXIMUM_UNCOMPRESSED_SIZE,
        });
    }

    let mut inflated = Vec::with_capacity(data_len);
    ZlibDecoder::new(frame.as_ref())
        .take(data_len as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| CodecError::Decompression(e.to_string()))?;

    if inflated.len() != data_len {
        return Err(CodecError::MalformedFrame(format!(
            "declared {data_len} bytes, inflated {}",
            inflated.len()
        )));
    }
    Ok(Bytes::from(inflated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_plain_prefixes_length_and_releases_input() {
        let pool = BufferPool::default();
        let mut payload = pool.acquire();
        payload.extend_from_slice(&[0x00, 0x2A]);

        let framed = frame_plain(payload, &pool).unwrap();
        assert_eq!(framed.as_slice(), &[0x02, 0x00, 0x2A]);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn test_next_frame_splits_consecutive_frames() {
        let mut buf = Bytes::from_static(b"\x02ab\x01c");
        assert_eq!(next_frame(&mut buf).unwrap().unwrap(), &b"ab"[..]);
        assert_eq!(next_frame(&mut buf).unwrap().unwrap(), &b"c"[..]);
        assert!(next_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_next_frame_partial_consumes_nothing() {
        let mut buf = Bytes::from_static(b"\x05ab");
        assert!(next_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_next_frame_negative_length_returns_error() {
        let mut buf = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert!(matches!(
            next_frame(&mut buf),
            Err(CodecError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_inflate_frame_raw_marker_returns_rest() {
        let inflated = inflate_frame(Bytes::from_static(b"\x00\x01hi")).unwrap();
        assert_eq!(inflated, &b"\x01hi"[..]);
    }

    #[test]
    fn test_inflate_frame_corrupt_stream_returns_error() {
        let result = inflate_frame(Bytes::from_static(b"\x10not zlib at all"));
        assert!(matches!(result, Err(CodecError::Decompression(_))));
    }
}
