//! Zlib framing for connections that have compression enabled.
//!
//! A compressed frame looks like this:
//!
//! ```text
//! [VarInt frame length][VarInt data length][payload]
//! ```
//!
//! `data length` is the size of the payload *before* compression. A data
//! length of `0` means the payload is below the threshold and was sent raw.
//! Otherwise the payload is a zlib stream.

use bytes::BufMut;
use castforge_protocol::{put_var_int, var_int_len};
use flate2::{Compress, Compression, FlushCompress, Status};
use serde::{Deserialize, Serialize};

use crate::{BufferPool, CodecError, PacketBuf};

/// The largest payload the compressed framing accepts, before compression.
pub const MAXIMUM_UNCOMPRESSED_SIZE: usize = 8 * 1024 * 1024;

/// Room reserved in front of a compressed body for its data-length VarInt.
const DATA_LENGTH_HEADROOM: usize = 5;

// ---------------------------------------------------------------------------
// CompressionSettings
// ---------------------------------------------------------------------------

/// Whether, how hard, and above which size to compress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    /// Produce compressed frames at all. When `false`, every frame is
    /// plain, even for versions that support compression.
    pub enabled: bool,

    /// Zlib level, `0` (store) to `9` (best). Larger values are clamped.
    pub level: u32,

    /// Payloads shorter than this are framed raw inside the compressed
    /// framing (data length `0`).
    pub threshold: usize,
}

impl CompressionSettings {
    /// Settings that never compress.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// The level actually used, clamped to zlib's range.
    pub fn effective_level(&self) -> u32 {
        self.level.min(9)
    }
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: 6,
            threshold: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// ZlibCompressor
// ---------------------------------------------------------------------------

/// One zlib deflate stream, reused across packets.
///
/// Not `Sync` in spirit: one instance belongs to one worker. See
/// [`WorkerCompressors`](crate::WorkerCompressors).
pub struct ZlibCompressor {
    stream: Compress,
    level: u32,
}

impl ZlibCompressor {
    /// Creates a compressor for `level` (clamped to `0..=9`).
    pub fn new(level: u32) -> Self {
        let level = level.min(9);
        Self {
            stream: Compress::new(Compression::new(level), true),
            level,
        }
    }

    /// The zlib level this stream was created with.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Compresses all of `input` as one complete zlib stream, appending to
    /// `out`.
    ///
    /// # Errors
    /// Returns [`CodecError::Compression`] if zlib reports a stream error.
    pub fn compress_into(
        &mut self,
        input: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        self.stream.reset();
        let start = self.stream.total_in();
        out.reserve(input.len() / 2 + 16);

        loop {
            let consumed = (self.stream.total_in() - start) as usize;
            let status = self
                .stream
                .compress_vec(&input[consumed..], out, FlushCompress::Finish)
                .map_err(|e| CodecError::Compression(e.to_string()))?;

            match status {
                Status::StreamEnd => return Ok(()),
                // compress_vec only writes into spare capacity.
                Status::Ok | Status::BufError => out.reserve(out.capacity().max(64)),
            }
        }
    }
}

impl std::fmt::Debug for ZlibCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZlibCompressor")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Frames `payload` with the compressed framing, consuming it.
///
/// Payloads shorter than `threshold` are written raw with a data length of
/// `0`. Everything else is deflated with `compressor`.
///
/// # Errors
/// - [`CodecError::PacketTooLarge`] if `payload` exceeds
///   [`MAXIMUM_UNCOMPRESSED_SIZE`]
/// - [`CodecError::Compression`] if zlib fails
///
/// On error every intermediate buffer goes back to `pool`.
pub fn frame_compressed(
    payload: PacketBuf,
    threshold: usize,
    compressor: &mut ZlibCompressor,
    pool: &BufferPool,
) -> Result<PacketBuf, CodecError> {
    let len = payload.len();
    if len > MAXIMUM_UNCOMPRESSED_SIZE {
        return Err(CodecError::PacketTooLarge {
            size: len,
            max: MAXIMUM_UNCOMPRESSED_SIZE,
        });
    }

    if len < threshold {
        // [len + 1][0][raw payload]
        let frame_len = len as i32 + 1;
        let mut out = pool.acquire_with_capacity(var_int_len(frame_len) + len + 1);
        let buf = out.as_mut_vec();
        put_var_int(buf, frame_len);
        buf.put_u8(0);
        buf.extend_from_slice(&payload);
        return Ok(out);
    }

    let mut body = pool.acquire_with_capacity(DATA_LENGTH_HEADROOM + len / 2);
    put_var_int(body.as_mut_vec(), len as i32);
    compressor.compress_into(&payload, body.as_mut_vec())?;
    drop(payload);

    let body_len = body.len() as i32;
    let mut out = pool.acquire_with_capacity(var_int_len(body_len) + body.len());
    put_var_int(out.as_mut_vec(), body_len);
    out.extend_from_slice(&body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use bytes::Buf;
    use castforge_protocol::get_var_int;

    use super::*;

    fn payload(pool: &BufferPool, bytes: &[u8]) -> PacketBuf {
        let mut buf = pool.acquire();
        buf.extend_from_slice(bytes);
        buf
    }

    #[test]
    fn test_frame_compressed_below_threshold_writes_raw_marker() {
        let pool = BufferPool::default();
        let mut compressor = ZlibCompressor::new(6);
        let framed =
            frame_compressed(payload(&pool, b"\x01hi"), 256, &mut compressor, &pool)
                .unwrap();

        assert_eq!(framed.as_slice(), b"\x04\x00\x01hi");
    }

    #[test]
    fn test_frame_compressed_above_threshold_inflates_back() {
        let pool = BufferPool::default();
        let mut compressor = ZlibCompressor::new(6);
        let original = vec![0x2A; 2048];
        let framed =
            frame_compressed(payload(&pool, &original), 64, &mut compressor, &pool)
                .unwrap();
        assert!(framed.len() < original.len());

        let mut frame = framed.as_slice();
        let frame_len = get_var_int(&mut frame).unwrap() as usize;
        assert_eq!(frame_len, frame.remaining());
        let data_len = get_var_int(&mut frame).unwrap() as usize;
        assert_eq!(data_len, original.len());

        let mut inflated = Vec::new();
        flate2::read::ZlibDecoder::new(frame)
            .read_to_end(&mut inflated)
            .unwrap();
        assert_eq!(inflated, original);
    }

    #[test]
    fn test_frame_compressed_oversized_returns_error_and_frees_buffers() {
        let pool = BufferPool::default();
        let mut compressor = ZlibCompressor::new(6);
        let big = payload(&pool, &vec![0; MAXIMUM_UNCOMPRESSED_SIZE + 1]);

        let result = frame_compressed(big, 0, &mut compressor, &pool);
        assert!(matches!(result, Err(CodecError::PacketTooLarge { .. })));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_compressor_reused_across_packets_produces_valid_streams() {
        let mut compressor = ZlibCompressor::new(9);
        for round in 0..3u8 {
            let input = vec![round; 1000];
            let mut out = Vec::new();
            compressor.compress_into(&input, &mut out).unwrap();

            let mut inflated = Vec::new();
            flate2::read::ZlibDecoder::new(out.as_slice())
                .read_to_end(&mut inflated)
                .unwrap();
            assert_eq!(inflated, input);
        }
    }

    #[test]
    fn test_compressor_clamps_level() {
        assert_eq!(ZlibCompressor::new(42).level(), 9);
        let settings = CompressionSettings {
            level: 12,
            ..CompressionSettings::default()
        };
        assert_eq!(settings.effective_level(), 9);
    }

    #[test]
    fn test_settings_deserialize_partial_uses_defaults() {
        let settings: CompressionSettings =
            serde_json::from_str(r#"{ "threshold": 64 }"#).unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.level, 6);
        assert_eq!(settings.threshold, 64);
    }
}
