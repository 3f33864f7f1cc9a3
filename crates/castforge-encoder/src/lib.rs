//! Turns logical packets into framed wire bytes.
//!
//! The pipeline for one packet and one protocol version:
//!
//! ```text
//! Packet ──(registry id + body)──→ PacketBuf ──(frame)──→ PacketBuf
//!                                                │
//!                         plain:  [len][id][body]
//!                         zlib:   [len][data len][deflate(id + body)]
//! ```
//!
//! # Key types
//!
//! - [`PacketEncoder`]: the encoder: registry lookup, body, framing
//! - [`BufferPool`] / [`PacketBuf`]: pooled, accounted byte buffers
//! - [`CompressionSettings`]: whether, how hard, and above which size
//!   to compress
//! - [`CodecError`]: what can go wrong

mod compression;
mod encoder;
mod error;
mod frame;
mod pool;
mod worker;

pub use compression::{
    CompressionSettings, MAXIMUM_UNCOMPRESSED_SIZE, ZlibCompressor,
    frame_compressed,
};
pub use encoder::PacketEncoder;
pub use error::CodecError;
pub use frame::{frame_plain, inflate_frame, next_frame};
pub use pool::{BufferPool, PacketBuf, PoolConfig, PoolStats};
pub use worker::WorkerCompressors;
