//! Error types for the encoder layer.

use castforge_protocol::{ProtocolError, ProtocolVersion};

/// Errors that can occur while encoding, framing, or unframing a packet.
///
/// All of these are fatal to the single encode call that raised them.
/// Encoding is local and deterministic, so retrying reproduces the error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The registry has no id for this packet type in this version.
    #[error("no packet id registered for {packet} in version {version}")]
    UnknownPacket {
        packet: &'static str,
        version: ProtocolVersion,
    },

    /// The packet body couldn't be written, or a varint was malformed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The zlib stream reported an error while compressing.
    #[error("compression failed: {0}")]
    Compression(String),

    /// The zlib stream reported an error while decompressing.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// The packet is larger than the framing allows.
    #[error("packet of {size} bytes exceeds the {max} byte limit")]
    PacketTooLarge { size: usize, max: usize },

    /// A received frame didn't match the framing rules.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}
