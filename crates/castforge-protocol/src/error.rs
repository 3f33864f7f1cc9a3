//! Error types for the protocol layer.
//!
//! Each crate in Castforge defines its own error enum. A `ProtocolError`
//! means the problem is in the protocol vocabulary itself (a bad varint,
//! a packet body that can't be written, a malformed registry), not in
//! framing, compression, or caching.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A packet failed to write its body.
    ///
    /// Raised by [`Packet::encode`](crate::Packet::encode) implementations,
    /// e.g. a string longer than the version allows or a payload that was
    /// already released.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A varint ran past its maximum length (5 bytes for an `i32`).
    #[error("varint is too long")]
    VarIntTooLong,

    /// The input ended before a complete value could be read.
    #[error("truncated input: needed {needed} more bytes")]
    Truncated { needed: usize },

    /// A string did not contain valid UTF-8.
    #[error("invalid utf-8 string")]
    InvalidString,

    /// A wire protocol number that is not part of the version table.
    #[error("unknown protocol number {0}")]
    UnknownVersion(i32),

    /// A registry mapping list violates the registry's rules
    /// (unsorted, empty, or an inverted `since..until` range).
    #[error("invalid packet mapping: {0}")]
    InvalidMapping(String),
}
