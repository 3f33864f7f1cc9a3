//! Unified error type for the Castforge framework.

use castforge_cache::CacheError;
use castforge_encoder::CodecError;
use castforge_protocol::ProtocolError;
use castforge_transport::TransportError;

use crate::DispatchError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `castforge` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate.
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum CastforgeError {
    /// A transport-level error (bind, accept, pipeline layout).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (unknown version, bad mapping, varint).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Encoding, framing, or compression failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A cache was used outside its lifecycle, or failed to prepare.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An outbound write was rejected by the pipeline.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The connection failed to send or receive.
    #[error("connection error: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A configuration document couldn't be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
