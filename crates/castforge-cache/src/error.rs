//! Error types for the cache layer.

use castforge_encoder::CodecError;
use castforge_protocol::ProtocolVersion;

use crate::CacheState;

/// Errors that can occur while preparing or reading a
/// [`VersionedPacketCache`](crate::VersionedPacketCache).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A prepare call arrived after the cache was built or released.
    #[error("cache is {0}, packets can only be prepared while building")]
    NotBuilding(CacheState),

    /// A checked read arrived before `build()`.
    #[error("cache has not been built yet")]
    NotBuilt,

    /// The cache's buffers have already been released.
    #[error("cache has been released")]
    Released,

    /// No packets were prepared for this version.
    #[error("cache holds no packets for version {0}")]
    NotPrepared(ProtocolVersion),

    /// Encoding one of the packets failed. The cache keeps whatever was
    /// prepared before the failure.
    #[error(transparent)]
    Encode(#[from] CodecError),
}
