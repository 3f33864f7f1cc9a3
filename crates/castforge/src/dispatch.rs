//! The per-connection outbound stage.
//!
//! A [`PacketDispatcher`] sits in a connection's [`Pipeline`] just ahead
//! of the stage that writes to the wire. It turns whatever the
//! application hands the connection into framed bytes:
//!
//! | Outbound value | What the dispatcher does |
//! |---|---|
//! | `Placeholder` | drops it, nothing reaches the wire |
//! | `Prepared(cache)` | looks up this connection's version in the cache |
//! | `Packet(packet)` | encodes it for this connection right now |
//! | `Raw(bytes)` | passes it through |
//!
//! Which cache variant a connection gets depends on whether compression
//! is on for it. A [`CompressionListener`] next to the dispatcher flips
//! that when the transport reports a [`ConnectionEvent`], so a cache
//! built once keeps working before and after the switch.
//!
//! [`Pipeline`]: castforge_transport::Pipeline

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use bytes::Bytes;
use castforge_cache::{CacheError, VersionedPacketCache};
use castforge_encoder::{CodecError, PacketEncoder};
use castforge_protocol::{Packet, ProtocolVersion};
use castforge_transport::{ConnectionEvent, Stage};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A value written to a connection.
pub enum Outbound {
    /// Packets prepared ahead of time for many versions.
    Prepared(Arc<VersionedPacketCache>),
    /// A single packet to encode for this connection only.
    Packet(Box<dyn Packet>),
    /// An internal marker that must never reach the wire.
    Placeholder,
    /// Bytes that are already framed.
    Raw(Bytes),
}

impl Outbound {
    /// Wraps one packet for on-demand encoding.
    pub fn packet(packet: impl Packet) -> Self {
        Self::Packet(Box::new(packet))
    }

    /// A short name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prepared(_) => "prepared packets",
            Self::Packet(_) => "packet",
            Self::Placeholder => "placeholder",
            Self::Raw(_) => "raw bytes",
        }
    }
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepared(cache) => f.debug_tuple("Prepared").field(cache).finish(),
            Self::Packet(packet) => f.debug_tuple("Packet").field(&packet.packet_name()).finish(),
            Self::Placeholder => f.write_str("Placeholder"),
            Self::Raw(bytes) => f.debug_tuple("Raw").field(&bytes.len()).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// DuplicatePolicy
// ---------------------------------------------------------------------------

/// How a prepared buffer is handed to one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Share the cached storage (a refcount bump). For transports that
    /// never modify outgoing bytes.
    #[default]
    Share,
    /// Give the connection its own copy. Needed when something downstream
    /// rewrites bytes in place, e.g. per-connection encryption in online
    /// mode.
    Copy,
}

impl DuplicatePolicy {
    /// Online-mode connections encrypt in place, so they need copies.
    pub fn for_online_mode(online_mode: bool) -> Self {
        if online_mode { Self::Copy } else { Self::Share }
    }

    /// Produces this connection's view of `bytes`.
    pub fn duplicate(self, bytes: &Bytes) -> Bytes {
        match self {
            Self::Share => bytes.clone(),
            Self::Copy => Bytes::copy_from_slice(bytes),
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Errors from a connection's outbound pipeline.
///
/// Each fails the single write that raised it. The connection itself is
/// left alone; closing it is the caller's call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The prepared packets don't cover this connection's version. This is
    /// a setup mistake (the cache's range is wrong) and won't fix itself.
    #[error("prepared packets are not prepared for version {0}")]
    NotPrepared(ProtocolVersion),

    /// The cache was not built yet, or was already released.
    #[error(transparent)]
    Cache(CacheError),

    /// Encoding a one-off packet failed.
    #[error(transparent)]
    Encode(#[from] CodecError),

    /// A value that needs encoding reached the wire stage, meaning no
    /// dispatcher is attached to this pipeline.
    #[error("{0} reached the wire without a packet dispatcher")]
    Unencoded(&'static str),
}

impl From<CacheError> for DispatchError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotPrepared(version) => Self::NotPrepared(version),
            other => Self::Cache(other),
        }
    }
}

// ---------------------------------------------------------------------------
// PacketDispatcher
// ---------------------------------------------------------------------------

/// Turns outbound values into framed bytes for one connection.
///
/// The protocol version is fixed for the dispatcher's lifetime. The
/// compression variant and the encoder can change under a live
/// connection; both are read once per write without locking.
pub struct PacketDispatcher {
    version: ProtocolVersion,
    policy: DuplicatePolicy,
    send_uncompressed: AtomicBool,
    encoder: ArcSwap<PacketEncoder>,
}

impl PacketDispatcher {
    pub fn new(
        encoder: Arc<PacketEncoder>,
        version: ProtocolVersion,
        policy: DuplicatePolicy,
        send_uncompressed: bool,
    ) -> Self {
        Self {
            version,
            policy,
            send_uncompressed: AtomicBool::new(send_uncompressed),
            encoder: ArcSwap::new(encoder),
        }
    }

    /// The protocol version this connection speaks.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Whether writes currently use the uncompressed variant.
    pub fn sends_uncompressed(&self) -> bool {
        self.send_uncompressed.load(Ordering::Acquire)
    }

    /// Switches between the compressed and uncompressed variant.
    pub fn set_send_uncompressed(&self, send_uncompressed: bool) {
        let previous = self.send_uncompressed.swap(send_uncompressed, Ordering::AcqRel);
        if previous != send_uncompressed {
            tracing::debug!(version = %self.version, send_uncompressed, "dispatcher variant switched");
        }
    }

    /// The encoder used for one-off packets.
    pub fn encoder(&self) -> Arc<PacketEncoder> {
        self.encoder.load_full()
    }

    /// Replaces the encoder for every later write. Writes already in
    /// flight finish with the old one.
    pub fn swap_encoder(&self, encoder: Arc<PacketEncoder>) {
        self.encoder.store(encoder);
    }

    /// Handles one outbound value. See the module docs for the rules.
    ///
    /// # Errors
    /// - [`DispatchError::NotPrepared`] if a cache lacks this version
    /// - [`DispatchError::Cache`] if a cache isn't built or was released
    /// - [`DispatchError::Encode`] if a one-off packet fails to encode
    pub fn dispatch(&self, message: Outbound) -> Result<Option<Outbound>, DispatchError> {
        let uncompressed = self.sends_uncompressed();
        match message {
            Outbound::Placeholder => Ok(None),
            Outbound::Prepared(cache) => {
                let cached = cache.try_packets(self.version, uncompressed)?;
                tracing::trace!(version = %self.version, uncompressed, len = cached.len(), "serving prepared packets");
                Ok(Some(Outbound::Raw(self.policy.duplicate(cached))))
            }
            Outbound::Packet(packet) => {
                let encoder = self.encoder.load();
                let frame = if uncompressed {
                    encoder.encode(&*packet, self.version, false, true, encoder.pool())?
                } else {
                    encoder.encode_single(&*packet, self.version)?
                };
                Ok(Some(Outbound::Raw(frame.freeze())))
            }
            raw @ Outbound::Raw(_) => Ok(Some(raw)),
        }
    }
}

impl Stage<Outbound> for PacketDispatcher {
    type Error = DispatchError;

    fn write(&self, message: Outbound) -> Result<Option<Outbound>, DispatchError> {
        self.dispatch(message)
    }
}

impl fmt::Debug for PacketDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketDispatcher")
            .field("version", &self.version)
            .field("policy", &self.policy)
            .field("send_uncompressed", &self.sends_uncompressed())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// CompressionListener
// ---------------------------------------------------------------------------

/// Flips a dispatcher's variant when the connection's compression state
/// changes. Writes pass through untouched.
pub struct CompressionListener {
    dispatcher: Arc<PacketDispatcher>,
}

impl CompressionListener {
    pub fn new(dispatcher: Arc<PacketDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Stage<Outbound> for CompressionListener {
    type Error = DispatchError;

    fn write(&self, message: Outbound) -> Result<Option<Outbound>, DispatchError> {
        Ok(Some(message))
    }

    fn event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::CompressionEnabled { .. } => {
                self.dispatcher.set_send_uncompressed(false);
            }
            ConnectionEvent::CompressionDisabled => {
                self.dispatcher.set_send_uncompressed(true);
            }
        }
    }
}
