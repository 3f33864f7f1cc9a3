//! The versioned packet cache.
//!
//! Two tables, indexed by [`ProtocolVersion::ordinal`]: one for the
//! compressed variant and, when requested, one for the uncompressed
//! variant. Each slot goes through these shapes:
//!
//! ```text
//! Empty ──prepare──→ Pending(PacketBuf) ──build──→ Owned(Bytes)
//!                                            └───→ Aliased(ordinal)
//! ```
//!
//! `Aliased` points at an earlier `Owned` slot of the same table whose
//! bytes are identical. An alias owns nothing, so releasing the table
//! drops each buffer exactly once no matter how many versions share it.
//!
//! Without an uncompressed table, uncompressed lookups read the
//! compressed table.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use castforge_encoder::{PacketBuf, PacketEncoder};
use castforge_protocol::{Packet, ProtocolVersion, VersionRange};

use crate::CacheError;

// ---------------------------------------------------------------------------
// CacheState
// ---------------------------------------------------------------------------

/// The lifecycle state of a [`VersionedPacketCache`].
///
/// ```text
/// Building → Built → Released
/// ```
///
/// - **Building**: accepts prepare calls. Nothing can be read yet.
/// - **Built**: trimmed, deduplicated, immutable. Safe to read from many
///   threads at once.
/// - **Released**: every buffer has been given back. Reads find nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Building,
    Built,
    Released,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Built => write!(f, "built"),
            Self::Released => write!(f, "released"),
        }
    }
}

enum Slot {
    Empty,
    Pending(PacketBuf),
    Owned(Bytes),
    Aliased(usize),
}

// ---------------------------------------------------------------------------
// VersionedPacketCache
// ---------------------------------------------------------------------------

/// Packets encoded once per protocol version, served to any number of
/// connections.
///
/// Prepare calls are chainable and accumulate: preparing several packets
/// over overlapping ranges concatenates their frames, in call order, into
/// one buffer per version.
///
/// ```rust,ignore
/// let mut cache = factory.create_cache(ProtocolVersion::V1_8, ProtocolVersion::MAXIMUM);
/// cache
///     .prepare(&status_response)?
///     .prepare_from(&server_brand, ProtocolVersion::V1_13)?
///     .build()?;
/// let cache = Arc::new(cache);
/// ```
///
/// Once built, the cache is immutable and `Sync`: wrap it in an `Arc` and
/// read it from every worker. Lookups return borrowed [`Bytes`]; clone
/// them (a refcount bump) to hold on past the call.
pub struct VersionedPacketCache {
    encoder: Arc<PacketEncoder>,
    min: ProtocolVersion,
    max: ProtocolVersion,
    compressed: Vec<Slot>,
    uncompressed: Option<Vec<Slot>>,
    state: CacheState,
}

impl VersionedPacketCache {
    /// Creates an empty cache for versions `min..=max`.
    ///
    /// With `save_uncompressed`, every prepare also encodes an
    /// uncompressed copy for connections that haven't enabled compression
    /// yet.
    pub fn new(
        encoder: Arc<PacketEncoder>,
        min: ProtocolVersion,
        max: ProtocolVersion,
        save_uncompressed: bool,
    ) -> Self {
        Self {
            encoder,
            min,
            max,
            compressed: empty_table(),
            uncompressed: save_uncompressed.then(empty_table),
            state: CacheState::Building,
        }
    }

    // -- Prepare ------------------------------------------------------------

    /// Prepares `packet` for every version the cache covers.
    ///
    /// # Errors
    /// See [`prepare_range`](Self::prepare_range).
    pub fn prepare(&mut self, packet: &dyn Packet) -> Result<&mut Self, CacheError> {
        self.prepare_range(packet, ProtocolVersion::MINIMUM, ProtocolVersion::MAXIMUM)
    }

    /// Prepares `packet` for every covered version from `from` onward.
    ///
    /// # Errors
    /// See [`prepare_range`](Self::prepare_range).
    pub fn prepare_from(
        &mut self,
        packet: &dyn Packet,
        from: ProtocolVersion,
    ) -> Result<&mut Self, CacheError> {
        self.prepare_range(packet, from, ProtocolVersion::MAXIMUM)
    }

    /// Prepares `packet` for versions `from..=to`, clamped to the cache's
    /// bounds.
    ///
    /// A range that doesn't overlap the cache is a no-op, not an error.
    /// The packet's releasable resource (if any) is released once the call
    /// is done with it.
    ///
    /// # Errors
    /// - [`CacheError::NotBuilding`] after `build()` or `release()`
    /// - [`CacheError::Encode`] if any encode fails; versions encoded
    ///   before the failure keep their bytes
    pub fn prepare_range(
        &mut self,
        packet: &dyn Packet,
        from: ProtocolVersion,
        to: ProtocolVersion,
    ) -> Result<&mut Self, CacheError> {
        self.ensure_building()?;

        let result = self.encode_range(packet, from, to);
        if let Some(resource) = packet.as_releasable() {
            resource.release();
        }
        result?;
        Ok(self)
    }

    /// Prepares each packet in `packets`, in order, for every covered
    /// version.
    ///
    /// # Errors
    /// See [`prepare_range`](Self::prepare_range).
    pub fn prepare_all<P: Packet>(&mut self, packets: &[P]) -> Result<&mut Self, CacheError> {
        self.prepare_all_range(packets, ProtocolVersion::MINIMUM, ProtocolVersion::MAXIMUM)
    }

    /// Prepares each packet in `packets`, in order, for `from..=to`.
    ///
    /// # Errors
    /// See [`prepare_range`](Self::prepare_range).
    pub fn prepare_all_range<P: Packet>(
        &mut self,
        packets: &[P],
        from: ProtocolVersion,
        to: ProtocolVersion,
    ) -> Result<&mut Self, CacheError> {
        for packet in packets {
            self.prepare_range(packet, from, to)?;
        }
        Ok(self)
    }

    /// Prepares a version-specific packet built by `packet_for` for each
    /// version in `from..=to` (clamped).
    ///
    /// `packet_for` is called exactly once per covered version, oldest
    /// first.
    ///
    /// # Errors
    /// See [`prepare_range`](Self::prepare_range).
    pub fn prepare_with<P, F>(
        &mut self,
        mut packet_for: F,
        from: ProtocolVersion,
        to: ProtocolVersion,
    ) -> Result<&mut Self, CacheError>
    where
        P: Packet,
        F: FnMut(ProtocolVersion) -> P,
    {
        self.ensure_building()?;

        for version in self.clamp(from, to) {
            let packet = packet_for(version);
            let result = self.encode_version(&packet, version);
            if let Some(resource) = packet.as_releasable() {
                resource.release();
            }
            result?;
        }
        Ok(self)
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Seals the cache: trims every buffer, collapses runs of identical
    /// adjacent versions onto one buffer, and makes the cache readable.
    ///
    /// Calling it again on a built cache changes nothing.
    ///
    /// # Errors
    /// Returns [`CacheError::Released`] if the cache was released.
    pub fn build(&mut self) -> Result<&mut Self, CacheError> {
        match self.state {
            CacheState::Built => return Ok(self),
            CacheState::Released => return Err(CacheError::Released),
            CacheState::Building => {}
        }

        seal(&mut self.compressed);
        if let Some(uncompressed) = &mut self.uncompressed {
            seal(uncompressed);
        }
        self.state = CacheState::Built;

        tracing::debug!(
            min = %self.min,
            max = %self.max,
            distinct = self.distinct_buffers(),
            uncompressed = self.uncompressed.is_some(),
            "packet cache built"
        );
        Ok(self)
    }

    /// Gives every buffer back to the pool. Idempotent.
    ///
    /// Buffers that a connection is still writing keep their storage
    /// until that write drops its view.
    pub fn release(&mut self) {
        if self.state == CacheState::Released {
            return;
        }
        let distinct = self.distinct_buffers();
        self.compressed.fill_with(|| Slot::Empty);
        if let Some(uncompressed) = &mut self.uncompressed {
            uncompressed.fill_with(|| Slot::Empty);
        }
        self.state = CacheState::Released;
        tracing::debug!(distinct, "packet cache released");
    }

    // -- Lookups ------------------------------------------------------------

    /// The compressed-variant bytes for `version`, or `None` if the cache
    /// isn't built or holds nothing for that version.
    pub fn packets(&self, version: ProtocolVersion) -> Option<&Bytes> {
        if self.state != CacheState::Built {
            return None;
        }
        resolve(&self.compressed, version)
    }

    /// The uncompressed-variant bytes for `version`. Reads the compressed
    /// table when the cache doesn't save uncompressed copies.
    pub fn uncompressed_packets(&self, version: ProtocolVersion) -> Option<&Bytes> {
        if self.state != CacheState::Built {
            return None;
        }
        let table = self.uncompressed.as_deref().unwrap_or(self.compressed.as_slice());
        resolve(table, version)
    }

    /// Like [`packets`](Self::packets) / [`uncompressed_packets`](Self::uncompressed_packets),
    /// but says why nothing was found.
    ///
    /// # Errors
    /// [`CacheError::NotBuilt`], [`CacheError::Released`], or
    /// [`CacheError::NotPrepared`].
    pub fn try_packets(
        &self,
        version: ProtocolVersion,
        uncompressed: bool,
    ) -> Result<&Bytes, CacheError> {
        match self.state {
            CacheState::Building => return Err(CacheError::NotBuilt),
            CacheState::Released => return Err(CacheError::Released),
            CacheState::Built => {}
        }
        let found = if uncompressed {
            self.uncompressed_packets(version)
        } else {
            self.packets(version)
        };
        found.ok_or(CacheError::NotPrepared(version))
    }

    /// Whether a built cache holds packets for `version`.
    pub fn has_packets_for(&self, version: ProtocolVersion) -> bool {
        self.packets(version).is_some()
    }

    /// How many physically distinct buffers the cache owns, across both
    /// tables. Before `build()` this counts pending buffers.
    pub fn distinct_buffers(&self) -> usize {
        let owned = |table: &[Slot]| {
            table
                .iter()
                .filter(|slot| matches!(slot, Slot::Owned(_) | Slot::Pending(_)))
                .count()
        };
        owned(self.compressed.as_slice()) + self.uncompressed.as_deref().map_or(0, owned)
    }

    // -- Accessors ----------------------------------------------------------

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn min_version(&self) -> ProtocolVersion {
        self.min
    }

    pub fn max_version(&self) -> ProtocolVersion {
        self.max
    }

    pub fn saves_uncompressed(&self) -> bool {
        self.uncompressed.is_some()
    }

    /// The encoder this cache prepares with.
    pub fn encoder(&self) -> &Arc<PacketEncoder> {
        &self.encoder
    }

    // -- Internal -----------------------------------------------------------

    fn ensure_building(&self) -> Result<(), CacheError> {
        match self.state {
            CacheState::Building => Ok(()),
            other => Err(CacheError::NotBuilding(other)),
        }
    }

    fn clamp(&self, from: ProtocolVersion, to: ProtocolVersion) -> VersionRange {
        ProtocolVersion::range(from.max(self.min), to.min(self.max))
    }

    fn encode_range(
        &mut self,
        packet: &dyn Packet,
        from: ProtocolVersion,
        to: ProtocolVersion,
    ) -> Result<(), CacheError> {
        let versions = self.clamp(from, to);
        if versions.len() == 0 {
            tracing::trace!(
                packet = packet.packet_name(),
                %from,
                %to,
                "prepare range outside cache bounds, skipping"
            );
        }
        for version in versions {
            self.encode_version(packet, version)?;
        }
        Ok(())
    }

    fn encode_version(
        &mut self,
        packet: &dyn Packet,
        version: ProtocolVersion,
    ) -> Result<(), CacheError> {
        let pool = self.encoder.pool();
        let compress = self.encoder.compression_enabled();

        let frame = self.encoder.encode(packet, version, compress, false, pool)?;
        append(&mut self.compressed[version.ordinal()], frame);

        if let Some(uncompressed) = &mut self.uncompressed {
            let frame = self.encoder.encode(packet, version, false, false, pool)?;
            append(&mut uncompressed[version.ordinal()], frame);
        }
        Ok(())
    }
}

impl fmt::Debug for VersionedPacketCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedPacketCache")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("state", &self.state)
            .field("saves_uncompressed", &self.saves_uncompressed())
            .field("distinct_buffers", &self.distinct_buffers())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Slot helpers
// ---------------------------------------------------------------------------

fn empty_table() -> Vec<Slot> {
    std::iter::repeat_with(|| Slot::Empty)
        .take(ProtocolVersion::COUNT)
        .collect()
}

/// The first frame for a version becomes its buffer; later frames are
/// copied onto the end and returned to the pool.
fn append(slot: &mut Slot, frame: PacketBuf) {
    match slot {
        Slot::Pending(buf) => buf.extend_from_slice(&frame),
        _ => *slot = Slot::Pending(frame),
    }
}

/// Trims and freezes every pending buffer, aliasing a buffer onto the
/// previous non-empty version when their bytes match.
fn seal(table: &mut [Slot]) {
    let mut previous: Option<usize> = None;

    for ordinal in 0..table.len() {
        let Slot::Pending(mut buf) = std::mem::replace(&mut table[ordinal], Slot::Empty) else {
            continue;
        };
        buf.trim();

        let duplicate = previous.filter(|&root| {
            matches!(&table[root], Slot::Owned(bytes) if bytes[..] == buf[..])
        });
        table[ordinal] = match duplicate {
            Some(root) => Slot::Aliased(root),
            None => {
                previous = Some(ordinal);
                Slot::Owned(buf.freeze())
            }
        };
    }
}

fn resolve(table: &[Slot], version: ProtocolVersion) -> Option<&Bytes> {
    match &table[version.ordinal()] {
        Slot::Owned(bytes) => Some(bytes),
        Slot::Aliased(root) => match &table[*root] {
            Slot::Owned(bytes) => Some(bytes),
            _ => None,
        },
        Slot::Empty | Slot::Pending(_) => None,
    }
}
