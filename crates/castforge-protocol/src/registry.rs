//! Version registry: which numeric id a packet type has in each version.

use std::any::TypeId;
use std::collections::HashMap;

use crate::{Direction, Packet, ProtocolError, ProtocolVersion};

/// Maps a packet's runtime type + protocol version to its wire id.
///
/// A registry must cover every version a cache targets. A missing entry
/// is a configuration error that surfaces as an encode failure, never as
/// a silently dropped packet or a guessed id.
pub trait VersionRegistry: Send + Sync + 'static {
    /// Returns the id of `packet` in `version`, or `None` if the packet
    /// type isn't registered for that version and direction.
    fn packet_id(
        &self,
        packet: &dyn Packet,
        direction: Direction,
        version: ProtocolVersion,
    ) -> Option<i32>;
}

// ---------------------------------------------------------------------------
// PacketMapping
// ---------------------------------------------------------------------------

/// The id a packet type uses starting at `since`.
///
/// A mapping stays in effect until the next mapping's `since`, or until
/// `until` (inclusive) if one is set. Packets that were removed from the
/// protocol get an `until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMapping {
    id: i32,
    since: ProtocolVersion,
    until: Option<ProtocolVersion>,
}

impl PacketMapping {
    /// Creates a mapping that applies from `since` onward.
    pub const fn new(id: i32, since: ProtocolVersion) -> Self {
        Self {
            id,
            since,
            until: None,
        }
    }

    /// Limits the mapping to versions up to and including `last`.
    pub const fn until(mut self, last: ProtocolVersion) -> Self {
        self.until = Some(last);
        self
    }

    /// The packet id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// The first version this mapping applies to.
    pub fn since(&self) -> ProtocolVersion {
        self.since
    }
}

// ---------------------------------------------------------------------------
// PacketRegistry
// ---------------------------------------------------------------------------

/// A [`VersionRegistry`] backed by per-direction mapping tables.
///
/// ```rust
/// use castforge_protocol::{
///     Direction, PacketMapping, PacketRegistry, ProtocolVersion,
/// };
/// # use castforge_protocol::{Packet, ProtocolError};
/// # struct KeepAlive;
/// # impl Packet for KeepAlive {
/// #     fn encode(&self, _: &mut Vec<u8>, _: Direction, _: ProtocolVersion)
/// #         -> Result<(), ProtocolError> { Ok(()) }
/// # }
///
/// let mut registry = PacketRegistry::new();
/// registry
///     .register::<KeepAlive>(
///         Direction::Clientbound,
///         &[
///             PacketMapping::new(0x00, ProtocolVersion::V1_7_2),
///             PacketMapping::new(0x1F, ProtocolVersion::V1_9),
///         ],
///     )
///     .unwrap();
///
/// assert_eq!(
///     registry.lookup::<KeepAlive>(Direction::Clientbound, ProtocolVersion::V1_8),
///     Some(0x00)
/// );
/// ```
#[derive(Debug, Default)]
pub struct PacketRegistry {
    clientbound: HashMap<TypeId, Vec<PacketMapping>>,
    serverbound: HashMap<TypeId, Vec<PacketMapping>>,
}

impl PacketRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the id history of packet type `P` for `direction`.
    ///
    /// `mappings` must be non-empty and sorted by strictly increasing
    /// `since`. Registering the same type twice replaces its mappings.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMapping`] if the list breaks those
    /// rules or a mapping's `until` precedes its `since`.
    pub fn register<P: Packet>(
        &mut self,
        direction: Direction,
        mappings: &[PacketMapping],
    ) -> Result<&mut Self, ProtocolError> {
        let name = std::any::type_name::<P>();
        if mappings.is_empty() {
            return Err(ProtocolError::InvalidMapping(format!(
                "{name} has no mappings"
            )));
        }
        if mappings.windows(2).any(|w| w[0].since >= w[1].since) {
            return Err(ProtocolError::InvalidMapping(format!(
                "{name} mappings are not sorted by version"
            )));
        }
        if let Some(bad) = mappings
            .iter()
            .find(|m| m.until.is_some_and(|until| until < m.since))
        {
            return Err(ProtocolError::InvalidMapping(format!(
                "{name} mapping for id {:#04x} ends before it starts",
                bad.id
            )));
        }

        self.table_mut(direction)
            .insert(TypeId::of::<P>(), mappings.to_vec());
        Ok(self)
    }

    /// Looks up the id of packet type `P`.
    pub fn lookup<P: Packet>(
        &self,
        direction: Direction,
        version: ProtocolVersion,
    ) -> Option<i32> {
        self.lookup_type(TypeId::of::<P>(), direction, version)
    }

    /// Returns every version in `from..=to` where `P` has no id.
    pub fn missing_versions<P: Packet>(
        &self,
        direction: Direction,
        from: ProtocolVersion,
        to: ProtocolVersion,
    ) -> Vec<ProtocolVersion> {
        ProtocolVersion::range(from, to)
            .filter(|&version| self.lookup::<P>(direction, version).is_none())
            .collect()
    }

    fn lookup_type(
        &self,
        packet_type: TypeId,
        direction: Direction,
        version: ProtocolVersion,
    ) -> Option<i32> {
        let mappings = self.table(direction).get(&packet_type)?;
        // Mappings are sorted, so the last one that started at or before
        // `version` is the one in effect.
        let mapping = mappings.iter().rev().find(|m| m.since <= version)?;
        match mapping.until {
            Some(until) if version > until => None,
            _ => Some(mapping.id),
        }
    }

    fn table(&self, direction: Direction) -> &HashMap<TypeId, Vec<PacketMapping>> {
        match direction {
            Direction::Clientbound => &self.clientbound,
            Direction::Serverbound => &self.serverbound,
        }
    }

    fn table_mut(
        &mut self,
        direction: Direction,
    ) -> &mut HashMap<TypeId, Vec<PacketMapping>> {
        match direction {
            Direction::Clientbound => &mut self.clientbound,
            Direction::Serverbound => &mut self.serverbound,
        }
    }
}

impl VersionRegistry for PacketRegistry {
    fn packet_id(
        &self,
        packet: &dyn Packet,
        direction: Direction,
        version: ProtocolVersion,
    ) -> Option<i32> {
        self.lookup_type(packet.packet_type(), direction, version)
    }
}
