//! The packet abstraction: a logical message that can write its own body.

use std::any::TypeId;

use crate::{ProtocolError, ProtocolVersion};

/// Which way a packet travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Server → client.
    Clientbound,
    /// Client → server.
    Serverbound,
}

/// A logical message that knows how to serialize its body.
///
/// The packet id is *not* written by the packet itself; the encoder looks
/// it up in a [`VersionRegistry`](crate::VersionRegistry) using
/// [`packet_type`](Self::packet_type) and writes it before calling
/// [`encode`](Self::encode).
///
/// `Send + Sync + 'static` because packets are encoded from whichever
/// worker thread drives a connection, and prepared packets may be built
/// on one thread and read on many.
pub trait Packet: Send + Sync + 'static {
    /// Writes this packet's body (everything after the id) for `version`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the body can't be represented
    /// in this version.
    fn encode(
        &self,
        buf: &mut Vec<u8>,
        direction: Direction,
        version: ProtocolVersion,
    ) -> Result<(), ProtocolError>;

    /// The runtime type used for registry lookups.
    ///
    /// The default is monomorphized per implementing type, so calling it
    /// through `&dyn Packet` still yields the concrete type. Wrappers
    /// must forward it.
    fn packet_type(&self) -> TypeId {
        TypeId::of::<Self>()
    }

    /// A name for diagnostics.
    fn packet_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the packet's external resource, if it holds one that must
    /// be released once the body has been copied out.
    fn as_releasable(&self) -> Option<&dyn Releasable> {
        None
    }
}

/// A resource held by a packet that should be released after encoding,
/// e.g. a shared raw payload.
///
/// Implementations must tolerate repeated calls; only the first release
/// has an effect.
pub trait Releasable {
    /// Releases the resource.
    fn release(&self);
}

impl<P: Packet + ?Sized> Packet for Box<P> {
    fn encode(
        &self,
        buf: &mut Vec<u8>,
        direction: Direction,
        version: ProtocolVersion,
    ) -> Result<(), ProtocolError> {
        (**self).encode(buf, direction, version)
    }

    fn packet_type(&self) -> TypeId {
        (**self).packet_type()
    }

    fn packet_name(&self) -> &'static str {
        (**self).packet_name()
    }

    fn as_releasable(&self) -> Option<&dyn Releasable> {
        (**self).as_releasable()
    }
}
