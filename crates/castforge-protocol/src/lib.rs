//! Wire protocol vocabulary for Castforge.
//!
//! This crate defines what a packet *is*, independent of how it gets
//! framed, compressed, or cached:
//!
//! - **Versions** ([`ProtocolVersion`]): the finite, ordered set of wire
//!   format revisions a peer can speak.
//! - **Packets** ([`Packet`], [`Direction`], [`Releasable`]): logical
//!   messages that know how to write their own body for a given version.
//! - **Registry** ([`VersionRegistry`], [`PacketRegistry`]): maps a
//!   packet's runtime type to its numeric id for each version.
//! - **VarInts** ([`put_var_int`], [`get_var_int`], ...): the integer
//!   encoding used for ids and length prefixes.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer sits below the encoder. It doesn't know about
//! buffer pools, compression, or connections:
//!
//! ```text
//! Protocol (Packet + id) → Encoder (framed bytes) → Cache / Dispatcher
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod error;
mod packet;
mod registry;
mod varint;
mod version;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::ProtocolError;
pub use packet::{Direction, Packet, Releasable};
pub use registry::{PacketMapping, PacketRegistry, VersionRegistry};
pub use varint::{
    MAX_VAR_INT_LEN, get_string, get_var_int, put_string, put_var_int,
    var_int_len,
};
pub use version::{
    MINIMUM_COMPRESSION_VERSION, ProtocolVersion, VersionRange,
};
