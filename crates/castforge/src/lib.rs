//! # Castforge
//!
//! Encode-once packet broadcasting for servers whose clients speak many
//! protocol versions.
//!
//! A packet sent to a thousand clients on twelve versions should be
//! encoded twelve times, not a thousand. Castforge prepares a
//! [`VersionedPacketCache`] holding one framed (and optionally
//! compressed) buffer per version, then a per-connection
//! [`PacketDispatcher`] hands each client the buffer for its version.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use castforge::prelude::*;
//!
//! # fn registry() -> PacketRegistry { PacketRegistry::new() }
//! # async fn run(mut peer: Peer<WebSocketConnection>, motd: impl Packet) -> Result<(), CastforgeError> {
//! let factory = PacketFactory::new(Arc::new(registry()), FactoryConfig::default());
//!
//! let mut cache = factory.create_cache(ProtocolVersion::MINIMUM, ProtocolVersion::MAXIMUM);
//! cache.prepare(&motd)?.build()?;
//! let cache = Arc::new(cache);
//!
//! peer.attach(&factory, DuplicatePolicy::Share)?;
//! peer.send(Outbound::Prepared(cache)).await?;
//! # Ok(())
//! # }
//! ```

#![allow(async_fn_in_trait)]

mod broadcast;
mod config;
mod dispatch;
mod error;
mod factory;
mod peer;

pub use broadcast::{BroadcastGroup, BroadcastReport};
pub use config::FactoryConfig;
pub use dispatch::{CompressionListener, DispatchError, DuplicatePolicy, Outbound, PacketDispatcher};
pub use error::CastforgeError;
pub use factory::{
    COMPRESSION_LISTENER, OutboundPipeline, PACKET_DISPATCHER, PacketFactory, TRANSPORT_ENCODER,
};
pub use peer::Peer;

pub use castforge_cache as cache;
pub use castforge_encoder as encoder;
pub use castforge_protocol as protocol;
pub use castforge_transport as transport;

pub use castforge_cache::{CacheState, VersionedPacketCache};

/// Installs a `tracing` subscriber that prints to stderr.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies (for
/// example `"info,castforge=debug"`). Does nothing if a global subscriber
/// is already installed.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Common imports for applications.
pub mod prelude {
    pub use crate::{
        BroadcastGroup, BroadcastReport, CastforgeError, DuplicatePolicy, FactoryConfig, Outbound,
        PacketDispatcher, PacketFactory, Peer, VersionedPacketCache,
    };
    pub use castforge_encoder::{CompressionSettings, PoolConfig};
    pub use castforge_protocol::{
        Direction, Packet, PacketMapping, PacketRegistry, ProtocolError, ProtocolVersion,
    };
    pub use castforge_transport::{
        Connection, ConnectionEvent, ConnectionId, Transport, WebSocketConnection, WebSocketTransport,
    };
}
