//! A connection paired with its protocol version and outbound pipeline.

use std::sync::Arc;

use castforge_protocol::ProtocolVersion;
use castforge_transport::{Connection, ConnectionEvent, ConnectionId, Stage, TransportError};

use crate::factory::{OutboundPipeline, TRANSPORT_ENCODER};
use crate::{CastforgeError, DispatchError, DuplicatePolicy, Outbound, PacketDispatcher, PacketFactory};

/// The last stage of every peer's pipeline. Only framed bytes get past
/// it; anything still needing an encoder is an error here.
struct WireStage;

impl Stage<Outbound> for WireStage {
    type Error = DispatchError;

    fn write(&self, message: Outbound) -> Result<Option<Outbound>, DispatchError> {
        match message {
            raw @ Outbound::Raw(_) => Ok(Some(raw)),
            Outbound::Placeholder => Ok(None),
            other => Err(DispatchError::Unencoded(other.kind())),
        }
    }
}

/// One remote client.
///
/// The version is fixed for the peer's lifetime. Attach a dispatcher with
/// [`attach`](Self::attach) before sharing the peer, then send through
/// `&self` from anywhere.
pub struct Peer<C: Connection> {
    connection: C,
    version: ProtocolVersion,
    pipeline: OutboundPipeline,
}

impl<C: Connection> Peer<C> {
    /// Wraps `connection` with a pipeline holding only the wire stage.
    pub fn new(connection: C, version: ProtocolVersion) -> Self {
        let mut pipeline = OutboundPipeline::new();
        // A fresh pipeline has no stage names to collide with.
        let _ = pipeline.add_last(TRANSPORT_ENCODER, Arc::new(WireStage));
        Self {
            connection,
            version,
            pipeline,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn pipeline(&self) -> &OutboundPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut OutboundPipeline {
        &mut self.pipeline
    }

    /// Attaches a dispatcher from `factory` for this peer's version.
    ///
    /// # Errors
    /// [`TransportError::DuplicateStage`] if one is already attached.
    pub fn attach(
        &mut self,
        factory: &PacketFactory,
        policy: DuplicatePolicy,
    ) -> Result<Arc<PacketDispatcher>, TransportError> {
        factory.attach(&mut self.pipeline, self.version, policy)
    }

    /// Runs `message` through the pipeline and writes the result.
    ///
    /// Returns `false` if a stage dropped the message and nothing was
    /// written.
    ///
    /// # Errors
    /// - [`CastforgeError::Dispatch`] if a stage rejected the message
    /// - [`CastforgeError::Connection`] if the write failed
    pub async fn send(&self, message: Outbound) -> Result<bool, CastforgeError> {
        let bytes = match self.pipeline.write(message)? {
            Some(Outbound::Raw(bytes)) => bytes,
            Some(other) => return Err(DispatchError::Unencoded(other.kind()).into()),
            None => return Ok(false),
        };
        self.connection
            .send(bytes)
            .await
            .map_err(|e| CastforgeError::Connection(Box::new(e)))?;
        Ok(true)
    }

    /// Tells every stage about a change in the connection's state.
    pub fn notify(&self, event: ConnectionEvent) {
        tracing::debug!(id = %self.id(), ?event, "connection event");
        self.pipeline.fire_event(&event);
    }
}

impl<C: Connection> std::fmt::Debug for Peer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id())
            .field("version", &self.version)
            .field("pipeline", &self.pipeline.names())
            .finish()
    }
}
