//! The entry point: creates caches and wires dispatchers into connections.

use std::sync::Arc;

use arc_swap::ArcSwap;
use castforge_cache::VersionedPacketCache;
use castforge_encoder::{BufferPool, CodecError, CompressionSettings, PacketBuf, PacketEncoder};
use castforge_protocol::{Packet, ProtocolVersion, VersionRegistry};
use castforge_transport::{Pipeline, TransportError};

use crate::{CompressionListener, DispatchError, DuplicatePolicy, FactoryConfig, Outbound, PacketDispatcher};

/// Name of the dispatcher stage in a connection's pipeline.
pub const PACKET_DISPATCHER: &str = "packet-dispatcher";
/// Name of the compression listener stage.
pub const COMPRESSION_LISTENER: &str = "compression-listener";
/// Name of the stage that hands framed bytes to the connection. The
/// dispatcher is installed right before it.
pub const TRANSPORT_ENCODER: &str = "transport-encoder";

/// The outbound pipeline every connection carries.
pub type OutboundPipeline = Pipeline<Outbound, DispatchError>;

/// Owns the shared encoder and hands it to caches and connections.
///
/// ```rust
/// use std::sync::Arc;
/// use castforge::{FactoryConfig, PacketFactory};
/// use castforge::protocol::{PacketRegistry, ProtocolVersion};
///
/// let factory = PacketFactory::new(Arc::new(PacketRegistry::new()), FactoryConfig::default());
/// let cache = factory.create_cache(ProtocolVersion::V1_8, ProtocolVersion::MAXIMUM);
/// assert_eq!(cache.min_version(), ProtocolVersion::V1_8);
/// ```
pub struct PacketFactory {
    encoder: ArcSwap<PacketEncoder>,
    save_uncompressed: bool,
    duplicate_policy: DuplicatePolicy,
}

impl PacketFactory {
    pub fn new(registry: Arc<dyn VersionRegistry>, config: FactoryConfig) -> Self {
        let encoder = PacketEncoder::new(registry, BufferPool::new(config.pool), config.compression);
        Self {
            encoder: ArcSwap::from_pointee(encoder),
            save_uncompressed: config.save_uncompressed,
            duplicate_policy: config.duplicate_policy,
        }
    }

    /// The encoder new caches and connections will use.
    pub fn encoder(&self) -> Arc<PacketEncoder> {
        self.encoder.load_full()
    }

    pub fn saves_uncompressed(&self) -> bool {
        self.save_uncompressed
    }

    /// The policy [`attach`](Self::attach) callers get by default.
    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    /// Starts a new cache for versions `min..=max`.
    pub fn create_cache(&self, min: ProtocolVersion, max: ProtocolVersion) -> VersionedPacketCache {
        VersionedPacketCache::new(self.encoder(), min, max, self.save_uncompressed)
    }

    /// Encodes one packet outside any cache.
    ///
    /// # Errors
    /// Any [`CodecError`].
    pub fn encode_single(&self, packet: &dyn Packet, version: ProtocolVersion) -> Result<PacketBuf, CodecError> {
        self.encoder.load().encode_single(packet, version)
    }

    /// Replaces the factory's compression settings.
    ///
    /// Caches created and connections attached afterwards pick up the new
    /// encoder. Live connections keep theirs until
    /// [`reconfigure`](Self::reconfigure) is called on them.
    pub fn update_compression(&self, settings: CompressionSettings) {
        let next = self.encoder.load().with_settings(settings);
        tracing::debug!(enabled = next.compression_enabled(), level = next.settings().level, "factory compression updated");
        self.encoder.store(Arc::new(next));
    }

    /// Drops the calling worker's deflate stream.
    pub fn release_worker(&self) -> bool {
        self.encoder.load().release_worker()
    }

    /// Installs a dispatcher and its compression listener into `pipeline`.
    ///
    /// The dispatcher goes right before [`TRANSPORT_ENCODER`], the listener
    /// right after the dispatcher. Nothing is left behind on failure.
    ///
    /// # Errors
    /// - [`TransportError::StageNotFound`] if the pipeline has no
    ///   transport encoder
    /// - [`TransportError::DuplicateStage`] if already attached
    pub fn attach(
        &self,
        pipeline: &mut OutboundPipeline,
        version: ProtocolVersion,
        policy: DuplicatePolicy,
    ) -> Result<Arc<PacketDispatcher>, TransportError> {
        let dispatcher = Arc::new(PacketDispatcher::new(self.encoder(), version, policy, self.save_uncompressed));
        let listener = Arc::new(CompressionListener::new(Arc::clone(&dispatcher)));

        pipeline.add_before(TRANSPORT_ENCODER, PACKET_DISPATCHER, Arc::clone(&dispatcher))?;
        if let Err(e) = pipeline.add_after(PACKET_DISPATCHER, COMPRESSION_LISTENER, listener) {
            let _ = pipeline.remove(PACKET_DISPATCHER);
            return Err(e);
        }

        tracing::debug!(%version, ?policy, "packet dispatcher attached");
        Ok(dispatcher)
    }

    /// Removes the dispatcher and listener, whichever are present.
    ///
    /// Returns `true` if anything was removed.
    pub fn detach(&self, pipeline: &mut OutboundPipeline) -> bool {
        let mut removed = false;
        for name in [PACKET_DISPATCHER, COMPRESSION_LISTENER] {
            if pipeline.contains(name) {
                removed |= pipeline.remove(name).is_ok();
            }
        }
        if removed {
            tracing::debug!("packet dispatcher detached");
        }
        removed
    }

    /// Points a live connection's dispatcher at an encoder with
    /// `settings`. Writes already in progress finish with the old one.
    ///
    /// # Errors
    /// [`TransportError::StageNotFound`] if no dispatcher is attached.
    pub fn reconfigure(&self, pipeline: &OutboundPipeline, settings: CompressionSettings) -> Result<(), TransportError> {
        let dispatcher = attached(pipeline)?;
        dispatcher.swap_encoder(Arc::new(self.encoder.load().with_settings(settings)));
        tracing::debug!(version = %dispatcher.version(), "packet dispatcher reconfigured");
        Ok(())
    }

    /// Forces a connection's dispatcher onto one cache variant.
    ///
    /// # Errors
    /// [`TransportError::StageNotFound`] if no dispatcher is attached.
    pub fn set_send_uncompressed(&self, pipeline: &OutboundPipeline, send_uncompressed: bool) -> Result<(), TransportError> {
        attached(pipeline)?.set_send_uncompressed(send_uncompressed);
        Ok(())
    }
}

impl std::fmt::Debug for PacketFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketFactory")
            .field("encoder", &self.encoder.load_full())
            .field("save_uncompressed", &self.save_uncompressed)
            .field("duplicate_policy", &self.duplicate_policy)
            .finish()
    }
}

fn attached(pipeline: &OutboundPipeline) -> Result<Arc<PacketDispatcher>, TransportError> {
    pipeline
        .get::<PacketDispatcher>(PACKET_DISPATCHER)
        .ok_or_else(|| TransportError::StageNotFound(PACKET_DISPATCHER.to_string()))
}

#[cfg(test)]
mod tests {
    use castforge_protocol::{Direction, PacketMapping, PacketRegistry, ProtocolError, put_string};
    use castforge_transport::{ConnectionEvent, Stage};

    use super::*;

    struct Chat(String);

    impl Packet for Chat {
        fn encode(&self, buf: &mut Vec<u8>, _direction: Direction, _version: ProtocolVersion) -> Result<(), ProtocolError> {
            put_string(buf, &self.0);
            Ok(())
        }
    }

    /// Stands in for the transport's own framing stage.
    struct Sink;

    impl Stage<Outbound> for Sink {
        type Error = DispatchError;

        fn write(&self, message: Outbound) -> Result<Option<Outbound>, DispatchError> {
            Ok(Some(message))
        }
    }

    fn factory(save_uncompressed: bool) -> PacketFactory {
        let mut registry = PacketRegistry::new();
        registry
            .register::<Chat>(Direction::Clientbound, &[PacketMapping::new(0x02, ProtocolVersion::MINIMUM)])
            .unwrap();
        let config = FactoryConfig {
            save_uncompressed,
            compression: CompressionSettings { threshold: 16, ..CompressionSettings::default() },
            ..FactoryConfig::default()
        };
        PacketFactory::new(Arc::new(registry), config)
    }

    fn pipeline() -> OutboundPipeline {
        let mut pipeline = OutboundPipeline::new();
        pipeline.add_last(TRANSPORT_ENCODER, Arc::new(Sink)).unwrap();
        pipeline
    }

    fn chat() -> Chat {
        Chat("welcome to the lobby! ".repeat(12))
    }

    #[test]
    fn test_attach_installs_stages_before_transport_encoder() {
        let factory = factory(false);
        let mut pipeline = pipeline();
        factory.attach(&mut pipeline, ProtocolVersion::V1_12_2, DuplicatePolicy::Share).unwrap();
        assert_eq!(pipeline.names(), vec![PACKET_DISPATCHER, COMPRESSION_LISTENER, TRANSPORT_ENCODER]);
    }

    #[test]
    fn test_attach_twice_returns_duplicate_stage() {
        let factory = factory(false);
        let mut pipeline = pipeline();
        factory.attach(&mut pipeline, ProtocolVersion::V1_12_2, DuplicatePolicy::Share).unwrap();
        let result = factory.attach(&mut pipeline, ProtocolVersion::V1_12_2, DuplicatePolicy::Share);
        assert!(matches!(result, Err(TransportError::DuplicateStage(_))));
        assert_eq!(pipeline.len(), 3);
    }

    #[test]
    fn test_attach_without_transport_encoder_returns_not_found() {
        let factory = factory(false);
        let mut pipeline = OutboundPipeline::new();
        let result = factory.attach(&mut pipeline, ProtocolVersion::V1_8, DuplicatePolicy::Share);
        assert!(matches!(result, Err(TransportError::StageNotFound(_))));
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_attach_rolls_back_when_listener_name_taken() {
        let factory = factory(false);
        let mut pipeline = pipeline();
        pipeline.add_first(COMPRESSION_LISTENER, Arc::new(Sink)).unwrap();
        let result = factory.attach(&mut pipeline, ProtocolVersion::V1_8, DuplicatePolicy::Share);
        assert!(matches!(result, Err(TransportError::DuplicateStage(_))));
        assert!(!pipeline.contains(PACKET_DISPATCHER));
    }

    #[test]
    fn test_attach_starts_with_save_uncompressed() {
        let mut pipeline = pipeline();
        let dispatcher = factory(true).attach(&mut pipeline, ProtocolVersion::V1_8, DuplicatePolicy::Share).unwrap();
        assert!(dispatcher.sends_uncompressed());

        let mut pipeline = self::pipeline();
        let dispatcher = factory(false).attach(&mut pipeline, ProtocolVersion::V1_8, DuplicatePolicy::Share).unwrap();
        assert!(!dispatcher.sends_uncompressed());
    }

    #[test]
    fn test_detach_removes_both_stages() {
        let factory = factory(false);
        let mut pipeline = pipeline();
        factory.attach(&mut pipeline, ProtocolVersion::V1_8, DuplicatePolicy::Share).unwrap();
        assert!(factory.detach(&mut pipeline));
        assert_eq!(pipeline.names(), vec![TRANSPORT_ENCODER]);
        assert!(!factory.detach(&mut pipeline));
    }

    #[test]
    fn test_prepared_cache_flows_through_attached_pipeline() {
        let factory = factory(true);
        let version = ProtocolVersion::V1_16_4;
        let mut cache = factory.create_cache(ProtocolVersion::V1_8, ProtocolVersion::MAXIMUM);
        cache.prepare(&chat()).unwrap().build().unwrap();
        let cache = Arc::new(cache);

        let mut pipeline = pipeline();
        factory.attach(&mut pipeline, version, DuplicatePolicy::Share).unwrap();

        let first = pipeline.write(Outbound::Prepared(Arc::clone(&cache))).unwrap();
        assert!(matches!(first, Some(Outbound::Raw(ref b)) if b == cache.uncompressed_packets(version).unwrap()));

        pipeline.fire_event(&ConnectionEvent::CompressionEnabled { threshold: 16 });
        let second = pipeline.write(Outbound::Prepared(Arc::clone(&cache))).unwrap();
        assert!(matches!(second, Some(Outbound::Raw(ref b)) if b == cache.packets(version).unwrap()));
    }

    #[test]
    fn test_reconfigure_swaps_dispatcher_encoder() {
        let factory = factory(false);
        let mut pipeline = pipeline();
        let dispatcher = factory.attach(&mut pipeline, ProtocolVersion::V1_12_2, DuplicatePolicy::Share).unwrap();
        assert!(dispatcher.encoder().compression_enabled());

        factory.reconfigure(&pipeline, CompressionSettings::disabled()).unwrap();
        assert!(!dispatcher.encoder().compression_enabled());
        assert!(factory.encoder().compression_enabled());
    }

    #[test]
    fn test_reconfigure_without_dispatcher_returns_not_found() {
        let factory = factory(false);
        let result = factory.reconfigure(&pipeline(), CompressionSettings::disabled());
        assert!(matches!(result, Err(TransportError::StageNotFound(_))));
    }

    #[test]
    fn test_update_compression_affects_new_caches_only() {
        let factory = factory(false);
        let before = factory.create_cache(ProtocolVersion::V1_8, ProtocolVersion::V1_12_2);
        factory.update_compression(CompressionSettings::disabled());
        let after = factory.create_cache(ProtocolVersion::V1_8, ProtocolVersion::V1_12_2);

        assert!(before.encoder().compression_enabled());
        assert!(!after.encoder().compression_enabled());
    }

    #[test]
    fn test_set_send_uncompressed_flips_attached_dispatcher() {
        let factory = factory(false);
        let mut pipeline = pipeline();
        let dispatcher = factory.attach(&mut pipeline, ProtocolVersion::V1_8, DuplicatePolicy::Copy).unwrap();
        factory.set_send_uncompressed(&pipeline, true).unwrap();
        assert!(dispatcher.sends_uncompressed());
    }

    #[test]
    fn test_encode_single_matches_encoder_output() {
        let factory = factory(false);
        let frame = factory.encode_single(&chat(), ProtocolVersion::V1_12_2).unwrap();
        let direct = factory.encoder().encode_single(&chat(), ProtocolVersion::V1_12_2).unwrap();
        assert_eq!(frame.as_slice(), direct.as_slice());
    }
}
