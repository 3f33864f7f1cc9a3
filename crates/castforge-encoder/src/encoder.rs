//! The packet encoder: registry id, body, framing.
//!
//! [`PacketEncoder`] is the one place a logical packet becomes wire bytes.
//! Both the versioned cache (which calls it once per version) and the
//! per-connection dispatcher (which calls it for one-off packets) go
//! through it, so both produce byte-identical frames for the same input.
//!
//! # Encoding steps
//!
//! ```text
//! 1. registry lookup     Packet + version ──→ id (or UnknownPacket)
//! 2. body                [VarInt id][body]    (pooled buffer)
//! 3. release             packet.as_releasable().release()  (optional)
//! 4. frame               plain:  [len][id][body]
//!                        zlib:   [len][data len][deflate(id + body)]
//! ```
//!
//! The id is looked up *before* a buffer is acquired, so an unknown
//! packet costs no allocation and leaves the pool's outstanding count
//! unchanged.

use std::fmt;
use std::sync::Arc;

use castforge_protocol::{Direction, Packet, ProtocolVersion, VersionRegistry, put_var_int};

use crate::{
    BufferPool, CodecError, CompressionSettings, PacketBuf, WorkerCompressors,
    frame_compressed, frame_plain,
};

/// Encodes packets into framed, optionally compressed buffers.
///
/// `PacketEncoder` is `Send + Sync` and meant to be shared behind an
/// `Arc`. The only per-thread state (the deflate stream) lives in
/// [`WorkerCompressors`].
pub struct PacketEncoder {
    registry: Arc<dyn VersionRegistry>,
    pool: BufferPool,
    settings: CompressionSettings,
    compressors: WorkerCompressors,
}

impl PacketEncoder {
    /// Creates an encoder over `registry` that allocates from `pool`.
    pub fn new(
        registry: Arc<dyn VersionRegistry>,
        pool: BufferPool,
        settings: CompressionSettings,
    ) -> Self {
        Self {
            registry,
            pool,
            settings,
            compressors: WorkerCompressors::new(),
        }
    }

    /// Returns a copy of this encoder with different compression settings.
    ///
    /// The copy shares the registry, the pool, and the worker compressors,
    /// so swapping encoders at runtime doesn't strand deflate streams.
    pub fn with_settings(&self, settings: CompressionSettings) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            pool: self.pool.clone(),
            settings,
            compressors: self.compressors.clone(),
        }
    }

    /// The active compression settings.
    pub fn settings(&self) -> &CompressionSettings {
        &self.settings
    }

    /// Whether [`encode_single`](Self::encode_single) produces compressed
    /// frames (for versions that support them).
    pub fn compression_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// The pool this encoder allocates from by default.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// The registry used for id lookups.
    pub fn registry(&self) -> &Arc<dyn VersionRegistry> {
        &self.registry
    }

    /// Writes `[VarInt id][body]` for `packet` in `version`, unframed.
    ///
    /// # Errors
    /// - [`CodecError::UnknownPacket`] if the registry has no id (nothing
    ///   is allocated in that case)
    /// - [`CodecError::Protocol`] if the packet can't write its body
    pub fn encode_body(
        &self,
        packet: &dyn Packet,
        version: ProtocolVersion,
        pool: &BufferPool,
    ) -> Result<PacketBuf, CodecError> {
        let id = self
            .registry
            .packet_id(packet, Direction::Clientbound, version)
            .ok_or_else(|| CodecError::UnknownPacket {
                packet: packet.packet_name(),
                version,
            })?;

        let mut buf = pool.acquire();
        put_var_int(buf.as_mut_vec(), id);
        packet.encode(buf.as_mut_vec(), Direction::Clientbound, version)?;
        Ok(buf)
    }

    /// Encodes one packet for one version into a complete frame.
    ///
    /// - `compress`: use the compressed framing, if `version` supports it.
    ///   Versions older than the first compression-capable one always get
    ///   the plain framing.
    /// - `release_after`: release the packet's external resource once its
    ///   body has been written.
    ///
    /// The returned buffer is exclusively owned by the caller.
    ///
    /// # Errors
    /// Any [`CodecError`]. A failed encode returns every buffer it took to
    /// `pool`.
    pub fn encode(
        &self,
        packet: &dyn Packet,
        version: ProtocolVersion,
        compress: bool,
        release_after: bool,
        pool: &BufferPool,
    ) -> Result<PacketBuf, CodecError> {
        let body = self.encode_body(packet, version, pool)?;

        if release_after {
            if let Some(resource) = packet.as_releasable() {
                resource.release();
            }
        }

        if compress && version.supports_compression() {
            let level = self.settings.effective_level();
            let threshold = self.settings.threshold;
            self.compressors.with_compressor(level, |compressor| {
                frame_compressed(body, threshold, compressor, pool)
            })
        } else {
            frame_plain(body, pool)
        }
    }

    /// Encodes a one-off packet with this encoder's own settings and pool,
    /// releasing its resource afterwards.
    ///
    /// # Errors
    /// Any [`CodecError`].
    pub fn encode_single(
        &self,
        packet: &dyn Packet,
        version: ProtocolVersion,
    ) -> Result<PacketBuf, CodecError> {
        self.encode(packet, version, self.settings.enabled, true, &self.pool)
    }

    /// Tears down the calling worker's deflate stream. Call this from a
    /// worker thread that is about to retire.
    pub fn release_worker(&self) -> bool {
        self.compressors.release_current_worker()
    }
}

impl fmt::Debug for PacketEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketEncoder")
            .field("settings", &self.settings)
            .field("pool", &self.pool)
            .field("compressors", &self.compressors)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use castforge_protocol::{PacketMapping, PacketRegistry, ProtocolError, Releasable};

    use super::*;

    struct Chat(&'static str);

    impl Packet for Chat {
        fn encode(
            &self,
            buf: &mut Vec<u8>,
            _direction: Direction,
            _version: ProtocolVersion,
        ) -> Result<(), ProtocolError> {
            castforge_protocol::put_string(buf, self.0);
            Ok(())
        }
    }

    struct Unregistered;

    impl Packet for Unregistered {
        fn encode(
            &self,
            _buf: &mut Vec<u8>,
            _direction: Direction,
            _version: ProtocolVersion,
        ) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Payload {
        releases: AtomicUsize,
    }

    impl Releasable for Payload {
        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Packet for Payload {
        fn encode(
            &self,
            buf: &mut Vec<u8>,
            _direction: Direction,
            _version: ProtocolVersion,
        ) -> Result<(), ProtocolError> {
            buf.push(0xAB);
            Ok(())
        }

        fn as_releasable(&self) -> Option<&dyn Releasable> {
            Some(self)
        }
    }

    fn encoder(settings: CompressionSettings) -> PacketEncoder {
        let mut registry = PacketRegistry::new();
        registry
            .register::<Chat>(
                Direction::Clientbound,
                &[
                    PacketMapping::new(0x02, ProtocolVersion::V1_7_2),
                    PacketMapping::new(0x0F, ProtocolVersion::V1_9),
                ],
            )
            .unwrap()
            .register::<Payload>(
                Direction::Clientbound,
                &[PacketMapping::new(0x3F, ProtocolVersion::V1_7_2)],
            )
            .unwrap();
        PacketEncoder::new(Arc::new(registry), BufferPool::default(), settings)
    }

    #[test]
    fn test_encode_plain_writes_length_id_body() {
        let encoder = encoder(CompressionSettings::disabled());
        let pool = encoder.pool().clone();
        let frame = encoder
            .encode(&Chat("hi"), ProtocolVersion::V1_8, false, false, &pool)
            .unwrap();

        assert_eq!(frame.as_slice(), &[0x04, 0x02, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_encode_uses_version_specific_id() {
        let encoder = encoder(CompressionSettings::disabled());
        let pool = encoder.pool().clone();
        let frame = encoder
            .encode(&Chat("hi"), ProtocolVersion::V1_12_2, false, false, &pool)
            .unwrap();

        assert_eq!(frame[1], 0x0F);
    }

    #[test]
    fn test_encode_compress_on_old_version_stays_plain() {
        let encoder = encoder(CompressionSettings::default());
        let pool = encoder.pool().clone();
        let frame = encoder
            .encode(&Chat("hi"), ProtocolVersion::V1_7_6, true, false, &pool)
            .unwrap();

        assert_eq!(frame.as_slice(), &[0x04, 0x02, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_encode_compress_below_threshold_adds_zero_marker() {
        let encoder = encoder(CompressionSettings::default());
        let pool = encoder.pool().clone();
        let frame = encoder
            .encode(&Chat("hi"), ProtocolVersion::V1_8, true, false, &pool)
            .unwrap();

        assert_eq!(frame.as_slice(), &[0x05, 0x00, 0x02, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_encode_unknown_packet_returns_error_without_allocating() {
        let encoder = encoder(CompressionSettings::default());
        let pool = encoder.pool().clone();

        let result =
            encoder.encode(&Unregistered, ProtocolVersion::V1_8, true, true, &pool);
        assert!(matches!(
            result,
            Err(CodecError::UnknownPacket {
                version: ProtocolVersion::V1_8,
                ..
            })
        ));
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.stats().allocations, 0);
    }

    #[test]
    fn test_encode_release_after_releases_resource() {
        let encoder = encoder(CompressionSettings::disabled());
        let pool = encoder.pool().clone();
        let payload = Payload::default();

        encoder
            .encode(&payload, ProtocolVersion::V1_8, false, false, &pool)
            .unwrap();
        assert_eq!(payload.releases.load(Ordering::SeqCst), 0);

        encoder
            .encode(&payload, ProtocolVersion::V1_8, false, true, &pool)
            .unwrap();
        assert_eq!(payload.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_encode_single_follows_settings_and_releases() {
        let encoder = encoder(CompressionSettings::default());
        let payload = Payload::default();
        let frame = encoder.encode_single(&payload, ProtocolVersion::V1_8).unwrap();

        assert_eq!(frame.as_slice(), &[0x03, 0x00, 0x3F, 0xAB]);
        assert_eq!(payload.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_encode_leaves_only_the_frame_outstanding() {
        let encoder = encoder(CompressionSettings {
            threshold: 0,
            ..CompressionSettings::default()
        });
        let pool = encoder.pool().clone();
        let frame = encoder
            .encode(&Chat("compressed"), ProtocolVersion::V1_12_2, true, false, &pool)
            .unwrap();

        assert_eq!(pool.outstanding(), 1);
        drop(frame);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_with_settings_shares_worker_compressors() {
        let encoder = encoder(CompressionSettings::default());
        let swapped = encoder.with_settings(CompressionSettings::disabled());
        assert!(!swapped.compression_enabled());

        encoder
            .encode(&Chat("x"), ProtocolVersion::V1_8, true, false, encoder.pool())
            .unwrap();
        assert!(swapped.release_worker());
        assert!(!encoder.release_worker());
    }
}
