//! Integration tests: frames produced by the encoder decode back to the
//! packet's id and body on the receiving side.

use std::sync::Arc;

use bytes::{Buf, Bytes};
use castforge_encoder::{
    BufferPool, CodecError, CompressionSettings, PacketEncoder, inflate_frame, next_frame,
};
use castforge_protocol::{
    Direction, Packet, PacketMapping, PacketRegistry, ProtocolError, ProtocolVersion,
    get_string, get_var_int, put_string,
};

// =========================================================================
// Test packet: a server list description, long enough to compress.
// =========================================================================

struct StatusResponse {
    json: String,
}

impl Packet for StatusResponse {
    fn encode(
        &self,
        buf: &mut Vec<u8>,
        _direction: Direction,
        _version: ProtocolVersion,
    ) -> Result<(), ProtocolError> {
        put_string(buf, &self.json);
        Ok(())
    }
}

fn status(repeat: usize) -> StatusResponse {
    StatusResponse {
        json: format!(r#"{{"description":"{}"}}"#, "castforge ".repeat(repeat)),
    }
}

fn encoder(settings: CompressionSettings) -> PacketEncoder {
    let mut registry = PacketRegistry::new();
    registry
        .register::<StatusResponse>(
            Direction::Clientbound,
            &[PacketMapping::new(0x00, ProtocolVersion::MINIMUM)],
        )
        .unwrap();
    PacketEncoder::new(Arc::new(registry), BufferPool::default(), settings)
}

/// Reads `[id][string]` back out of an unframed payload.
fn decode_status(mut payload: Bytes) -> (i32, String) {
    let id = get_var_int(&mut payload).unwrap();
    let json = get_string(&mut payload).unwrap();
    assert!(!payload.has_remaining());
    (id, json)
}

// =========================================================================
// Tests
// =========================================================================

#[test]
fn test_plain_frame_decodes_to_id_and_body() {
    let encoder = encoder(CompressionSettings::disabled());
    let packet = status(3);
    let frame = encoder.encode_single(&packet, ProtocolVersion::V1_8).unwrap();

    let mut wire = frame.freeze();
    let payload = next_frame(&mut wire).unwrap().unwrap();
    assert!(wire.is_empty());

    let (id, json) = decode_status(payload);
    assert_eq!(id, 0x00);
    assert_eq!(json, packet.json);
}

#[test]
fn test_compressed_frame_inflates_to_id_and_body() {
    let encoder = encoder(CompressionSettings {
        threshold: 64,
        ..CompressionSettings::default()
    });
    let packet = status(200);
    let frame = encoder.encode_single(&packet, ProtocolVersion::V1_20_5).unwrap();
    assert!(frame.len() < packet.json.len());

    let mut wire = frame.freeze();
    let body = next_frame(&mut wire).unwrap().unwrap();
    let (id, json) = decode_status(inflate_frame(body).unwrap());
    assert_eq!(id, 0x00);
    assert_eq!(json, packet.json);
}

#[test]
fn test_compressed_and_plain_differ_in_length_for_large_packets() {
    let encoder = encoder(CompressionSettings::default());
    let pool = encoder.pool().clone();
    let packet = status(500);

    let plain = encoder
        .encode(&packet, ProtocolVersion::V1_16, false, false, &pool)
        .unwrap();
    let compressed = encoder
        .encode(&packet, ProtocolVersion::V1_16, true, false, &pool)
        .unwrap();
    assert!(compressed.len() < plain.len());
}

#[test]
fn test_several_frames_in_one_stream_split_in_order() {
    let encoder = encoder(CompressionSettings::default());
    let mut stream = Vec::new();
    for repeat in [1, 50, 2] {
        let frame = encoder
            .encode_single(&status(repeat), ProtocolVersion::V1_12_2)
            .unwrap();
        stream.extend_from_slice(&frame);
    }

    let mut wire = Bytes::from(stream);
    let mut lengths = Vec::new();
    while let Some(body) = next_frame(&mut wire).unwrap() {
        let (_, json) = decode_status(inflate_frame(body).unwrap());
        lengths.push(json.len());
    }
    assert_eq!(
        lengths,
        vec![status(1).json.len(), status(50).json.len(), status(2).json.len()]
    );
}

#[test]
fn test_encoding_from_many_workers_uses_private_compressors() {
    let encoder = Arc::new(encoder(CompressionSettings {
        threshold: 0,
        ..CompressionSettings::default()
    }));
    let expected = encoder
        .encode_single(&status(40), ProtocolVersion::V1_19_4)
        .unwrap()
        .freeze();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let encoder = Arc::clone(&encoder);
            let expected = expected.clone();
            scope.spawn(move || {
                for _ in 0..50 {
                    let frame = encoder
                        .encode_single(&status(40), ProtocolVersion::V1_19_4)
                        .unwrap();
                    assert_eq!(frame.as_slice(), &expected[..]);
                }
                assert!(encoder.release_worker());
            });
        }
    });
}

#[test]
fn test_unknown_packet_in_version_leaves_pool_untouched() {
    let mut registry = PacketRegistry::new();
    registry
        .register::<StatusResponse>(
            Direction::Clientbound,
            &[PacketMapping::new(0x00, ProtocolVersion::V1_13)],
        )
        .unwrap();
    let pool = BufferPool::default();
    let encoder =
        PacketEncoder::new(Arc::new(registry), pool.clone(), CompressionSettings::default());

    let before = pool.stats();
    let err = encoder
        .encode(&status(1), ProtocolVersion::V1_12_2, true, true, &pool)
        .unwrap_err();
    assert!(matches!(err, CodecError::UnknownPacket { .. }));
    assert!(err.to_string().contains("1.12.2"));
    assert_eq!(pool.stats(), before);
}
