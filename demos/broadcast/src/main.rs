use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use castforge::prelude::*;
use castforge::protocol::{get_var_int, put_string, put_var_int};

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

/// Sent once to every client right after its handshake.
struct Welcome {
    version: ProtocolVersion,
}

impl Packet for Welcome {
    fn encode(&self, buf: &mut Vec<u8>, _: Direction, _: ProtocolVersion) -> Result<(), ProtocolError> {
        put_string(buf, &format!("welcome, you are on {}", self.version));
        Ok(())
    }
}

/// Broadcast to everyone on every tick.
struct ServerStatus {
    tick: u64,
    online: usize,
    motd: String,
}

impl Packet for ServerStatus {
    fn encode(&self, buf: &mut Vec<u8>, _: Direction, version: ProtocolVersion) -> Result<(), ProtocolError> {
        put_var_int(buf, self.tick as i32);
        put_var_int(buf, self.online as i32);
        // Older clients only get a short message.
        if version < ProtocolVersion::V1_13 {
            put_string(buf, self.motd.lines().next().unwrap_or_default());
        } else {
            put_string(buf, &self.motd);
        }
        Ok(())
    }
}

fn registry() -> Result<PacketRegistry, ProtocolError> {
    let mut registry = PacketRegistry::new();
    registry
        .register::<Welcome>(
            Direction::Clientbound,
            &[
                PacketMapping::new(0x02, ProtocolVersion::MINIMUM),
                PacketMapping::new(0x0F, ProtocolVersion::V1_9),
            ],
        )?
        .register::<ServerStatus>(
            Direction::Clientbound,
            &[
                PacketMapping::new(0x47, ProtocolVersion::MINIMUM),
                PacketMapping::new(0x48, ProtocolVersion::V1_9),
                PacketMapping::new(0x4A, ProtocolVersion::V1_13),
            ],
        )?;
    Ok(registry)
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

struct Server {
    factory: PacketFactory,
    group: BroadcastGroup<WebSocketConnection>,
    tick: AtomicU64,
}

/// Reads the handshake, attaches the peer, and keeps it in the group
/// until the client goes away.
async fn handle_connection(conn: WebSocketConnection, server: Arc<Server>) -> Result<(), CastforgeError> {
    let Some(mut handshake) = conn.recv().await? else {
        return Ok(());
    };
    let protocol = get_var_int(&mut handshake)?;
    let Some(version) = ProtocolVersion::from_protocol(protocol) else {
        tracing::debug!(id = %conn.id(), protocol, "unsupported protocol, closing");
        conn.close().await?;
        return Err(ProtocolError::UnknownVersion(protocol).into());
    };

    let mut peer = Peer::new(conn, version);
    peer.attach(&server.factory, server.factory.duplicate_policy())?;
    if version.supports_compression() && server.factory.encoder().compression_enabled() {
        let threshold = server.factory.encoder().settings().threshold;
        peer.notify(ConnectionEvent::CompressionEnabled { threshold });
    }
    peer.send(Outbound::packet(Welcome { version })).await?;

    let peer = Arc::new(peer);
    let id = peer.id();
    server.group.join(Arc::clone(&peer));
    tracing::info!(%id, %version, "client joined");

    // Drain until the client closes; this demo ignores what it says.
    let result = loop {
        match peer.connection().recv().await {
            Ok(Some(_)) => continue,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e.into()),
        }
    };
    server.group.leave(id);
    tracing::info!(%id, "client left");
    result
}

/// Rebuilds and broadcasts the status packet every `interval`.
async fn run_ticker(server: Arc<Server>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut previous: Option<Arc<VersionedPacketCache>> = None;
    loop {
        ticker.tick().await;
        let status = ServerStatus {
            tick: server.tick.fetch_add(1, Ordering::Relaxed),
            online: server.group.len(),
            motd: "Castforge demo server\nNew encode-once pipeline is live.".to_string(),
        };

        let mut cache = server.factory.create_cache(ProtocolVersion::MINIMUM, ProtocolVersion::MAXIMUM);
        if let Err(e) = cache.prepare(&status).and_then(|cache| cache.build()) {
            tracing::error!(error = %e, "failed to prepare status");
            continue;
        }
        let cache = Arc::new(cache);

        let report = server.group.broadcast(&cache).await;
        tracing::debug!(delivered = report.delivered, failed = report.failures.len(), "status broadcast");

        // Nobody holds the last tick's cache once its broadcast returned.
        if let Some(mut old) = previous.replace(cache).and_then(Arc::into_inner) {
            old.release();
        }
    }
}

async fn run(mut transport: WebSocketTransport, server: Arc<Server>, interval: Duration) {
    tokio::spawn(run_ticker(Arc::clone(&server), interval));
    loop {
        match transport.accept().await {
            Ok(conn) => {
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(conn, server).await {
                        tracing::debug!(error = %e, "connection ended with error");
                    }
                });
            }
            Err(e) => tracing::error!(error = %e, "accept failed"),
        }
    }
}

/// Reads the JSON file named by `CASTFORGE_CONFIG`, if set.
fn load_config() -> Result<FactoryConfig, Box<dyn std::error::Error>> {
    match std::env::var("CASTFORGE_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)?;
            Ok(FactoryConfig::from_json(&json)?)
        }
        Err(_) => Ok(FactoryConfig {
            save_uncompressed: true,
            ..FactoryConfig::default()
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    castforge::init_tracing("info,castforge=debug");

    let addr = std::env::args().nth(1).unwrap_or_else(|| "0.0.0.0:8080".to_string());
    let server = Arc::new(Server {
        factory: PacketFactory::new(Arc::new(registry()?), load_config()?),
        group: BroadcastGroup::new(),
        tick: AtomicU64::new(0),
    });
    let transport = WebSocketTransport::bind(&addr).await?;

    tracing::info!(%addr, "broadcast demo running");
    run(transport, server, Duration::from_secs(2)).await;
    Ok(())
}
