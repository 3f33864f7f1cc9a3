//! Sending one prepared packet set to many peers.
//!
//! The cache is encoded once per version up front. Broadcasting then costs
//! one lookup and one refcount bump (or copy, per the peer's policy) per
//! peer, whatever version each peer speaks.

use std::collections::HashMap;
use std::sync::Arc;

use castforge_cache::VersionedPacketCache;
use castforge_transport::{Connection, ConnectionId};
use futures_util::future::join_all;
use parking_lot::Mutex;

use crate::{CastforgeError, Outbound, Peer};

/// The outcome of one [`BroadcastGroup::broadcast`].
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Peers that were written to.
    pub delivered: usize,
    /// Peers whose pipeline dropped the message.
    pub dropped: usize,
    /// Peers the write failed for, and why.
    pub failures: Vec<(ConnectionId, CastforgeError)>,
}

impl BroadcastReport {
    /// Whether every peer got the message or deliberately dropped it.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A set of peers that receive the same broadcasts.
pub struct BroadcastGroup<C: Connection> {
    peers: Mutex<HashMap<ConnectionId, Arc<Peer<C>>>>,
}

impl<C: Connection> BroadcastGroup<C> {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Adds `peer`. Returns the peer it replaced, if its id was taken.
    pub fn join(&self, peer: Arc<Peer<C>>) -> Option<Arc<Peer<C>>> {
        let id = peer.id();
        let previous = self.peers.lock().insert(id, peer);
        tracing::debug!(%id, "peer joined broadcast group");
        previous
    }

    /// Removes the peer with `id`.
    pub fn leave(&self, id: ConnectionId) -> Option<Arc<Peer<C>>> {
        let removed = self.peers.lock().remove(&id);
        if removed.is_some() {
            tracing::debug!(%id, "peer left broadcast group");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    /// Sends `cache` to every peer concurrently.
    ///
    /// A failing peer doesn't stop the others; its error lands in the
    /// report. Peers joining or leaving meanwhile are unaffected, since
    /// the broadcast works on a snapshot of the group.
    pub async fn broadcast(&self, cache: &Arc<VersionedPacketCache>) -> BroadcastReport {
        let peers: Vec<Arc<Peer<C>>> = self.peers.lock().values().cloned().collect();

        let sends = peers.iter().map(|peer| {
            let message = Outbound::Prepared(Arc::clone(cache));
            async move { (peer.id(), peer.send(message).await) }
        });

        let mut report = BroadcastReport::default();
        for (id, result) in join_all(sends).await {
            match result {
                Ok(true) => report.delivered += 1,
                Ok(false) => report.dropped += 1,
                Err(e) => {
                    tracing::warn!(%id, error = %e, "broadcast to peer failed");
                    report.failures.push((id, e));
                }
            }
        }
        tracing::trace!(
            delivered = report.delivered,
            failed = report.failures.len(),
            "broadcast finished"
        );
        report
    }
}

impl<C: Connection> Default for BroadcastGroup<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use castforge_protocol::ProtocolVersion;

    use super::*;
    use crate::peer::tests::{MemoryConnection, Title, factory};
    use crate::{DispatchError, DuplicatePolicy, PacketFactory};

    fn peer(factory: &PacketFactory, id: u64, version: ProtocolVersion) -> Arc<Peer<MemoryConnection>> {
        let mut peer = Peer::new(MemoryConnection::new(id), version);
        peer.attach(factory, DuplicatePolicy::Share).unwrap();
        Arc::new(peer)
    }

    fn cache(factory: &PacketFactory, min: ProtocolVersion) -> Arc<VersionedPacketCache> {
        let mut cache = factory.create_cache(min, ProtocolVersion::MAXIMUM);
        cache.prepare(&Title("server restarting".into())).unwrap().build().unwrap();
        Arc::new(cache)
    }

    #[test]
    fn test_join_and_leave() {
        let factory = factory(false);
        let group = BroadcastGroup::new();
        assert!(group.is_empty());

        group.join(peer(&factory, 1, ProtocolVersion::V1_8));
        group.join(peer(&factory, 2, ProtocolVersion::V1_12_2));
        assert_eq!(group.len(), 2);

        assert!(group.leave(ConnectionId::new(1)).is_some());
        assert!(group.leave(ConnectionId::new(1)).is_none());
        assert_eq!(group.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_sends_each_peer_its_version() {
        let factory = factory(false);
        let group = BroadcastGroup::new();
        let old = peer(&factory, 1, ProtocolVersion::V1_8);
        let new = peer(&factory, 2, ProtocolVersion::V1_21);
        group.join(Arc::clone(&old));
        group.join(Arc::clone(&new));

        let cache = cache(&factory, ProtocolVersion::V1_8);
        let report = group.broadcast(&cache).await;

        assert_eq!(report.delivered, 2);
        assert!(report.is_complete());
        assert_eq!(&old.connection().sent.lock()[0], cache.packets(ProtocolVersion::V1_8).unwrap());
        assert_eq!(&new.connection().sent.lock()[0], cache.packets(ProtocolVersion::V1_21).unwrap());
    }

    #[tokio::test]
    async fn test_broadcast_shares_one_buffer_across_same_version_peers() {
        let factory = factory(false);
        let group = BroadcastGroup::new();
        let a = peer(&factory, 1, ProtocolVersion::V1_12_2);
        let b = peer(&factory, 2, ProtocolVersion::V1_12_2);
        group.join(Arc::clone(&a));
        group.join(Arc::clone(&b));

        group.broadcast(&cache(&factory, ProtocolVersion::V1_8)).await;

        let sent_a = a.connection().sent.lock()[0].clone();
        let sent_b = b.connection().sent.lock()[0].clone();
        assert_eq!(sent_a.as_ptr(), sent_b.as_ptr());
    }

    #[tokio::test]
    async fn test_broadcast_reports_failures_without_aborting() {
        let factory = factory(false);
        let group = BroadcastGroup::new();
        let healthy = peer(&factory, 1, ProtocolVersion::V1_12_2);
        group.join(Arc::clone(&healthy));
        group.join(peer(&factory, 2, ProtocolVersion::V1_7_6));

        let mut closed = Peer::new(MemoryConnection::closed(3), ProtocolVersion::V1_12_2);
        closed.attach(&factory, DuplicatePolicy::Share).unwrap();
        group.join(Arc::new(closed));

        let report = group.broadcast(&cache(&factory, ProtocolVersion::V1_8)).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().any(|(id, e)| *id == ConnectionId::new(2)
            && matches!(e, CastforgeError::Dispatch(DispatchError::NotPrepared(_)))));
        assert!(report.failures.iter().any(|(id, e)| *id == ConnectionId::new(3)
            && matches!(e, CastforgeError::Connection(_))));
        assert_eq!(healthy.connection().sent.lock().len(), 1);
    }
}
