//! Transmission manager
//!
//! Fans encoded frames out to every peer currently eligible for send.
//! Each connected peer gets a bounded channel drained by a writer task
//! that owns one long-lived ordered stream, so the capture path never
//! waits on the network: `broadcast` only performs non-blocking channel
//! sends. A full channel costs that peer one frame; a stream-level write
//! error is reported as an isolated per-peer send failure.

use bytes::Bytes;
use dashmap::DashMap;
use iroh::endpoint::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::constants::TRANSMIT_CHANNEL_CAPACITY;
use crate::net::write_chunk;
use crate::session::registry::SessionRegistry;
use crate::session::{Command, PeerId};

struct PeerLink {
    tx: mpsc::Sender<Bytes>,
}

/// Fan-out sender over all connected peers
pub struct Transmitter {
    links: DashMap<PeerId, PeerLink>,
    registry: Arc<SessionRegistry>,
    cmd_tx: mpsc::Sender<Command>,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Transmitter {
    pub(crate) fn new(registry: Arc<SessionRegistry>, cmd_tx: mpsc::Sender<Command>) -> Arc<Self> {
        Arc::new(Self {
            links: DashMap::new(),
            registry,
            cmd_tx,
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        })
    }

    /// Open this peer's outbound audio stream and start its writer task
    pub(crate) fn attach(&self, peer: PeerId, conn: Connection) {
        let (tx, rx) = mpsc::channel(TRANSMIT_CHANNEL_CAPACITY);
        self.links.insert(peer, PeerLink { tx });
        tokio::spawn(run_writer(conn, peer, rx, self.cmd_tx.clone()));
    }

    /// Drop a peer's link; its writer task drains and exits
    pub(crate) fn detach(&self, peer: &PeerId) {
        self.links.remove(peer);
    }

    /// Drop all links (session teardown)
    pub(crate) fn clear(&self) {
        self.links.clear();
    }

    /// Deliver `payload` to every peer in `Connected` state.
    ///
    /// An empty connected set is a no-op: zero transport operations, no
    /// error. Returns the number of peers the payload was handed to.
    /// Callable from the capture callback; never blocks.
    pub fn broadcast(&self, payload: Bytes) -> usize {
        if self.links.is_empty() {
            return 0;
        }

        let mut attempted = 0;
        for entry in self.links.iter() {
            let peer = *entry.key();
            if !self.registry.is_connected(&peer) {
                continue;
            }
            attempted += 1;
            match entry.value().tx.try_send(payload.clone()) {
                Ok(()) => {
                    self.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    // Slow peer: lose its frame rather than stall capture
                    self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(peer = %peer, "Transmit channel full, frame dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        attempted
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Insert a link backed by a bare channel instead of a connection
    #[cfg(test)]
    pub(crate) fn attach_raw(&self, peer: PeerId, tx: mpsc::Sender<Bytes>) {
        self.links.insert(peer, PeerLink { tx });
    }
}

async fn run_writer(
    conn: Connection,
    peer: PeerId,
    mut rx: mpsc::Receiver<Bytes>,
    cmd_tx: mpsc::Sender<Command>,
) {
    let mut stream = match conn.open_uni().await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = cmd_tx
                .send(Command::SendFailed {
                    peer,
                    detail: e.to_string(),
                })
                .await;
            return;
        }
    };

    while let Some(payload) = rx.recv().await {
        if let Err(e) = write_chunk(&mut stream, &payload).await {
            let _ = cmd_tx
                .send(Command::SendFailed {
                    peer,
                    detail: e.to_string(),
                })
                .await;
            break;
        }
    }

    let _ = stream.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::registry::{PeerConnectionState, SessionRegistry};
    use crate::session::{test_peer_id, PeerIdentity};

    fn connected_peer(registry: &SessionRegistry, tag: u8) -> PeerId {
        let peer = test_peer_id(tag);
        registry.insert_discovered(PeerIdentity::unnamed(peer));
        registry
            .transition(&peer, PeerConnectionState::Connecting)
            .unwrap();
        registry
            .transition(&peer, PeerConnectionState::Connected)
            .unwrap();
        peer
    }

    fn transmitter() -> (Arc<Transmitter>, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        (Transmitter::new(registry.clone(), cmd_tx), registry)
    }

    #[tokio::test]
    async fn empty_connected_set_is_a_noop() {
        let (tx, _registry) = transmitter();
        let attempted = tx.broadcast(Bytes::from_static(b"frame"));
        assert_eq!(attempted, 0);
        assert_eq!(tx.frames_sent(), 0);
        assert_eq!(tx.frames_dropped(), 0);
    }

    #[tokio::test]
    async fn delivers_only_to_connected_peers() {
        let (tx, registry) = transmitter();
        let connected = connected_peer(&registry, 1);
        let discovered = test_peer_id(2);
        registry.insert_discovered(PeerIdentity::unnamed(discovered));

        let (ca, mut ra) = mpsc::channel::<Bytes>(4);
        let (cb, mut rb) = mpsc::channel::<Bytes>(4);
        tx.attach_raw(connected, ca);
        tx.attach_raw(discovered, cb);

        let attempted = tx.broadcast(Bytes::from_static(b"frame"));
        assert_eq!(attempted, 1);
        assert_eq!(ra.try_recv().unwrap(), Bytes::from_static(b"frame"));
        assert!(rb.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_makes_sends_silent_noops() {
        let (tx, registry) = transmitter();
        let peer = connected_peer(&registry, 1);

        let (ch, mut rx) = mpsc::channel::<Bytes>(4);
        tx.attach_raw(peer, ch);
        assert_eq!(tx.broadcast(Bytes::from_static(b"one")), 1);

        // Peer drops mid-stream
        registry
            .transition(&peer, PeerConnectionState::Disconnected)
            .unwrap();
        tx.detach(&peer);

        assert_eq!(tx.broadcast(Bytes::from_static(b"two")), 0);
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"one"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_channel_drops_that_peers_frame_only() {
        let (tx, registry) = transmitter();
        let slow = connected_peer(&registry, 1);
        let fast = connected_peer(&registry, 2);

        let (cs, _rs) = mpsc::channel::<Bytes>(1);
        let (cf, mut rf) = mpsc::channel::<Bytes>(4);
        tx.attach_raw(slow, cs);
        tx.attach_raw(fast, cf);

        tx.broadcast(Bytes::from_static(b"one"));
        tx.broadcast(Bytes::from_static(b"two"));

        // Slow peer's channel held one frame and dropped one; the fast
        // peer saw both
        assert_eq!(tx.frames_dropped(), 1);
        assert_eq!(rf.try_recv().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rf.try_recv().unwrap(), Bytes::from_static(b"two"));
    }
}
