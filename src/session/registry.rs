//! Session registry and peer state machine
//!
//! Maps each known peer to its connection state and derives the set of
//! peers eligible for send. Mutating methods are called only from the
//! session event loop (single writer); readers take short read locks.
//!
//! Legal transitions:
//!
//! ```text
//! Discovered → Connecting → Connected → Disconnected
//!      ▲            │                        │
//!      └────────────┘ (timeout/rejection)    │
//!      ▲                                     │
//!      └─────────────────────────────────────┘ (rediscovery)
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::SessionError;
use crate::session::identity::{PeerId, PeerIdentity};

/// Connection state of a single peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
}

impl PeerConnectionState {
    fn can_move_to(self, next: Self) -> bool {
        use PeerConnectionState::*;
        matches!(
            (self, next),
            (Discovered, Connecting)
                | (Connecting, Connected)
                | (Connecting, Discovered)
                | (Connected, Disconnected)
                | (Disconnected, Discovered)
        )
    }
}

impl std::fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

struct PeerEntry {
    identity: PeerIdentity,
    state: PeerConnectionState,
}

/// Peer → state map. Single writer (session event loop), many readers.
pub struct SessionRegistry {
    peers: RwLock<HashMap<PeerId, PeerEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a discovered peer. Returns true if this changed anything:
    /// a new peer, or a `Disconnected` peer seen again.
    pub fn insert_discovered(&self, identity: PeerIdentity) -> bool {
        let mut peers = self.peers.write();
        match peers.get_mut(&identity.id) {
            None => {
                peers.insert(
                    identity.id,
                    PeerEntry {
                        identity,
                        state: PeerConnectionState::Discovered,
                    },
                );
                true
            }
            Some(entry) if entry.state == PeerConnectionState::Disconnected => {
                entry.state = PeerConnectionState::Discovered;
                true
            }
            Some(_) => false,
        }
    }

    /// Move a peer along the state machine, rejecting illegal edges.
    pub fn transition(
        &self,
        peer: &PeerId,
        next: PeerConnectionState,
    ) -> Result<(), SessionError> {
        let mut peers = self.peers.write();
        let entry = peers
            .get_mut(peer)
            .ok_or_else(|| SessionError::NotConnectable(format!("unknown peer {peer}")))?;

        if !entry.state.can_move_to(next) {
            return Err(SessionError::InvalidTransition {
                peer: entry.identity.short_id(),
                from: entry.state.to_string(),
                to: next.to_string(),
            });
        }
        entry.state = next;
        Ok(())
    }

    /// Drop a peer entirely (lost while not connected)
    pub fn remove(&self, peer: &PeerId) -> Option<PeerIdentity> {
        self.peers.write().remove(peer).map(|e| e.identity)
    }

    /// Record the name learned from a peer's hello
    pub fn set_name(&self, peer: &PeerId, name: &str) {
        if let Some(entry) = self.peers.write().get_mut(peer) {
            entry.identity.name = name.to_string();
        }
    }

    pub fn state_of(&self, peer: &PeerId) -> Option<PeerConnectionState> {
        self.peers.read().get(peer).map(|e| e.state)
    }

    pub fn identity_of(&self, peer: &PeerId) -> Option<PeerIdentity> {
        self.peers.read().get(peer).map(|e| e.identity.clone())
    }

    /// All peers with their states, sorted by name for stable display
    pub fn peers(&self) -> Vec<(PeerIdentity, PeerConnectionState)> {
        let mut out: Vec<_> = self
            .peers
            .read()
            .values()
            .map(|e| (e.identity.clone(), e.state))
            .collect();
        out.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        out
    }

    /// Peers currently eligible for send
    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.peers
            .read()
            .values()
            .filter(|e| e.state == PeerConnectionState::Connected)
            .map(|e| e.identity.clone())
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.peers
            .read()
            .values()
            .filter(|e| e.state == PeerConnectionState::Connected)
            .count()
    }

    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.state_of(peer) == Some(PeerConnectionState::Connected)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_peer_id;

    fn discovered(reg: &SessionRegistry, tag: u8) -> PeerId {
        let id = test_peer_id(tag);
        assert!(reg.insert_discovered(PeerIdentity::unnamed(id)));
        id
    }

    #[test]
    fn happy_path_transitions() {
        let reg = SessionRegistry::new();
        let peer = discovered(&reg, 1);

        reg.transition(&peer, PeerConnectionState::Connecting).unwrap();
        reg.transition(&peer, PeerConnectionState::Connected).unwrap();
        assert!(reg.is_connected(&peer));
        assert_eq!(reg.connected_count(), 1);

        reg.transition(&peer, PeerConnectionState::Disconnected).unwrap();
        assert_eq!(reg.connected_count(), 0);
    }

    #[test]
    fn cannot_skip_connecting() {
        let reg = SessionRegistry::new();
        let peer = discovered(&reg, 1);

        let err = reg
            .transition(&peer, PeerConnectionState::Connected)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
        assert_eq!(reg.state_of(&peer), Some(PeerConnectionState::Discovered));
    }

    #[test]
    fn timeout_reverts_to_discovered() {
        let reg = SessionRegistry::new();
        let peer = discovered(&reg, 1);

        reg.transition(&peer, PeerConnectionState::Connecting).unwrap();
        reg.transition(&peer, PeerConnectionState::Discovered).unwrap();
        assert_eq!(reg.state_of(&peer), Some(PeerConnectionState::Discovered));
    }

    #[test]
    fn rediscovery_after_disconnect() {
        let reg = SessionRegistry::new();
        let peer = discovered(&reg, 1);

        reg.transition(&peer, PeerConnectionState::Connecting).unwrap();
        reg.transition(&peer, PeerConnectionState::Connected).unwrap();
        reg.transition(&peer, PeerConnectionState::Disconnected).unwrap();

        // Seen again on the mesh: back to Discovered
        assert!(reg.insert_discovered(PeerIdentity::unnamed(peer)));
        assert_eq!(reg.state_of(&peer), Some(PeerConnectionState::Discovered));

        // But a repeat sighting while already Discovered changes nothing
        assert!(!reg.insert_discovered(PeerIdentity::unnamed(peer)));
    }

    #[test]
    fn disconnected_cannot_jump_to_connected() {
        let reg = SessionRegistry::new();
        let peer = discovered(&reg, 1);
        reg.transition(&peer, PeerConnectionState::Connecting).unwrap();
        reg.transition(&peer, PeerConnectionState::Connected).unwrap();
        reg.transition(&peer, PeerConnectionState::Disconnected).unwrap();

        assert!(reg
            .transition(&peer, PeerConnectionState::Connected)
            .is_err());
        assert!(reg
            .transition(&peer, PeerConnectionState::Connecting)
            .is_err());
    }

    #[test]
    fn name_update_preserves_identity() {
        let reg = SessionRegistry::new();
        let peer = discovered(&reg, 1);

        reg.set_name(&peer, "studio");
        assert_eq!(reg.identity_of(&peer).unwrap().name, "studio");
    }
}
