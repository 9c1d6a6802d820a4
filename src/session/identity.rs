//! Peer identity
//!
//! A peer is a stable human-readable name plus the process-local node id
//! the endpoint was bound with. Identity comparison is by id only; the
//! name is display metadata that arrives with the session hello.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Unique peer identifier: the endpoint's node id, generated at process
/// start and immutable for the process lifetime
pub type PeerId = iroh::NodeId;

/// A peer as shown to external collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub name: String,
}

impl PeerIdentity {
    pub fn new(id: PeerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Placeholder identity for a peer discovered before its hello, named
    /// by a shortened id
    pub fn unnamed(id: PeerId) -> Self {
        Self {
            name: short_id(&id),
            id,
        }
    }

    pub fn short_id(&self) -> String {
        short_id(&self.id)
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerIdentity {}

impl Hash for PeerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.short_id())
    }
}

fn short_id(id: &PeerId) -> String {
    let full = id.to_string();
    full.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_peer_id;

    #[test]
    fn equality_is_by_id_not_name() {
        let id = test_peer_id(7);
        let a = PeerIdentity::new(id, "kitchen");
        let b = PeerIdentity::new(id, "renamed");
        assert_eq!(a, b);

        let c = PeerIdentity::new(test_peer_id(8), "kitchen");
        assert_ne!(a, c);
    }

    #[test]
    fn unnamed_uses_short_id() {
        let peer = PeerIdentity::unnamed(test_peer_id(3));
        assert_eq!(peer.name.len(), 8);
        assert_eq!(peer.name, peer.short_id());
    }
}
