//! Typed session event stream
//!
//! External observers subscribe to discrete event values instead of
//! parsing free text. A rendered status line is derived from the latest
//! event for display surfaces that want one; the authoritative state
//! stays in the registry.

use std::path::PathBuf;

use crate::session::identity::PeerIdentity;
use crate::session::registry::PeerConnectionState;

/// Everything observable about the session layer
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Peer(PeerEvent),
    State(StateEvent),
    Error(ErrorEvent),
    Clip(ClipEvent),
}

/// Discovery events
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Discovered(PeerIdentity),
    Lost(PeerIdentity),
}

/// A peer moved along the connection state machine
#[derive(Debug, Clone)]
pub struct StateEvent {
    pub peer: PeerIdentity,
    pub state: PeerConnectionState,
}

/// Reported, non-fatal faults
#[derive(Debug, Clone)]
pub enum ErrorEvent {
    /// Capture or output device failed to open/start
    Device(String),
    /// Connect timeout, rejection, or handshake failure
    Session {
        peer: Option<PeerIdentity>,
        detail: String,
    },
    /// Per-peer transmission failure; other peers unaffected
    Send {
        peer: PeerIdentity,
        detail: String,
    },
    /// Malformed payload dropped from one peer's stream
    Decode {
        peer: PeerIdentity,
        detail: String,
    },
}

/// Companion clip link events
#[derive(Debug, Clone)]
pub enum ClipEvent {
    Received {
        from: PeerIdentity,
        path: PathBuf,
        bytes: u64,
    },
    Sent {
        to: PeerIdentity,
        bytes: u64,
    },
}

/// Render an event as a single human-readable status line
pub fn render_status(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Peer(PeerEvent::Discovered(p)) => format!("Discovered {p}"),
        SessionEvent::Peer(PeerEvent::Lost(p)) => format!("Lost {p}"),
        SessionEvent::State(StateEvent { peer, state }) => format!("{peer} is {state}"),
        SessionEvent::Error(ErrorEvent::Device(detail)) => {
            format!("Audio device unavailable: {detail}")
        }
        SessionEvent::Error(ErrorEvent::Session { peer, detail }) => match peer {
            Some(p) => format!("Session error with {p}: {detail}"),
            None => format!("Session error: {detail}"),
        },
        SessionEvent::Error(ErrorEvent::Send { peer, detail }) => {
            format!("Send to {peer} failed: {detail}")
        }
        SessionEvent::Error(ErrorEvent::Decode { peer, detail }) => {
            format!("Dropped bad frame from {peer}: {detail}")
        }
        SessionEvent::Clip(ClipEvent::Received { from, path, bytes }) => {
            format!("Received clip from {from}: {} ({bytes} bytes)", path.display())
        }
        SessionEvent::Clip(ClipEvent::Sent { to, bytes }) => {
            format!("Sent clip to {to} ({bytes} bytes)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_peer_id;

    #[test]
    fn status_lines_name_the_peer() {
        let peer = PeerIdentity::new(test_peer_id(1), "kitchen");

        let line = render_status(&SessionEvent::State(StateEvent {
            peer: peer.clone(),
            state: PeerConnectionState::Connected,
        }));
        assert!(line.contains("kitchen"));
        assert!(line.contains("connected"));

        let line = render_status(&SessionEvent::Error(ErrorEvent::Send {
            peer,
            detail: "stream reset".into(),
        }));
        assert!(line.contains("kitchen"));
        assert!(line.contains("stream reset"));
    }
}
