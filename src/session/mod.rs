//! Peer discovery and session layer
//!
//! Advertises and browses on the service namespace, negotiates encrypted
//! point-to-point sessions, and owns the peer state machine. All registry
//! mutations happen on one event-loop task; commands from the public API
//! and notifications from network tasks arrive as [`Command`] values over
//! a single channel, so there is exactly one writer and no callback
//! reentrancy.

pub mod events;
pub mod identity;
pub mod registry;

pub use events::{ClipEvent, ErrorEvent, PeerEvent, SessionEvent, StateEvent};
pub use identity::{PeerId, PeerIdentity};
pub use registry::{PeerConnectionState, SessionRegistry};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use iroh::endpoint::{get_remote_node_id, Connection};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::audio::device::default_output_device;
use crate::audio::frame::FrameFormat;
use crate::audio::queue::PlaybackQueues;
use crate::companion::{self, AudioClip};
use crate::config::AppConfig;
use crate::error::{Error, SessionError};
use crate::net::{read_msg, write_msg, MeshEndpoint, Transmitter, TAG_CLIP, TAG_HELLO};
use crate::session::events::render_status;

/// Largest serialized hello accepted
const MAX_HELLO: usize = 1024;

/// Exchanged once per session to carry the human-readable device name
#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

/// Messages processed by the session event loop
pub(crate) enum Command {
    Connect {
        peer: PeerId,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect,
    PeerFound {
        peer: PeerId,
    },
    PeerLost {
        peer: PeerId,
    },
    DialFinished {
        peer: PeerId,
        outcome: Result<(Connection, String), SessionError>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    InboundEstablished {
        peer: PeerId,
        name: String,
        conn: Connection,
    },
    ConnClosed {
        peer: PeerId,
        reason: String,
    },
    SendFailed {
        peer: PeerId,
        detail: String,
    },
    DecodeFailed {
        peer: PeerId,
        detail: String,
    },
    SendClip {
        peer: PeerId,
        clip: AudioClip,
        reply: oneshot::Sender<crate::Result<u64>>,
    },
    ClipSent {
        peer: PeerId,
        bytes: u64,
    },
    ClipReceived {
        peer: PeerId,
        path: PathBuf,
        bytes: u64,
    },
    Shutdown,
}

/// Public face of the discovery and session subsystem
pub struct SessionLayer {
    local: PeerIdentity,
    registry: Arc<SessionRegistry>,
    transmitter: Arc<Transmitter>,
    queues: Arc<PlaybackQueues>,
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<SessionEvent>,
    status: Arc<RwLock<String>>,
    advertising: Arc<AtomicBool>,
    browsing: Arc<AtomicBool>,
    playback_format: FrameFormat,
}

impl SessionLayer {
    /// Bind the endpoint and start the session tasks.
    pub async fn bind(config: &AppConfig) -> crate::Result<Self> {
        let endpoint = Arc::new(MeshEndpoint::bind().await?);
        let local = PeerIdentity::new(endpoint.node_id(), config.device_name.clone());
        info!(node = %local, "Session layer starting");

        // Local decode target: the output device's native format. Without
        // an output device we still relay; playback stays disabled until
        // one appears.
        let playback_format = match default_output_device() {
            Ok(device) => device.format,
            Err(e) => {
                warn!("No output device, using default playback format: {}", e);
                FrameFormat::native(48000, 2)
            }
        };

        let registry = Arc::new(SessionRegistry::new());
        let queues = Arc::new(PlaybackQueues::new(config.audio.queue_capacity));
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(256);
        let transmitter = Transmitter::new(registry.clone(), cmd_tx.clone());
        let status = Arc::new(RwLock::new("Ready".to_string()));
        let advertising = Arc::new(AtomicBool::new(false));
        let browsing = Arc::new(AtomicBool::new(false));

        let event_loop = EventLoop {
            registry: registry.clone(),
            transmitter: transmitter.clone(),
            queues: queues.clone(),
            endpoint: endpoint.clone(),
            events_tx: events_tx.clone(),
            status: status.clone(),
            cmd_tx: cmd_tx.clone(),
            local_name: local.name.clone(),
            playback_format,
            clip_dir: config.clip_dir(),
            connect_timeout: config.connect_timeout(),
            connections: HashMap::new(),
        };
        tokio::spawn(run_event_loop(event_loop, cmd_rx));

        tokio::spawn(run_accept_loop(
            endpoint.clone(),
            advertising.clone(),
            local.name.clone(),
            cmd_tx.clone(),
        ));

        tokio::spawn(run_discovery(
            endpoint,
            browsing.clone(),
            cmd_tx.clone(),
            config.discovery_poll(),
        ));

        Ok(Self {
            local,
            registry,
            transmitter,
            queues,
            cmd_tx,
            events_tx,
            status,
            advertising,
            browsing,
            playback_format,
        })
    }

    /// Announce this device for inbound session requests. No-op while
    /// already advertising.
    pub fn start_advertising(&self) {
        if !self.advertising.swap(true, Ordering::SeqCst) {
            info!("Advertising started");
        }
    }

    /// Stop accepting inbound session requests. No-op while not
    /// advertising.
    pub fn stop_advertising(&self) {
        if self.advertising.swap(false, Ordering::SeqCst) {
            info!("Advertising stopped");
        }
    }

    /// Begin discovering advertising peers. No-op while already browsing.
    pub fn start_browsing(&self) {
        if !self.browsing.swap(true, Ordering::SeqCst) {
            info!("Browsing started");
        }
    }

    /// Stop discovering peers. No-op while not browsing.
    pub fn stop_browsing(&self) {
        if self.browsing.swap(false, Ordering::SeqCst) {
            info!("Browsing stopped");
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    pub fn is_browsing(&self) -> bool {
        self.browsing.load(Ordering::SeqCst)
    }

    /// Invite a discovered peer and suspend until accept, rejection, or
    /// timeout. On failure the peer reverts to `Discovered`.
    pub async fn connect(&self, peer: PeerId) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect {
                peer,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::Shutdown)?;
        reply_rx.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Tear down every active session. In-flight sends fail cleanly as
    /// isolated per-peer failures.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect).await;
    }

    /// Send one complete recorded clip to a connected peer.
    pub async fn send_clip(&self, peer: PeerId, clip: AudioClip) -> crate::Result<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendClip {
                peer,
                clip,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Session(SessionError::Shutdown))?;
        reply_rx
            .await
            .map_err(|_| Error::Session(SessionError::Shutdown))?
    }

    /// Close sessions and the endpoint.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }

    pub fn local_identity(&self) -> &PeerIdentity {
        &self.local
    }

    /// All known peers and their states
    pub fn peers(&self) -> Vec<(PeerIdentity, PeerConnectionState)> {
        self.registry.peers()
    }

    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.registry.connected_peers()
    }

    /// Latest human-readable status line (display only; authoritative
    /// state lives in the registry)
    pub fn status(&self) -> String {
        self.status.read().clone()
    }

    /// Subscribe to the typed event stream
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn transmitter(&self) -> Arc<Transmitter> {
        self.transmitter.clone()
    }

    pub fn queues(&self) -> Arc<PlaybackQueues> {
        self.queues.clone()
    }

    /// The local decode target for incoming frames
    pub fn playback_format(&self) -> FrameFormat {
        self.playback_format
    }
}

/// State owned by the event-loop task
struct EventLoop {
    registry: Arc<SessionRegistry>,
    transmitter: Arc<Transmitter>,
    queues: Arc<PlaybackQueues>,
    endpoint: Arc<MeshEndpoint>,
    events_tx: broadcast::Sender<SessionEvent>,
    status: Arc<RwLock<String>>,
    cmd_tx: mpsc::Sender<Command>,
    local_name: String,
    playback_format: FrameFormat,
    clip_dir: PathBuf,
    connect_timeout: Duration,
    connections: HashMap<PeerId, Connection>,
}

impl EventLoop {
    fn emit(&self, event: SessionEvent) {
        *self.status.write() = render_status(&event);
        let _ = self.events_tx.send(event);
    }

    fn emit_state(&self, peer: &PeerId) {
        if let (Some(identity), Some(state)) =
            (self.registry.identity_of(peer), self.registry.state_of(peer))
        {
            self.emit(SessionEvent::State(StateEvent {
                peer: identity,
                state,
            }));
        }
    }

    fn identity_or_unnamed(&self, peer: &PeerId) -> PeerIdentity {
        self.registry
            .identity_of(peer)
            .unwrap_or_else(|| PeerIdentity::unnamed(*peer))
    }

    /// Attach transport plumbing for a freshly connected peer
    fn wire_up(&mut self, peer: PeerId, name: String, conn: Connection) {
        self.registry.set_name(&peer, &name);
        self.transmitter.attach(peer, conn.clone());
        tokio::spawn(crate::net::receive::run_receiver(
            conn.clone(),
            peer,
            self.queues.clone(),
            self.playback_format,
            self.cmd_tx.clone(),
        ));
        tokio::spawn(run_bi_dispatch(
            conn.clone(),
            peer,
            self.clip_dir.clone(),
            self.cmd_tx.clone(),
        ));
        self.connections.insert(peer, conn);
    }

    /// Drop a departed peer's plumbing
    fn tear_down(&mut self, peer: &PeerId) {
        if let Some(conn) = self.connections.remove(peer) {
            conn.close(0u32.into(), b"disconnect");
        }
        self.transmitter.detach(peer);
        self.queues.remove(peer);
    }
}

async fn run_event_loop(mut ctx: EventLoop, mut cmd_rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Connect { peer, reply } => {
                match ctx.registry.state_of(&peer) {
                    Some(PeerConnectionState::Discovered) => {
                        if let Err(e) =
                            ctx.registry.transition(&peer, PeerConnectionState::Connecting)
                        {
                            let _ = reply.send(Err(e));
                            continue;
                        }
                        ctx.emit_state(&peer);

                        let endpoint = ctx.endpoint.clone();
                        let cmd_tx = ctx.cmd_tx.clone();
                        let local_name = ctx.local_name.clone();
                        let timeout = ctx.connect_timeout;
                        tokio::spawn(async move {
                            let outcome = dial(&endpoint, peer, &local_name, timeout).await;
                            let _ = cmd_tx
                                .send(Command::DialFinished {
                                    peer,
                                    outcome,
                                    reply,
                                })
                                .await;
                        });
                    }
                    state => {
                        let _ = reply.send(Err(SessionError::NotConnectable(format!(
                            "peer is {}",
                            state.map_or("unknown".to_string(), |s| s.to_string())
                        ))));
                    }
                }
            }

            Command::DialFinished {
                peer,
                outcome,
                reply,
            } => match outcome {
                Ok((conn, name)) => {
                    match ctx.registry.transition(&peer, PeerConnectionState::Connected) {
                        Ok(()) => {
                            ctx.wire_up(peer, name, conn);
                            ctx.emit_state(&peer);
                            let _ = reply.send(Ok(()));
                        }
                        Err(e) => {
                            // A disconnect raced the dial; the session is
                            // stale
                            conn.close(0u32.into(), b"stale");
                            let _ = reply.send(Err(e));
                        }
                    }
                }
                Err(e) => {
                    let _ = ctx
                        .registry
                        .transition(&peer, PeerConnectionState::Discovered);
                    ctx.emit_state(&peer);
                    ctx.emit(SessionEvent::Error(ErrorEvent::Session {
                        peer: Some(ctx.identity_or_unnamed(&peer)),
                        detail: e.to_string(),
                    }));
                    let _ = reply.send(Err(e));
                }
            },

            Command::InboundEstablished { peer, name, conn } => {
                if ctx.registry.insert_discovered(PeerIdentity::unnamed(peer)) {
                    ctx.emit(SessionEvent::Peer(PeerEvent::Discovered(
                        ctx.identity_or_unnamed(&peer),
                    )));
                }
                match ctx.registry.state_of(&peer) {
                    Some(PeerConnectionState::Discovered) => {
                        let _ = ctx
                            .registry
                            .transition(&peer, PeerConnectionState::Connecting);
                        ctx.emit_state(&peer);
                        let _ = ctx
                            .registry
                            .transition(&peer, PeerConnectionState::Connected);
                        ctx.wire_up(peer, name, conn);
                        ctx.emit_state(&peer);
                    }
                    Some(PeerConnectionState::Connecting) => {
                        // Simultaneous dial from both sides; adopt the
                        // session that finished first
                        let _ = ctx
                            .registry
                            .transition(&peer, PeerConnectionState::Connected);
                        ctx.wire_up(peer, name, conn);
                        ctx.emit_state(&peer);
                    }
                    _ => {
                        debug!(peer = %peer, "Duplicate inbound session, closing");
                        conn.close(0u32.into(), b"duplicate");
                    }
                }
            }

            Command::PeerFound { peer } => {
                if ctx.registry.insert_discovered(PeerIdentity::unnamed(peer)) {
                    ctx.emit(SessionEvent::Peer(PeerEvent::Discovered(
                        ctx.identity_or_unnamed(&peer),
                    )));
                }
            }

            Command::PeerLost { peer } => {
                if ctx.registry.state_of(&peer) == Some(PeerConnectionState::Discovered) {
                    if let Some(identity) = ctx.registry.remove(&peer) {
                        ctx.emit(SessionEvent::Peer(PeerEvent::Lost(identity)));
                    }
                }
            }

            Command::ConnClosed { peer, reason } => {
                if ctx.registry.state_of(&peer) == Some(PeerConnectionState::Connected) {
                    debug!(peer = %peer, reason = %reason, "Session closed");
                    ctx.tear_down(&peer);
                    let _ = ctx
                        .registry
                        .transition(&peer, PeerConnectionState::Disconnected);
                    ctx.emit_state(&peer);
                }
            }

            Command::SendFailed { peer, detail } => {
                ctx.emit(SessionEvent::Error(ErrorEvent::Send {
                    peer: ctx.identity_or_unnamed(&peer),
                    detail,
                }));
            }

            Command::DecodeFailed { peer, detail } => {
                ctx.emit(SessionEvent::Error(ErrorEvent::Decode {
                    peer: ctx.identity_or_unnamed(&peer),
                    detail,
                }));
            }

            Command::SendClip { peer, clip, reply } => match ctx.connections.get(&peer) {
                Some(conn) => {
                    let conn = conn.clone();
                    let cmd_tx = ctx.cmd_tx.clone();
                    tokio::spawn(async move {
                        match companion::send_clip(&conn, &clip).await {
                            Ok(bytes) => {
                                let _ = cmd_tx.send(Command::ClipSent { peer, bytes }).await;
                                let _ = reply.send(Ok(bytes));
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            }
                        }
                    });
                }
                None => {
                    let _ = reply.send(Err(Error::Session(SessionError::NotConnectable(
                        "peer is not connected".to_string(),
                    ))));
                }
            },

            Command::ClipSent { peer, bytes } => {
                ctx.emit(SessionEvent::Clip(ClipEvent::Sent {
                    to: ctx.identity_or_unnamed(&peer),
                    bytes,
                }));
            }

            Command::ClipReceived { peer, path, bytes } => {
                ctx.emit(SessionEvent::Clip(ClipEvent::Received {
                    from: ctx.identity_or_unnamed(&peer),
                    path,
                    bytes,
                }));
            }

            Command::Disconnect => {
                let peers: Vec<PeerId> = ctx.connections.keys().copied().collect();
                for peer in peers {
                    ctx.tear_down(&peer);
                    if ctx.registry.state_of(&peer) == Some(PeerConnectionState::Connected) {
                        let _ = ctx
                            .registry
                            .transition(&peer, PeerConnectionState::Disconnected);
                        ctx.emit_state(&peer);
                    }
                }
                ctx.transmitter.clear();
            }

            Command::Shutdown => {
                let peers: Vec<PeerId> = ctx.connections.keys().copied().collect();
                for peer in peers {
                    ctx.tear_down(&peer);
                    if ctx.registry.state_of(&peer) == Some(PeerConnectionState::Connected) {
                        let _ = ctx
                            .registry
                            .transition(&peer, PeerConnectionState::Disconnected);
                        ctx.emit_state(&peer);
                    }
                }
                ctx.transmitter.clear();
                ctx.endpoint.close().await;
                break;
            }
        }
    }
}

/// Dial a peer and exchange hellos, all within the session timeout
async fn dial(
    endpoint: &MeshEndpoint,
    peer: PeerId,
    local_name: &str,
    timeout: Duration,
) -> Result<(Connection, String), SessionError> {
    let conn = endpoint.connect(peer, timeout).await?;

    let handshake = async {
        let (mut send, mut recv) = conn
            .open_bi()
            .await
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        send.write_all(&[TAG_HELLO])
            .await
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        write_msg(
            &mut send,
            &Hello {
                name: local_name.to_string(),
            },
        )
        .await
        .map_err(|e| SessionError::Handshake(e.to_string()))?;

        let reply: Hello = read_msg(&mut recv, MAX_HELLO)
            .await
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        let _ = send.finish();
        Ok::<String, SessionError>(reply.name)
    };

    match tokio::time::timeout(timeout, handshake).await {
        Ok(Ok(name)) => Ok((conn, name)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(SessionError::ConnectTimeout(timeout)),
    }
}

/// Accept inbound sessions while advertising; each is auto-accepted and
/// handed to the event loop after its hello.
async fn run_accept_loop(
    endpoint: Arc<MeshEndpoint>,
    advertising: Arc<AtomicBool>,
    local_name: String,
    cmd_tx: mpsc::Sender<Command>,
) {
    while let Some(conn) = endpoint.accept().await {
        if !advertising.load(Ordering::SeqCst) {
            debug!("Not advertising, refusing inbound session");
            conn.close(0u32.into(), b"not advertising");
            continue;
        }
        tokio::spawn(handle_inbound(conn, local_name.clone(), cmd_tx.clone()));
    }
}

/// Answer an inbound hello and report the established session
async fn handle_inbound(conn: Connection, local_name: String, cmd_tx: mpsc::Sender<Command>) {
    let peer = match get_remote_node_id(&conn) {
        Ok(id) => id,
        Err(e) => {
            warn!("Inbound session without node id: {}", e);
            conn.close(0u32.into(), b"no identity");
            return;
        }
    };

    let hello = async {
        let (mut send, mut recv) = conn
            .accept_bi()
            .await
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        let mut tag = [0u8; 1];
        recv.read_exact(&mut tag)
            .await
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        if tag[0] != TAG_HELLO {
            return Err(SessionError::Handshake("expected hello".to_string()));
        }
        let hello: Hello = read_msg(&mut recv, MAX_HELLO)
            .await
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        write_msg(
            &mut send,
            &Hello {
                name: local_name.clone(),
            },
        )
        .await
        .map_err(|e| SessionError::Handshake(e.to_string()))?;
        let _ = send.finish();
        Ok::<String, SessionError>(hello.name)
    };

    match hello.await {
        Ok(name) => {
            let _ = cmd_tx
                .send(Command::InboundEstablished { peer, name, conn })
                .await;
        }
        Err(e) => {
            debug!(peer = %peer, "Inbound hello failed: {}", e);
            conn.close(0u32.into(), b"bad hello");
        }
    }
}

/// Accept tagged bidirectional streams (clips) for the session's lifetime
async fn run_bi_dispatch(
    conn: Connection,
    peer: PeerId,
    clip_dir: PathBuf,
    cmd_tx: mpsc::Sender<Command>,
) {
    loop {
        let (send, mut recv) = match conn.accept_bi().await {
            Ok(streams) => streams,
            // Connection ended; the audio receiver reports the closure
            Err(_) => return,
        };

        let mut tag = [0u8; 1];
        if recv.read_exact(&mut tag).await.is_err() {
            continue;
        }
        match tag[0] {
            TAG_CLIP => {
                let clip_dir = clip_dir.clone();
                let cmd_tx = cmd_tx.clone();
                tokio::spawn(async move {
                    match companion::receive_clip(send, recv, &clip_dir).await {
                        Ok((path, bytes)) => {
                            let _ = cmd_tx
                                .send(Command::ClipReceived { peer, path, bytes })
                                .await;
                        }
                        Err(e) => warn!(peer = %peer, "Clip receive failed: {}", e),
                    }
                });
            }
            TAG_HELLO => debug!(peer = %peer, "Ignoring redundant hello"),
            other => debug!(peer = %peer, tag = other, "Unknown stream tag"),
        }
    }
}

/// Poll the endpoint's discovered-peer set while browsing and report the
/// differences.
async fn run_discovery(
    endpoint: Arc<MeshEndpoint>,
    browsing: Arc<AtomicBool>,
    cmd_tx: mpsc::Sender<Command>,
    interval: Duration,
) {
    let mut known: std::collections::HashSet<PeerId> = std::collections::HashSet::new();

    loop {
        tokio::time::sleep(interval).await;
        if !browsing.load(Ordering::SeqCst) {
            continue;
        }

        let current: std::collections::HashSet<PeerId> =
            endpoint.discovered_peers().into_iter().collect();

        for &peer in current.difference(&known) {
            if cmd_tx.send(Command::PeerFound { peer }).await.is_err() {
                return;
            }
        }
        for &peer in known.difference(&current) {
            if cmd_tx.send(Command::PeerLost { peer }).await.is_err() {
                return;
            }
        }

        known = current;
    }
}

/// Deterministic peer id for unit tests
#[cfg(test)]
pub fn test_peer_id(tag: u8) -> PeerId {
    iroh::SecretKey::from_bytes(&[tag; 32]).public()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips_through_bincode() {
        let hello = Hello {
            name: "kitchen speaker".to_string(),
        };
        let bytes = bincode::serialize(&hello).unwrap();
        assert!(bytes.len() < MAX_HELLO);
        let back: Hello = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.name, hello.name);
    }

    #[test]
    fn test_peer_ids_are_stable_and_distinct() {
        assert_eq!(test_peer_id(1), test_peer_id(1));
        assert_ne!(test_peer_id(1), test_peer_id(2));
    }
}
