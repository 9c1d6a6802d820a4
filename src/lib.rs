//! # Voicemesh
//!
//! Low-latency peer-to-peer microphone streaming over a local mesh.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             LOCAL NODE                               │
//! │  ┌─────────────┐                                                     │
//! │  │ Microphone  │                                                     │
//! │  └──────┬──────┘                                                     │
//! │         ▼                                                            │
//! │  ┌─────────────┐    ┌────────────┐    ┌───────────────────────────┐  │
//! │  │  Capture    │───▶│ PCM Frame  │───▶│  Transmitter              │  │
//! │  │  Engine     │    │ Codec      │    │  (fan-out to connected    │  │
//! │  │ (2048-sample│    │ (header +  │    │   peers, one ordered      │  │
//! │  │  frames)    │    │  raw f32)  │    │   stream per peer)        │  │
//! │  └─────────────┘    └────────────┘    └───────────┬───────────────┘  │
//! │                                                   │                  │
//! │  ┌────────────────────────────────────────────────┼───────────────┐  │
//! │  │                 Session Layer                  │               │  │
//! │  │  discovery (browse/advertise) · registry       │               │  │
//! │  │  Discovered → Connecting → Connected → Disconnected            │  │
//! │  └────────────────────────────────────────────────┼───────────────┘  │
//! └───────────────────────────────────────────────────┼──────────────────┘
//!                                                     │ encrypted QUIC
//!                                                     ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             REMOTE PEER                              │
//! │  ┌───────────────┐    ┌────────────┐    ┌─────────────────────────┐  │
//! │  │ Reception     │───▶│ PCM Frame  │───▶│ PlaybackQueue (bounded, │  │
//! │  │ task (per     │    │ Codec      │    │ drop-oldest) ──▶ output │  │
//! │  │ connection)   │    │ (decode)   │    │ sink mix, silence on    │  │
//! │  └───────────────┘    └────────────┘    │ starvation              │  │
//! │                                         └─────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Alongside the realtime path, [`companion`] carries complete recorded
//! clips as one-shot transfers that materialize as playable WAV files.

pub mod audio;
pub mod codec;
pub mod companion;
pub mod config;
pub mod error;
pub mod net;
pub mod relay;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Service namespace for discovery and session negotiation.
    /// Advertiser and browser must agree on this ALPN.
    pub const SERVICE_ALPN: &[u8] = b"voicemesh/1";

    /// Samples per channel in one captured frame
    pub const FRAME_SAMPLES: usize = 2048;

    /// Bytes per sample on the wire (native f32 PCM)
    pub const BYTES_PER_SAMPLE: u16 = 4;

    /// Session invitation timeout
    pub const SESSION_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Per-peer playback queue capacity (frames); bounds end-to-end latency
    pub const PLAYBACK_QUEUE_CAPACITY: usize = 32;

    /// Per-peer transmit channel capacity (frames)
    pub const TRANSMIT_CHANNEL_CAPACITY: usize = 64;

    /// Discovery poll interval
    pub const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Largest wire message body accepted from a peer (sanity bound well
    /// above any 2048-sample stereo frame)
    pub const MAX_WIRE_BODY: usize = 1 << 20;

    /// Largest companion clip accepted (samples × 4 bytes)
    pub const MAX_CLIP_BYTES: usize = 256 << 20;
}
