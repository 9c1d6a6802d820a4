//! Error types for the mesh audio relay
//!
//! No variant here is fatal to the process: device, session, send, and
//! decode failures are all reported through the session event stream and
//! handled at the component boundary closest to the fault.

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// The capture or output device could not be opened or started.
    /// Streaming stays disabled until resolved; the process keeps running.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Malformed payload: {0}")]
    Decode(String),

    /// Body length is not evenly divisible by the target format's
    /// bytes-per-frame. The offending frame is dropped.
    #[error("Payload length {len} not divisible by bytes-per-frame {bytes_per_frame}")]
    InvalidLength { len: usize, bytes_per_frame: usize },

    /// The header declares a format other than the local playback format.
    #[error("Frame format {declared} does not match local format {local}")]
    FormatMismatch { declared: String, local: String },
}

/// Session layer errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// The invited peer did not accept within the timeout window.
    /// The peer reverts to `Discovered`.
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Peer not in a connectable state: {0}")]
    NotConnectable(String),

    /// The requested edge is not part of the peer state machine.
    #[error("Illegal transition {from} -> {to} for peer {peer}")]
    InvalidTransition {
        peer: String,
        from: String,
        to: String,
    },

    #[error("Session layer is shut down")]
    Shutdown,
}

/// Network transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Endpoint bind failed: {0}")]
    BindFailed(String),

    /// A single peer's transmission failed. Isolated; other peers and
    /// future capture/send cycles are unaffected.
    #[error("Send to {peer} failed: {detail}")]
    SendFailed { peer: String, detail: String },

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
