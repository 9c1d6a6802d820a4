//! Stream relay
//!
//! Wires the capture pipeline into the transmission manager: each
//! captured frame is encoded and fanned out to the connected peers. The
//! zero-peer gate lives here: capture keeps running while nobody is
//! connected, only the encode-and-send side is skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::capture::{CaptureEngine, FrameConsumer};
use crate::codec;
use crate::error::AudioError;
use crate::net::Transmitter;
use crate::session::{SessionLayer, SessionRegistry};

/// Capture → encode → transmit pipeline
pub struct StreamRelay {
    capture: Mutex<CaptureEngine>,
    transmitter: Arc<Transmitter>,
    registry: Arc<SessionRegistry>,
    /// Frames captured while no peer was connected
    frames_skipped: Arc<AtomicU64>,
    /// Frames encoded and handed to the transmitter
    frames_relayed: Arc<AtomicU64>,
}

impl StreamRelay {
    pub fn new(session: &SessionLayer, frame_samples: usize) -> Self {
        Self {
            capture: Mutex::new(CaptureEngine::new(frame_samples)),
            transmitter: session.transmitter(),
            registry: session.registry(),
            frames_skipped: Arc::new(AtomicU64::new(0)),
            frames_relayed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the microphone stream. `DeviceUnavailable` is reported to the
    /// caller and leaves streaming disabled; nothing else is affected.
    pub fn start_stream(&self) -> Result<(), AudioError> {
        let registry = self.registry.clone();
        let transmitter = self.transmitter.clone();
        let frames_skipped = self.frames_skipped.clone();
        let frames_relayed = self.frames_relayed.clone();

        let consumer: FrameConsumer = Arc::new(move |frame| {
            if registry.connected_count() == 0 {
                frames_skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let payload = codec::encode(&frame);
            transmitter.broadcast(payload);
            frames_relayed.fetch_add(1, Ordering::Relaxed);
        });

        self.capture.lock().start(consumer)
    }

    /// Stop the microphone stream; a frame mid-delivery completes.
    pub fn stop_stream(&self) {
        self.capture.lock().stop();
    }

    pub fn is_streaming(&self) -> bool {
        self.capture.lock().is_running()
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn frames_relayed(&self) -> u64 {
        self.frames_relayed.load(Ordering::Relaxed)
    }

    /// Asynchronous capture-stream error, if one occurred
    pub fn check_capture_error(&self) -> Option<AudioError> {
        self.capture.lock().check_errors()
    }
}
