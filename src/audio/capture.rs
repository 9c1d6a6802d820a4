//! Microphone capture pipeline
//!
//! Owns the input device and delivers fixed-size frames of native-format
//! PCM to a registered consumer callback at the device's natural cadence.
//! The stream runs on a dedicated thread; the cpal callback only
//! accumulates samples and invokes the consumer, never touching locks or
//! the network.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::default_input_device;
use crate::audio::frame::{AudioFrame, FrameFormat};
use crate::constants::FRAME_SAMPLES;
use crate::error::AudioError;

/// Receives each completed capture frame
pub type FrameConsumer = Arc<dyn Fn(AudioFrame) + Send + Sync>;

/// Capture pipeline for the default input device
pub struct CaptureEngine {
    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Samples per channel per delivered frame
    frame_samples: usize,

    /// Format of the device opened by the last start()
    format: Arc<parking_lot::Mutex<Option<FrameFormat>>>,

    /// Total frames delivered to the consumer
    frames_delivered: Arc<AtomicU64>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Option<Receiver<AudioError>>,
}

impl CaptureEngine {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            frame_samples,
            format: Arc::new(parking_lot::Mutex::new(None)),
            frames_delivered: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
            error_rx: None,
        }
    }

    /// Engine with the standard frame size
    pub fn with_default_frame_size() -> Self {
        Self::new(FRAME_SAMPLES)
    }

    /// Start capturing, delivering frames to `consumer`.
    ///
    /// Opens the default input device at its native format. Calling start
    /// while already running is a no-op.
    pub fn start(&mut self, consumer: FrameConsumer) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = default_input_device()?;
        let format = device.format;
        let config = device.stream_config();
        *self.format.lock() = Some(format);

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let frames_delivered = self.frames_delivered.clone();
        let frame_samples = self.frame_samples;
        let samples_per_frame = frame_samples * format.channels as usize;
        let startup_tx = error_tx.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        self.frames_delivered.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("voicemesh-capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let mut pending: Vec<f32> = Vec::with_capacity(samples_per_frame * 2);

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }

                        pending.extend_from_slice(data);

                        while pending.len() >= samples_per_frame {
                            let samples: Vec<f32> =
                                pending.drain(..samples_per_frame).collect();
                            match AudioFrame::new(format, samples) {
                                Ok(frame) => {
                                    frames_delivered.fetch_add(1, Ordering::Relaxed);
                                    consumer(frame);
                                }
                                Err(e) => {
                                    tracing::warn!("Dropping malformed capture chunk: {}", e);
                                }
                            }
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let err = AudioError::DeviceUnavailable(e.to_string());
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                        let _ = ready_tx.send(Ok(()));

                        // Keep thread alive while running; dropping the
                        // stream on exit stops capture
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        let err = AudioError::DeviceUnavailable(e.to_string());
                        let _ = startup_tx.try_send(AudioError::StreamError(e.to_string()));
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        // Surface device startup failure to the caller instead of leaving a
        // dead thread behind
        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.thread_handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(AudioError::DeviceUnavailable(
                    "input stream did not start".to_string(),
                ))
            }
        }
    }

    /// Stop capturing. A frame mid-delivery completes; no further frames
    /// are produced. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Format of the currently (or last) opened device
    pub fn format(&self) -> Option<FrameFormat> {
        *self.format.lock()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    /// Check for asynchronous stream errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_before_start_is_safe() {
        let mut engine = CaptureEngine::with_default_frame_size();
        engine.stop();
        assert!(!engine.is_running());
        assert_eq!(engine.frames_delivered(), 0);
    }

    #[test]
    fn start_reports_device_unavailable_without_hardware() {
        // On machines without an input device start must fail with
        // DeviceUnavailable rather than panic; with a device it starts.
        let mut engine = CaptureEngine::with_default_frame_size();
        let consumer: FrameConsumer = Arc::new(|_frame| {});
        match engine.start(consumer) {
            Ok(()) => {
                assert!(engine.is_running());
                assert!(engine.format().is_some());
                engine.stop();
                assert!(!engine.is_running());
            }
            Err(AudioError::DeviceUnavailable(_)) | Err(AudioError::StreamError(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
