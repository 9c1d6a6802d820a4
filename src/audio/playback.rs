//! Playback sink
//!
//! Drains the per-peer playback queues on the output device's demand,
//! mixing all source peers into one output and emitting silence when a
//! queue starves. Pausing mutes the output while leaving every queue
//! intact, so resume continues from the next unplayed frame.

use cpal::traits::{DeviceTrait, StreamTrait};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::default_output_device;
use crate::audio::frame::{AudioFrame, FrameFormat};
use crate::audio::queue::PlaybackQueues;
use crate::error::AudioError;
use crate::session::PeerId;

/// Output sink mixing per-peer queues into the default output device
pub struct PlaybackEngine {
    queues: Arc<PlaybackQueues>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    /// Playback gain as f32 bits
    gain_bits: Arc<AtomicU32>,
    format: Arc<parking_lot::Mutex<Option<FrameFormat>>>,
    thread_handle: Option<JoinHandle<()>>,
}

/// Partially consumed frame carried across output callbacks
struct Leftover {
    frame: AudioFrame,
    pos: usize,
}

impl PlaybackEngine {
    pub fn new(queues: Arc<PlaybackQueues>) -> Self {
        Self {
            queues,
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            gain_bits: Arc::new(AtomicU32::new(1.0_f32.to_bits())),
            format: Arc::new(parking_lot::Mutex::new(None)),
            thread_handle: None,
        }
    }

    /// Open the default output device and start draining queues.
    /// Idempotent; a second start while running is a no-op.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = default_output_device()?;
        let format = device.format;
        let config = device.stream_config();
        *self.format.lock() = Some(format);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let paused = self.paused.clone();
        let gain_bits = self.gain_bits.clone();
        let queues = self.queues.clone();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), AudioError>>(1);

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("voicemesh-playback".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let mut leftovers: HashMap<PeerId, Leftover> = HashMap::new();

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        data.fill(0.0);

                        if paused.load(Ordering::Relaxed) || !running.load(Ordering::Relaxed) {
                            return;
                        }

                        let gain = f32::from_bits(gain_bits.load(Ordering::Relaxed));
                        mix_into(data, &queues, &mut leftovers, gain);
                    },
                    move |err| {
                        tracing::warn!("Output stream error: {}", err);
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = ready_tx
                                .send(Err(AudioError::DeviceUnavailable(e.to_string())));
                            return;
                        }
                        let _ = ready_tx.send(Ok(()));

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::DeviceUnavailable(e.to_string())));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

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
                    "output stream did not start".to_string(),
                ))
            }
        }
    }

    /// Stop the sink. Queued frames remain in their queues.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Mute output without disturbing queue contents
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume from the next unplayed frame
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Playback gain applied at the sink (does not touch the wire path)
    pub fn set_gain(&self, gain: f32) {
        self.gain_bits
            .store(gain.clamp(0.0, 4.0).to_bits(), Ordering::SeqCst);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::SeqCst))
    }

    /// Native format of the opened output device
    pub fn format(&self) -> Option<FrameFormat> {
        *self.format.lock()
    }

    pub fn queues(&self) -> &Arc<PlaybackQueues> {
        &self.queues
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Mix every peer's pending audio into `data`, tolerating starvation by
/// leaving silence in place
fn mix_into(
    data: &mut [f32],
    queues: &PlaybackQueues,
    leftovers: &mut HashMap<PeerId, Leftover>,
    gain: f32,
) {
    use std::collections::hash_map::Entry;

    for (peer, queue) in queues.snapshot() {
        let mut written = 0;

        while written < data.len() {
            let leftover = match leftovers.entry(peer) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => match queue.pop() {
                    Some(frame) => entry.insert(Leftover { frame, pos: 0 }),
                    // Starved: leave the rest of this peer's contribution
                    // as silence
                    None => break,
                },
            };

            let samples = leftover.frame.samples();
            let available = samples.len() - leftover.pos;
            let take = available.min(data.len() - written);
            for i in 0..take {
                data[written + i] += samples[leftover.pos + i] * gain;
            }
            leftover.pos += take;
            written += take;

            if leftover.pos >= samples.len() {
                leftovers.remove(&peer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::FrameFormat;
    use crate::constants::PLAYBACK_QUEUE_CAPACITY;
    use crate::session::test_peer_id;

    fn frame_of(value: f32, len: usize) -> AudioFrame {
        AudioFrame::new(FrameFormat::native(48000, 1), vec![value; len]).unwrap()
    }

    #[test]
    fn mixer_sums_peers_and_applies_gain() {
        let queues = PlaybackQueues::new(PLAYBACK_QUEUE_CAPACITY);
        queues.enqueue(test_peer_id(1), frame_of(0.25, 16));
        queues.enqueue(test_peer_id(2), frame_of(0.5, 16));

        let mut data = vec![0.0f32; 16];
        let mut leftovers = HashMap::new();
        mix_into(&mut data, &queues, &mut leftovers, 2.0);

        for &s in &data {
            assert!((s - 1.5).abs() < 1e-6);
        }
    }

    #[test]
    fn starvation_yields_silence() {
        let queues = PlaybackQueues::new(PLAYBACK_QUEUE_CAPACITY);
        queues.enqueue(test_peer_id(1), frame_of(1.0, 8));

        let mut data = vec![0.0f32; 16];
        let mut leftovers = HashMap::new();
        mix_into(&mut data, &queues, &mut leftovers, 1.0);

        // First 8 samples from the only queued frame, remainder silence
        assert!(data[..8].iter().all(|&s| (s - 1.0).abs() < 1e-6));
        assert!(data[8..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn leftover_carries_across_callbacks() {
        let queues = PlaybackQueues::new(PLAYBACK_QUEUE_CAPACITY);
        let peer = test_peer_id(1);
        queues.enqueue(peer, frame_of(1.0, 12));

        let mut leftovers = HashMap::new();
        let mut first = vec![0.0f32; 8];
        mix_into(&mut first, &queues, &mut leftovers, 1.0);
        let mut second = vec![0.0f32; 8];
        mix_into(&mut second, &queues, &mut leftovers, 1.0);

        assert!(first.iter().all(|&s| (s - 1.0).abs() < 1e-6));
        assert!(second[..4].iter().all(|&s| (s - 1.0).abs() < 1e-6));
        assert!(second[4..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn pause_leaves_queue_depth_unchanged() {
        let queues = Arc::new(PlaybackQueues::new(PLAYBACK_QUEUE_CAPACITY));
        let engine = PlaybackEngine::new(queues.clone());
        let peer = test_peer_id(1);

        queues.enqueue(peer, frame_of(1.0, 8));
        queues.enqueue(peer, frame_of(2.0, 8));

        engine.pause();
        assert!(engine.is_paused());
        assert_eq!(queues.get(&peer).unwrap().len(), 2);

        engine.resume();
        assert!(!engine.is_paused());
        // Next consumed frame is the first unplayed one
        assert_eq!(queues.get(&peer).unwrap().pop().unwrap().samples()[0], 1.0);
    }

    #[test]
    fn gain_is_clamped() {
        let engine = PlaybackEngine::new(Arc::new(PlaybackQueues::new(4)));
        engine.set_gain(10.0);
        assert_eq!(engine.gain(), 4.0);
        engine.set_gain(-1.0);
        assert_eq!(engine.gain(), 0.0);
    }
}
