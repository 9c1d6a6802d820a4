//! Audio frame and sample format types
//!
//! A frame is a fixed-size chunk of interleaved f32 samples together with
//! the format metadata downstream conversion needs. The buffer invariant
//! (byte length = frame length × bytes-per-frame) is enforced at
//! construction and holds for the frame's lifetime.

use crate::constants::BYTES_PER_SAMPLE;
use crate::error::CodecError;

/// Sample format metadata carried with every frame and wire message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Bytes per single sample (4 for native f32 PCM)
    pub bytes_per_sample: u16,
}

impl FrameFormat {
    /// Format for native f32 PCM at the given rate and channel count
    pub fn native(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bytes_per_sample: BYTES_PER_SAMPLE,
        }
    }

    /// Bytes occupied by one multi-channel sample frame
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.bytes_per_sample as usize
    }
}

impl std::fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}B",
            self.sample_rate, self.channels, self.bytes_per_sample
        )
    }
}

/// A fixed-format chunk of interleaved audio samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Sample format metadata
    pub format: FrameFormat,
    /// Samples per channel
    pub frame_len: usize,
    /// Interleaved f32 samples; len == frame_len * channels
    samples: Vec<f32>,
}

impl AudioFrame {
    /// Create a frame, checking the buffer invariant
    pub fn new(format: FrameFormat, samples: Vec<f32>) -> Result<Self, CodecError> {
        if format.channels == 0 {
            return Err(CodecError::Encode("zero channel count".into()));
        }
        if samples.len() % format.channels as usize != 0 {
            return Err(CodecError::Encode(format!(
                "sample count {} not divisible by {} channels",
                samples.len(),
                format.channels
            )));
        }
        let frame_len = samples.len() / format.channels as usize;
        Ok(Self {
            format,
            frame_len,
            samples,
        })
    }

    /// A frame of silence with the given per-channel length
    pub fn silence(format: FrameFormat, frame_len: usize) -> Self {
        Self {
            format,
            frame_len,
            samples: vec![0.0; frame_len * format.channels as usize],
        }
    }

    /// Interleaved sample data
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Total byte length of the sample buffer
    pub fn byte_len(&self) -> usize {
        self.samples.len() * self.format.bytes_per_sample as usize
    }

    /// Frame duration in microseconds
    pub fn duration_us(&self) -> u64 {
        (self.frame_len as u64 * 1_000_000) / self.format.sample_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_enforces_buffer_invariant() {
        let fmt = FrameFormat::native(48000, 2);
        let frame = AudioFrame::new(fmt, vec![0.0; 4096]).unwrap();
        assert_eq!(frame.frame_len, 2048);
        assert_eq!(frame.byte_len(), frame.frame_len * fmt.bytes_per_frame());

        // 4097 samples cannot fill stereo frames evenly
        assert!(AudioFrame::new(fmt, vec![0.0; 4097]).is_err());
    }

    #[test]
    fn silence_frame_is_full_length() {
        let fmt = FrameFormat::native(44100, 1);
        let frame = AudioFrame::silence(fmt, 2048);
        assert_eq!(frame.samples().len(), 2048);
        assert!(frame.samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn duration_follows_sample_rate() {
        let fmt = FrameFormat::native(48000, 2);
        let frame = AudioFrame::silence(fmt, 2048);
        // 2048 samples at 48kHz is about 42.7 ms
        assert_eq!(frame.duration_us(), 42_666);
    }
}
