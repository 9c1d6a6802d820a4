//! Wire message layout and conversion
//!
//! Layout: a 16-byte little-endian header followed by the frame's raw
//! sample bytes.
//!
//! ```text
//! [magic:u32][sample_rate:u32][channels:u16][bytes_per_sample:u16][frame_len:u32][pcm bytes…]
//! ```
//!
//! The header makes each payload self-describing: a receiver decodes
//! against its own playback format and rejects frames whose declared
//! format differs, instead of silently playing them at the wrong rate.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::audio::frame::{AudioFrame, FrameFormat};
use crate::error::CodecError;

/// Identifies a voicemesh PCM frame
pub const WIRE_MAGIC: u32 = 0x564D_4631; // "VMF1"

/// Fixed header length in bytes
pub const HEADER_LEN: usize = 16;

/// Parsed wire message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub format: FrameFormat,
    /// Samples per channel in the body
    pub frame_len: u32,
}

impl WireHeader {
    pub fn for_frame(frame: &AudioFrame) -> Self {
        Self {
            format: frame.format,
            frame_len: frame.frame_len as u32,
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(WIRE_MAGIC);
        buf.put_u32_le(self.format.sample_rate);
        buf.put_u16_le(self.format.channels);
        buf.put_u16_le(self.format.bytes_per_sample);
        buf.put_u32_le(self.frame_len);
    }

    fn read(mut buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::Decode(format!(
                "payload too short for header: {} bytes",
                buf.len()
            )));
        }
        let magic = buf.get_u32_le();
        if magic != WIRE_MAGIC {
            return Err(CodecError::Decode(format!("bad magic {magic:#010x}")));
        }
        let sample_rate = buf.get_u32_le();
        let channels = buf.get_u16_le();
        let bytes_per_sample = buf.get_u16_le();
        let frame_len = buf.get_u32_le();
        if channels == 0 || bytes_per_sample == 0 || sample_rate == 0 {
            return Err(CodecError::Decode("zero field in header".to_string()));
        }
        Ok(Self {
            format: FrameFormat {
                sample_rate,
                channels,
                bytes_per_sample,
            },
            frame_len,
        })
    }
}

/// Encode a frame into a transportable payload.
///
/// Sample bytes are copied verbatim (no compression); body length equals
/// frame length × bytes-per-frame.
pub fn encode(frame: &AudioFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + frame.byte_len());
    WireHeader::for_frame(frame).write(&mut buf);
    for &sample in frame.samples() {
        buf.put_f32_ne(sample);
    }
    buf.freeze()
}

/// Reconstruct a frame from a payload, validating it against the local
/// playback format.
///
/// Fails when the payload is truncated, its body length is not evenly
/// divisible by the target's bytes-per-frame, the header and body
/// disagree, or the declared format differs from `target`.
pub fn decode(payload: &[u8], target: FrameFormat) -> Result<AudioFrame, CodecError> {
    let header = WireHeader::read(payload)?;
    let body = &payload[HEADER_LEN..];

    let bytes_per_frame = target.bytes_per_frame();
    if body.len() % bytes_per_frame != 0 {
        return Err(CodecError::InvalidLength {
            len: body.len(),
            bytes_per_frame,
        });
    }

    if header.format != target {
        return Err(CodecError::FormatMismatch {
            declared: header.format.to_string(),
            local: target.to_string(),
        });
    }

    let expected = header.frame_len as usize * bytes_per_frame;
    if body.len() != expected {
        return Err(CodecError::Decode(format!(
            "body is {} bytes, header declares {}",
            body.len(),
            expected
        )));
    }

    let samples: Vec<f32> = body
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    AudioFrame::new(target, samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sine_frame(format: FrameFormat, frame_len: usize) -> AudioFrame {
        let mut samples = Vec::with_capacity(frame_len * format.channels as usize);
        for i in 0..frame_len {
            let t = i as f32 / format.sample_rate as f32;
            let v = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5;
            for _ in 0..format.channels {
                samples.push(v);
            }
        }
        AudioFrame::new(format, samples).unwrap()
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let fmt = FrameFormat::native(48000, 2);
        let frame = sine_frame(fmt, 2048);

        let payload = encode(&frame);
        assert_eq!(payload.len(), HEADER_LEN + frame.byte_len());

        let decoded = decode(&payload, fmt).unwrap();
        assert_eq!(decoded.samples(), frame.samples());
        assert_eq!(decoded.format, fmt);
        assert_eq!(decoded.frame_len, 2048);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = decode(&[0u8; 7], FrameFormat::native(48000, 2)).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let fmt = FrameFormat::native(48000, 2);
        let mut payload = encode(&sine_frame(fmt, 64)).to_vec();
        payload[0] ^= 0xFF;
        assert!(matches!(
            decode(&payload, fmt).unwrap_err(),
            CodecError::Decode(_)
        ));
    }

    #[test]
    fn indivisible_body_is_rejected_and_next_frame_unaffected() {
        let fmt = FrameFormat::native(48000, 2);
        let good = encode(&sine_frame(fmt, 128));

        // Strip one byte so the body is no longer divisible by
        // bytes-per-frame (8 for stereo f32)
        let corrupted = &good[..good.len() - 1];
        assert!(matches!(
            decode(corrupted, fmt).unwrap_err(),
            CodecError::InvalidLength { .. }
        ));

        // The valid payload still decodes afterwards
        assert!(decode(&good, fmt).is_ok());
    }

    #[test]
    fn format_mismatch_is_rejected() {
        let sender_fmt = FrameFormat::native(44100, 2);
        let local_fmt = FrameFormat::native(48000, 2);
        let payload = encode(&sine_frame(sender_fmt, 64));
        assert!(matches!(
            decode(&payload, local_fmt).unwrap_err(),
            CodecError::FormatMismatch { .. }
        ));
    }

    #[test]
    fn header_body_length_disagreement_is_rejected() {
        let fmt = FrameFormat::native(48000, 2);
        let mut payload = encode(&sine_frame(fmt, 64)).to_vec();
        // Append one full stereo sample frame: still divisible, but longer
        // than the header declares
        payload.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            decode(&payload, fmt).unwrap_err(),
            CodecError::Decode(_)
        ));
    }

    proptest! {
        #[test]
        fn round_trip_any_samples(
            samples in proptest::collection::vec(-1.0f32..1.0, 2..512),
            channels in 1u16..=2,
        ) {
            // Trim so the buffer fills whole multi-channel frames
            let len = samples.len() - samples.len() % channels as usize;
            let fmt = FrameFormat::native(48000, channels);
            let frame = AudioFrame::new(fmt, samples[..len].to_vec()).unwrap();

            let decoded = decode(&encode(&frame), fmt).unwrap();
            prop_assert_eq!(decoded.samples(), frame.samples());
        }
    }
}
