//! Companion clip link
//!
//! Non-realtime counterpart of the streaming path: one complete recorded
//! clip travels as a single unit over a dedicated bidirectional stream and
//! lands as a playable WAV file on the receiving side. Sample semantics
//! match the live codec (native f32 PCM); only the framing differs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use iroh::endpoint::{Connection, RecvStream, SendStream};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::capture::{CaptureEngine, FrameConsumer};
use crate::audio::frame::FrameFormat;
use crate::constants::MAX_CLIP_BYTES;
use crate::error::{AudioError, CodecError, Error, NetworkError};
use crate::net::{read_msg, write_msg, TAG_CLIP};

/// Largest serialized clip header accepted
const MAX_CLIP_HEADER: usize = 4096;

/// A complete recorded clip ready for transfer
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub name: String,
    pub format: FrameFormat,
    pub samples: Vec<f32>,
}

impl AudioClip {
    pub fn new(name: impl Into<String>, format: FrameFormat, samples: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            format,
            samples,
        }
    }

    /// Payload size once serialized
    pub fn byte_len(&self) -> u64 {
        (self.samples.len() * 4) as u64
    }

    fn body(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.samples.len() * 4);
        for &sample in &self.samples {
            buf.put_f32_ne(sample);
        }
        buf
    }
}

/// Accumulates microphone input into one complete clip for the link.
///
/// Unlike the streaming relay, frames are kept: recording ends with a
/// single [`AudioClip`] holding everything captured since start.
pub struct ClipRecorder {
    capture: Mutex<CaptureEngine>,
    samples: Arc<Mutex<Vec<f32>>>,
}

impl ClipRecorder {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            capture: Mutex::new(CaptureEngine::new(frame_samples)),
            samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start recording from the default input device, discarding any
    /// previously accumulated samples. Idempotent while recording.
    pub fn start(&self) -> Result<(), AudioError> {
        self.samples.lock().clear();
        let sink = self.samples.clone();
        let consumer: FrameConsumer = Arc::new(move |frame| {
            sink.lock().extend_from_slice(frame.samples());
        });
        self.capture.lock().start(consumer)
    }

    /// Stop recording and take the accumulated clip. `None` when nothing
    /// was captured.
    pub fn stop(&self, name: impl Into<String>) -> Option<AudioClip> {
        let mut capture = self.capture.lock();
        capture.stop();
        let format = capture.format()?;
        let samples = std::mem::take(&mut *self.samples.lock());
        if samples.is_empty() {
            return None;
        }
        Some(AudioClip::new(name, format, samples))
    }

    pub fn is_recording(&self) -> bool {
        self.capture.lock().is_running()
    }
}

/// Describes the clip payload that follows it on the stream
#[derive(Debug, Serialize, Deserialize)]
struct ClipHeader {
    id: Uuid,
    name: String,
    sample_rate: u32,
    channels: u16,
    byte_len: u64,
}

/// Send one complete clip to a connected peer and wait for its ack.
/// Returns the payload size in bytes.
pub(crate) async fn send_clip(conn: &Connection, clip: &AudioClip) -> crate::Result<u64> {
    let send_err = |e: String| {
        Error::Network(NetworkError::SendFailed {
            peer: "clip link".to_string(),
            detail: e,
        })
    };

    let (mut send, mut recv) = conn.open_bi().await.map_err(|e| send_err(e.to_string()))?;
    send.write_all(&[TAG_CLIP])
        .await
        .map_err(|e| send_err(e.to_string()))?;

    let header = ClipHeader {
        id: Uuid::new_v4(),
        name: clip.name.clone(),
        sample_rate: clip.format.sample_rate,
        channels: clip.format.channels,
        byte_len: clip.byte_len(),
    };
    write_msg(&mut send, &header).await?;

    let body = clip.body();
    send.write_all(&body)
        .await
        .map_err(|e| send_err(e.to_string()))?;
    let _ = send.finish();

    let ack = recv
        .read_to_end(16)
        .await
        .map_err(|e| Error::Network(NetworkError::ReceiveFailed(e.to_string())))?;
    if ack != b"ACK" {
        return Err(send_err("peer did not acknowledge clip".to_string()));
    }

    tracing::info!(name = %clip.name, bytes = body.len(), "Clip sent");
    Ok(body.len() as u64)
}

/// Receive one clip (tag byte already consumed), write it as a playable
/// WAV file under `clip_dir`, and acknowledge.
pub(crate) async fn receive_clip(
    mut send: SendStream,
    mut recv: RecvStream,
    clip_dir: &Path,
) -> crate::Result<(PathBuf, u64)> {
    let header: ClipHeader = read_msg(&mut recv, MAX_CLIP_HEADER).await?;

    let byte_len = header.byte_len as usize;
    if byte_len > MAX_CLIP_BYTES {
        return Err(Error::Network(NetworkError::MessageTooLarge(byte_len)));
    }
    let format = FrameFormat::native(header.sample_rate, header.channels);
    if header.channels == 0 || byte_len % format.bytes_per_frame() != 0 {
        return Err(Error::Codec(CodecError::InvalidLength {
            len: byte_len,
            bytes_per_frame: format.bytes_per_frame().max(1),
        }));
    }

    let mut body = vec![0u8; byte_len];
    recv.read_exact(&mut body)
        .await
        .map_err(|e| Error::Network(NetworkError::ReceiveFailed(e.to_string())))?;

    let path = write_clip_file(clip_dir, &header, format, &body).await?;

    send.write_all(b"ACK")
        .await
        .map_err(|e| Error::Network(NetworkError::ReceiveFailed(e.to_string())))?;
    let _ = send.finish();

    tracing::info!(path = %path.display(), bytes = byte_len, "Clip received");
    Ok((path, byte_len as u64))
}

/// Materialize a received clip as a WAV file under `clip_dir`
async fn write_clip_file(
    clip_dir: &Path,
    header: &ClipHeader,
    format: FrameFormat,
    pcm: &[u8],
) -> crate::Result<PathBuf> {
    let file_name = format!(
        "{}-{}.wav",
        sanitize_name(&header.name),
        header
            .id
            .simple()
            .to_string()
            .chars()
            .take(8)
            .collect::<String>()
    );
    let path = clip_dir.join(file_name);
    tokio::fs::create_dir_all(clip_dir).await?;
    tokio::fs::write(&path, wav_bytes(format, pcm)).await?;
    Ok(path)
}

/// Build a playable WAV container (format 3, IEEE float) around raw
/// native-endian f32 PCM
fn wav_bytes(format: FrameFormat, pcm: &[u8]) -> Vec<u8> {
    let block_align = format.bytes_per_frame() as u32;
    let byte_rate = format.sample_rate * block_align;

    let mut buf = BytesMut::with_capacity(44 + pcm.len());
    buf.put_slice(b"RIFF");
    buf.put_u32_le(36 + pcm.len() as u32);
    buf.put_slice(b"WAVE");

    buf.put_slice(b"fmt ");
    buf.put_u32_le(16);
    buf.put_u16_le(3); // IEEE float
    buf.put_u16_le(format.channels);
    buf.put_u32_le(format.sample_rate);
    buf.put_u32_le(byte_rate);
    buf.put_u16_le(block_align as u16);
    buf.put_u16_le(32); // bits per sample

    buf.put_slice(b"data");
    buf.put_u32_le(pcm.len() as u32);
    buf.put_slice(pcm);

    buf.to_vec()
}

/// Keep clip-derived file names shell- and filesystem-safe
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "clip".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_body_matches_declared_length() {
        let clip = AudioClip::new(
            "memo",
            FrameFormat::native(48000, 1),
            vec![0.5; 4800],
        );
        assert_eq!(clip.byte_len(), 4800 * 4);
        assert_eq!(clip.body().len() as u64, clip.byte_len());
    }

    #[test]
    fn clip_header_round_trips_through_bincode() {
        let header = ClipHeader {
            id: Uuid::new_v4(),
            name: "walk recording".to_string(),
            sample_rate: 44100,
            channels: 2,
            byte_len: 1024,
        };
        let bytes = bincode::serialize(&header).unwrap();
        let back: ClipHeader = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.id, header.id);
        assert_eq!(back.name, header.name);
        assert_eq!(back.sample_rate, 44100);
        assert_eq!(back.channels, 2);
        assert_eq!(back.byte_len, 1024);
    }

    #[test]
    fn wav_container_is_well_formed() {
        let format = FrameFormat::native(48000, 2);
        let pcm = vec![0u8; 64];
        let wav = wav_bytes(format, &pcm);

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        // Format code 3 = IEEE float
        assert_eq!(u16::from_le_bytes([wav[20], wav[21]]), 3);
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 2);
        assert_eq!(
            u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]),
            48000
        );
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(
            u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]) as usize,
            pcm.len()
        );
        assert_eq!(wav.len(), 44 + pcm.len());
    }

    #[test]
    fn sample_bytes_round_trip_through_wav_data_section() {
        let format = FrameFormat::native(48000, 1);
        let samples = vec![0.1f32, -0.2, 0.3, -0.4];
        let clip = AudioClip::new("t", format, samples.clone());
        let wav = wav_bytes(format, &clip.body());

        let data = &wav[44..];
        let back: Vec<f32> = data
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(back, samples);
    }

    #[test]
    fn recorder_without_capture_yields_no_clip() {
        let recorder = ClipRecorder::new(2048);
        assert!(!recorder.is_recording());
        assert!(recorder.stop("empty").is_none());
    }

    #[test]
    fn names_are_sanitized_for_the_filesystem() {
        assert_eq!(sanitize_name("walk in the park"), "walk_in_the_park");
        assert_eq!(sanitize_name("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_name(""), "clip");
    }

    #[tokio::test]
    async fn received_clip_lands_as_a_playable_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let format = FrameFormat::native(48000, 1);
        let clip = AudioClip::new("porch memo", format, vec![0.25f32; 480]);
        let header = ClipHeader {
            id: Uuid::new_v4(),
            name: clip.name.clone(),
            sample_rate: format.sample_rate,
            channels: format.channels,
            byte_len: clip.byte_len(),
        };

        let path = write_clip_file(dir.path(), &header, format, &clip.body())
            .await
            .unwrap();

        assert!(path.file_name().unwrap().to_string_lossy().ends_with(".wav"));
        let wav = tokio::fs::read(&path).await.unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(wav.len(), 44 + clip.byte_len() as usize);
    }
}
