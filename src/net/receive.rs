//! Reception pipeline
//!
//! One task per connection reads length-prefixed wire messages off the
//! peer's audio streams, decodes them against the local playback format,
//! and enqueues the frames on that peer's playback queue. A malformed
//! payload costs exactly one frame; decode failures never touch another
//! peer's queue or end the stream.

use std::sync::Arc;

use iroh::endpoint::Connection;
use tokio::sync::mpsc;

use crate::audio::frame::FrameFormat;
use crate::audio::queue::PlaybackQueues;
use crate::codec;
use crate::constants::MAX_WIRE_BODY;
use crate::error::CodecError;
use crate::net::read_chunk;
use crate::session::{Command, PeerId};

/// Decode one received payload and enqueue it for playback.
///
/// The error path drops the offending frame and leaves every queue as it
/// was.
pub fn handle_payload(
    peer: PeerId,
    payload: &[u8],
    format: FrameFormat,
    queues: &PlaybackQueues,
) -> Result<(), CodecError> {
    let frame = codec::decode(payload, format)?;
    queues.enqueue(peer, frame);
    Ok(())
}

/// Drain audio streams from `conn` until the connection ends, then report
/// the closure to the session loop.
pub(crate) async fn run_receiver(
    conn: Connection,
    peer: PeerId,
    queues: Arc<PlaybackQueues>,
    format: FrameFormat,
    cmd_tx: mpsc::Sender<Command>,
) {
    loop {
        let mut stream = match conn.accept_uni().await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = cmd_tx
                    .send(Command::ConnClosed {
                        peer,
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        loop {
            let payload = match read_chunk(&mut stream, MAX_WIRE_BODY).await {
                Ok(payload) => payload,
                // Stream finished or reset; wait for the sender's next one
                Err(_) => break,
            };

            if let Err(e) = handle_payload(peer, &payload, format, &queues) {
                let _ = cmd_tx
                    .send(Command::DecodeFailed {
                        peer,
                        detail: e.to_string(),
                    })
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::AudioFrame;
    use crate::constants::PLAYBACK_QUEUE_CAPACITY;
    use crate::session::test_peer_id;

    fn tagged_frame(format: FrameFormat, tag: f32) -> AudioFrame {
        let mut samples = vec![tag; 64 * format.channels as usize];
        samples[0] = tag;
        AudioFrame::new(format, samples).unwrap()
    }

    #[test]
    fn ten_frames_arrive_in_capture_order() {
        let format = FrameFormat::native(48000, 2);
        let queues = PlaybackQueues::new(PLAYBACK_QUEUE_CAPACITY);
        let peer = test_peer_id(1);

        for i in 0..10 {
            let payload = codec::encode(&tagged_frame(format, i as f32));
            handle_payload(peer, &payload, format, &queues).unwrap();
        }

        let queue = queues.get(&peer).unwrap();
        assert_eq!(queue.len(), 10);
        for i in 0..10 {
            assert_eq!(queue.pop().unwrap().samples()[0], i as f32);
        }
    }

    #[test]
    fn corrupted_payload_is_dropped_without_breaking_the_stream() {
        let format = FrameFormat::native(48000, 2);
        let queues = PlaybackQueues::new(PLAYBACK_QUEUE_CAPACITY);
        let peer = test_peer_id(1);

        let good = codec::encode(&tagged_frame(format, 1.0));

        // Length not divisible by bytes-per-frame
        let corrupted = &good[..good.len() - 3];
        assert!(handle_payload(peer, corrupted, format, &queues).is_err());

        // Next valid frame is unaffected
        handle_payload(peer, &good, format, &queues).unwrap();
        assert_eq!(queues.get(&peer).unwrap().len(), 1);
    }

    #[test]
    fn decode_failure_leaves_other_peers_queues_alone() {
        let format = FrameFormat::native(48000, 2);
        let queues = PlaybackQueues::new(PLAYBACK_QUEUE_CAPACITY);
        let healthy = test_peer_id(1);
        let faulty = test_peer_id(2);

        let good = codec::encode(&tagged_frame(format, 5.0));
        handle_payload(healthy, &good, format, &queues).unwrap();

        assert!(handle_payload(faulty, b"garbage", format, &queues).is_err());

        assert_eq!(queues.get(&healthy).unwrap().len(), 1);
        assert!(queues.get(&faulty).is_none());
    }
}
