//! Bounded per-peer playback queues
//!
//! Lock-free single-producer single-consumer frame queues, one per source
//! peer. Capacity bounds end-to-end latency: when a queue is full the
//! oldest frame is evicted before the new one is admitted, so the stream
//! stays fresh at the cost of completeness under sustained overload.

use crossbeam::queue::ArrayQueue;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::frame::AudioFrame;
use crate::session::PeerId;

/// Bounded frame queue for a single source peer
pub struct PlaybackQueue {
    queue: ArrayQueue<AudioFrame>,
    /// Frames evicted to make room for fresher audio
    evicted: AtomicUsize,
    /// Pops that found the queue empty
    underruns: AtomicUsize,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            evicted: AtomicUsize::new(0),
            underruns: AtomicUsize::new(0),
        }
    }

    /// Enqueue a frame, evicting the oldest entry first when full
    pub fn push(&self, frame: AudioFrame) {
        if self.queue.force_push(frame).is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Dequeue the oldest frame; None means starvation (play silence)
    pub fn pop(&self) -> Option<AudioFrame> {
        match self.queue.pop() {
            Some(frame) => Some(frame),
            None => {
                self.underruns.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn evicted(&self) -> usize {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Per-peer queue map shared between the reception path (producer) and the
/// playback sink (consumer)
pub struct PlaybackQueues {
    queues: DashMap<PeerId, Arc<PlaybackQueue>>,
    capacity: usize,
}

impl PlaybackQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            capacity,
        }
    }

    /// Enqueue a decoded frame from `peer`, creating its queue on first use
    pub fn enqueue(&self, peer: PeerId, frame: AudioFrame) {
        let queue = self
            .queues
            .entry(peer)
            .or_insert_with(|| Arc::new(PlaybackQueue::new(self.capacity)))
            .clone();
        queue.push(frame);
    }

    /// Remove a departed peer's queue, discarding any unplayed frames
    pub fn remove(&self, peer: &PeerId) {
        self.queues.remove(peer);
    }

    pub fn get(&self, peer: &PeerId) -> Option<Arc<PlaybackQueue>> {
        self.queues.get(peer).map(|q| q.value().clone())
    }

    /// Snapshot of current (peer, queue) pairs for the mixer
    pub fn snapshot(&self) -> Vec<(PeerId, Arc<PlaybackQueue>)> {
        self.queues
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::FrameFormat;

    fn frame(tag: f32) -> AudioFrame {
        let fmt = FrameFormat::native(48000, 1);
        AudioFrame::new(fmt, vec![tag; 8]).unwrap()
    }

    #[test]
    fn pops_in_arrival_order() {
        let q = PlaybackQueue::new(4);
        q.push(frame(1.0));
        q.push(frame(2.0));
        assert_eq!(q.pop().unwrap().samples()[0], 1.0);
        assert_eq!(q.pop().unwrap().samples()[0], 2.0);
        assert!(q.pop().is_none());
        assert_eq!(q.underruns(), 1);
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let q = PlaybackQueue::new(3);
        for tag in 1..=5 {
            q.push(frame(tag as f32));
        }
        // Capacity never exceeded; the two oldest frames were evicted
        assert_eq!(q.len(), 3);
        assert_eq!(q.evicted(), 2);
        assert_eq!(q.pop().unwrap().samples()[0], 3.0);
        assert_eq!(q.pop().unwrap().samples()[0], 4.0);
        assert_eq!(q.pop().unwrap().samples()[0], 5.0);
    }

    #[test]
    fn queue_never_exceeds_capacity() {
        let q = PlaybackQueue::new(8);
        for tag in 0..100 {
            q.push(frame(tag as f32));
            assert!(q.len() <= q.capacity());
        }
    }

    #[test]
    fn queues_are_isolated_per_peer() {
        let peers = PlaybackQueues::new(4);
        let a = crate::session::test_peer_id(1);
        let b = crate::session::test_peer_id(2);

        peers.enqueue(a, frame(1.0));
        peers.enqueue(b, frame(9.0));

        assert_eq!(peers.get(&a).unwrap().len(), 1);
        assert_eq!(peers.get(&b).unwrap().len(), 1);

        peers.remove(&a);
        assert!(peers.get(&a).is_none());
        assert_eq!(peers.get(&b).unwrap().len(), 1);
    }
}
