use std::collections::VecDeque;
use tracing::{debug, warn};

/// Frame chunking configuration
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Size of each transmitted frame in bytes (default: 4800 = 200ms at 24kHz PCM16 mono)
    pub frame_bytes: usize,
    /// Maximum number of whole frames kept pending (0 = unbounded)
    /// When exceeded, the oldest frame is dropped
    pub max_pending_frames: usize,
}

impl ChunkConfig {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes,
            max_pending_frames: 300, // 60 seconds at 200ms frames
        }
    }

    fn max_pending_bytes(&self) -> Option<usize> {
        if self.max_pending_frames == 0 || self.frame_bytes == 0 {
            return None;
        }
        Some(self.max_pending_frames * self.frame_bytes)
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self::new(4800)
    }
}

/// A fixed-size slice of PCM16 bytes ready for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    bytes: Vec<u8>,
}

impl AudioFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Pending audio buffer with fixed-size frame slicing
///
/// Bytes are appended at the tail and frames consumed from the head.
/// Partial remainders stay buffered until enough bytes arrive.
pub struct FrameChunker {
    config: ChunkConfig,
    pending: VecDeque<u8>,
    frames_dropped: u64,
    frames_requeued: u64,
}

impl FrameChunker {
    pub fn new(config: ChunkConfig) -> Self {
        debug!(
            "Frame chunker initialized: {} bytes/frame, cap {} frames",
            config.frame_bytes, config.max_pending_frames
        );

        Self {
            config,
            pending: VecDeque::new(),
            frames_dropped: 0,
            frames_requeued: 0,
        }
    }

    /// Append PCM bytes at the tail, dropping the oldest whole frames past the cap
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied());

        if let Some(cap) = self.config.max_pending_bytes() {
            let mut dropped = 0;
            while self.pending.len() > cap {
                self.pending.drain(..self.config.frame_bytes);
                dropped += 1;
            }

            if dropped > 0 {
                self.frames_dropped += dropped;
                warn!(
                    "Pending audio over cap: dropped {} oldest frame(s) ({} total)",
                    dropped, self.frames_dropped
                );
            }
        }
    }

    /// Slice the head frame off the buffer if a full frame is available
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.config.frame_bytes == 0 || self.pending.len() < self.config.frame_bytes {
            return None;
        }

        let bytes: Vec<u8> = self.pending.drain(..self.config.frame_bytes).collect();
        Some(AudioFrame { bytes })
    }

    /// Slice off every complete frame, in order
    pub fn drain_frames(&mut self) -> Vec<AudioFrame> {
        let mut frames = Vec::with_capacity(self.pending.len() / self.config.frame_bytes.max(1));
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Put a frame that could not be sent back at the head of the buffer
    pub fn requeue(&mut self, frame: AudioFrame) {
        for &byte in frame.bytes.iter().rev() {
            self.pending.push_front(byte);
        }
        self.frames_requeued += 1;
    }

    /// Bytes currently buffered (including any partial frame)
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn frames_requeued(&self) -> u64 {
        self.frames_requeued
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_restores_head_order() {
        let mut chunker = FrameChunker::new(ChunkConfig {
            frame_bytes: 4,
            max_pending_frames: 0,
        });
        chunker.push(&[1, 2, 3, 4, 5, 6]);

        let frame = chunker.next_frame().unwrap();
        assert_eq!(frame.as_bytes(), &[1, 2, 3, 4]);
        chunker.requeue(frame);

        assert_eq!(chunker.pending_len(), 6);
        assert_eq!(chunker.next_frame().unwrap().as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(chunker.frames_requeued(), 1);
    }
}
