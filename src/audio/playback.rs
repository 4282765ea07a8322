// Playback queue shared between the message loop and an output device
//
// The message loop enqueues decoded PCM16 samples; the output callback pulls
// them one at a time. A flush empties the queue under the same lock the pull
// uses, so a pull never observes a half-flushed queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::convert::pcm16_to_f32;

/// FIFO queue of PCM16 samples waiting to be played
#[derive(Clone, Default)]
pub struct PlaybackQueue {
    samples: Arc<Mutex<VecDeque<i16>>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<i16>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append samples at the tail, preserving order
    pub fn enqueue(&self, samples: &[i16]) {
        self.lock().extend(samples.iter().copied());
    }

    /// Empty the queue atomically
    pub fn flush(&self) {
        self.lock().clear();
    }

    /// Fill `out` with queued samples scaled to [-1.0, 1.0], silence once empty
    ///
    /// Returns the number of queued samples consumed.
    pub fn pull(&self, out: &mut [f32]) -> usize {
        let mut queue = self.lock();
        let mut consumed = 0;

        for slot in out.iter_mut() {
            *slot = match queue.pop_front() {
                Some(sample) => {
                    consumed += 1;
                    pcm16_to_f32(sample)
                }
                None => 0.0,
            };
        }

        consumed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
