use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::state::SessionState;
use crate::audio::convert::f32_to_pcm16_bytes;
use crate::audio::{ChunkConfig, FrameChunker};
use crate::realtime::{ClientEvent, RealtimeTransport};

/// Capture-side buffering and frame transmission
///
/// Capture appends unconditionally and never awaits the network; each append
/// wakes the transmit task, which sends frames only while the connection is
/// open. A frame whose send fails goes back to the head of the buffer so
/// ordering survives a degraded period.
pub struct FrameTransmitter {
    chunker: Mutex<FrameChunker>,
    // One pump at a time so frames hit the wire in buffer order
    pump_lock: tokio::sync::Mutex<()>,
    ready: Notify,
    state: Arc<SessionState>,
    frames_sent: AtomicU64,
}

impl FrameTransmitter {
    pub fn new(config: ChunkConfig, state: Arc<SessionState>) -> Self {
        Self {
            chunker: Mutex::new(FrameChunker::new(config)),
            pump_lock: tokio::sync::Mutex::new(()),
            ready: Notify::new(),
            state,
            frames_sent: AtomicU64::new(0),
        }
    }

    fn chunker(&self) -> MutexGuard<'_, FrameChunker> {
        self.chunker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Convert float samples to PCM16, append them to the pending buffer and
    /// wake the transmit task
    pub fn push_samples(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let bytes = f32_to_pcm16_bytes(samples);
        self.chunker().push(&bytes);
        self.ready.notify_one();
    }

    /// Wake the transmit task without new audio, e.g. once the connection reopens
    pub fn wake(&self) {
        self.ready.notify_one();
    }

    /// Resolves after the next `push_samples` or `wake`
    ///
    /// A wake that arrives while nobody waits is kept, so none is lost between
    /// two pumps.
    pub async fn ready(&self) {
        self.ready.notified().await;
    }

    /// Send every complete frame while the connection stays open
    ///
    /// Returns the number of frames sent. A send failure requeues the frame,
    /// degrades the connection and stops the pump.
    pub async fn pump(&self, transport: &dyn RealtimeTransport) -> usize {
        if !self.state.is_connection_open() {
            return 0;
        }

        let _guard = self.pump_lock.lock().await;
        let mut sent = 0;

        while self.state.is_connection_open() {
            let next = self.chunker().next_frame();
            let Some(frame) = next else {
                break;
            };

            let event = ClientEvent::InputAudioBufferAppend {
                audio: BASE64.encode(frame.as_bytes()),
            };

            match transport.send(&event).await {
                Ok(()) => {
                    sent += 1;
                    self.frames_sent.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    warn!("Failed to send audio frame: {}", e);
                    self.chunker().requeue(frame);
                    if self.state.degrade() {
                        debug!("Connection degraded after send failure");
                    }
                    break;
                }
            }
        }

        sent
    }

    pub fn pending_len(&self) -> usize {
        self.chunker().pending_len()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.chunker().frames_dropped()
    }

    pub fn frames_requeued(&self) -> u64 {
        self.chunker().frames_requeued()
    }

    /// Discard pending audio
    pub fn clear(&self) {
        self.chunker().clear();
    }
}
