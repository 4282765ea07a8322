use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::{AudioBackendConfig, ChunkConfig};
use crate::realtime::messages::{InputAudioTranscription, SessionUpdate, TurnDetection, Voice};
use crate::supervisor::ReconnectPolicy;

/// Default behavioural instructions for the assistant
pub const DEFAULT_INSTRUCTIONS: &str = "You are a voice assistant for a task management workspace. \
Help the user create, list, update, complete and delete tasks, check and schedule meetings, \
get completion reports and send emails. Tasks may be referenced by number or by title. \
Only report tasks, meetings and other data that the backend actually returned; never invent \
them, and say so plainly when nothing was returned. Confirm every action clearly and keep \
replies short and conversational.";

/// Configuration for a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier
    pub session_id: String,

    /// Sample rate for capture and playback (the endpoint expects 24kHz)
    pub sample_rate: u32,

    /// Transmitted frame size in bytes
    /// Default: 4800 (200ms of 24kHz mono PCM16)
    pub frame_bytes: usize,

    /// Cap on frames buffered while the connection is degraded (0 = unbounded)
    pub max_pending_frames: usize,

    /// Playback sub-chunk size in samples
    pub playback_chunk_samples: usize,

    /// Capture buffer duration requested from the input device
    pub capture_buffer: Duration,

    pub voice: Voice,
    pub instructions: String,
    pub temperature: f32,

    /// Input transcription model and forced language
    pub transcription_model: String,
    pub language: String,

    /// Delay before the single retry of the initial configuration send
    pub config_retry_delay: Duration,

    pub reconnect_max_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("voice-{}", uuid::Uuid::new_v4()),
            sample_rate: 24000,
            frame_bytes: 4800,
            max_pending_frames: 300, // 60 seconds
            playback_chunk_samples: 1024,
            capture_buffer: Duration::from_millis(100),
            voice: Voice::Alloy,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            temperature: 0.8,
            transcription_model: "whisper-1".to_string(),
            language: "en".to_string(),
            config_retry_delay: Duration::from_millis(300),
            reconnect_max_attempts: 5,
            reconnect_base_delay: Duration::from_millis(800),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    /// The `session.update` payload sent after connecting
    pub fn session_update(&self) -> SessionUpdate {
        SessionUpdate {
            turn_detection: TurnDetection::server_vad(),
            input_audio_transcription: InputAudioTranscription {
                model: self.transcription_model.clone(),
                language: self.language.clone(),
            },
            instructions: self.instructions.clone(),
            temperature: self.temperature,
            voice: self.voice,
        }
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            frame_bytes: self.frame_bytes,
            max_pending_frames: self.max_pending_frames,
        }
    }

    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            sample_rate: self.sample_rate,
            buffer_duration_ms: self.capture_buffer.as_millis() as u64,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_max_attempts,
            base_delay: self.reconnect_base_delay,
            max_delay: self.reconnect_max_delay,
        }
    }
}
