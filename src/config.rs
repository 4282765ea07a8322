use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::realtime::{Credentials, Endpoint, Voice};
use crate::session::{SessionConfig, DEFAULT_INSTRUCTIONS};

/// Environment prefix: `TASKVOICE_REALTIME__VOICE=echo`
pub const ENV_PREFIX: &str = "TASKVOICE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub realtime: RealtimeConfig,
    pub audio: AudioConfig,
    pub commands: CommandsConfig,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Azure OpenAI endpoint; OpenAI is used when unset
    pub endpoint: Option<String>,
    pub deployment: String,
    pub model: String,
    pub voice: Voice,
    pub temperature: f32,
    pub transcription_model: String,
    pub language: String,
    pub instructions: String,
    pub api_key: Option<String>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            deployment: "gpt-4o-realtime-preview".to_string(),
            model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
            voice: Voice::Alloy,
            temperature: 0.8,
            transcription_model: "whisper-1".to_string(),
            language: "en".to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_bytes: usize,
    pub playback_chunk_samples: usize,
    pub max_pending_frames: usize,
    /// Replay a WAV file instead of the microphone
    pub input_wav: Option<PathBuf>,
    /// Record assistant audio to a WAV file instead of the speaker
    pub output_wav: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            frame_bytes: 4800,
            playback_chunk_samples: 1024,
            max_pending_frames: 300,
            input_wav: None,
            output_wav: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            token: None,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 800,
            max_delay_ms: 30_000,
        }
    }
}

impl Config {
    /// Load defaults, then the optional config file, then `TASKVOICE_*` variables
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Realtime endpoint credentials; the API key must be present by now
    pub fn credentials(&self) -> Result<Credentials> {
        let api_key = self
            .realtime
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .context("No API key configured (use --api-key or OPENAI_API_KEY)")?;

        let endpoint = match &self.realtime.endpoint {
            Some(endpoint) => Endpoint::Azure {
                endpoint: endpoint.clone(),
                deployment: self.realtime.deployment.clone(),
            },
            None => Endpoint::OpenAi {
                model: self.realtime.model.clone(),
            },
        };

        Ok(Credentials { api_key, endpoint })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            sample_rate: self.audio.sample_rate,
            frame_bytes: self.audio.frame_bytes,
            max_pending_frames: self.audio.max_pending_frames,
            playback_chunk_samples: self.audio.playback_chunk_samples,
            voice: self.realtime.voice,
            instructions: self.realtime.instructions.clone(),
            temperature: self.realtime.temperature,
            transcription_model: self.realtime.transcription_model.clone(),
            language: self.realtime.language.clone(),
            reconnect_max_attempts: self.reconnect.max_attempts,
            reconnect_base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            reconnect_max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            ..SessionConfig::default()
        }
    }

    /// Copy suitable for printing
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.realtime.api_key.is_some() {
            copy.realtime.api_key = Some("<redacted>".to_string());
        }
        if copy.commands.token.is_some() {
            copy.commands.token = Some("<redacted>".to_string());
        }
        copy
    }
}
