use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Raw float samples delivered by a capture device (mono, [-1.0, 1.0])
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    /// Raw audio samples as produced by the device
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for audio devices
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Sample rate shared by capture and playback
    pub sample_rate: u32,
    /// Capture buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl AudioBackendConfig {
    /// Number of samples per capture buffer
    pub fn samples_per_buffer(&self) -> usize {
        (self.sample_rate as u64 * self.buffer_duration_ms / 1000) as usize
    }
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,    // Realtime endpoint expects 24kHz
            buffer_duration_ms: 100,
        }
    }
}

/// Audio capture source
///
/// Implementations:
/// - cpal microphone (feature `cpal-audio`)
/// - WAV file (headless runs and tests)
#[async_trait::async_trait]
pub trait AudioSource: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive sample buffers
    async fn start(&mut self) -> Result<mpsc::Receiver<SampleBuffer>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get source name for logging
    fn name(&self) -> &str;
}

/// Audio output sink fed with decoded PCM16 samples
///
/// Shared between the message loop, which feeds it, and session teardown,
/// so every method takes `&self`.
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    /// Open the output and start pulling samples
    async fn start(&self) -> Result<()>;

    /// Append samples to the playback queue
    fn enqueue(&self, samples: &[i16]);

    /// Drop everything queued but not yet played
    fn flush(&self);

    /// Close the output
    async fn stop(&self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Opens capture/playback devices for each new session
pub trait AudioDevices: Send + Sync {
    fn open_source(&self, config: &AudioBackendConfig) -> Result<Box<dyn AudioSource>>;

    fn open_sink(&self, config: &AudioBackendConfig) -> Result<Box<dyn AudioSink>>;
}

/// Audio input selection
#[derive(Debug, Clone)]
pub enum AudioInput {
    /// Microphone input (requires the `cpal-audio` feature)
    Microphone,
    /// WAV file input
    File(PathBuf),
}

/// Platform device factory
#[derive(Debug, Clone)]
pub struct DefaultDevices {
    pub input: AudioInput,
    /// Where to write assistant audio when no speaker is available
    pub output_wav: Option<PathBuf>,
}

impl AudioDevices for DefaultDevices {
    fn open_source(&self, config: &AudioBackendConfig) -> Result<Box<dyn AudioSource>> {
        match &self.input {
            AudioInput::Microphone => {
                #[cfg(feature = "cpal-audio")]
                {
                    let source = super::device::MicrophoneSource::new(config.clone())?;
                    Ok(Box::new(source))
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    anyhow::bail!("Microphone capture requires the `cpal-audio` feature")
                }
            }

            AudioInput::File(path) => {
                let source = super::file::WavFileSource::open(path, config.clone())?;
                Ok(Box::new(source))
            }
        }
    }

    fn open_sink(&self, config: &AudioBackendConfig) -> Result<Box<dyn AudioSink>> {
        if self.output_wav.is_none() {
            if let Some(sink) = speaker_sink(config)? {
                return Ok(sink);
            }
        }

        let sink = super::file::WavFileSink::new(config.clone(), self.output_wav.clone());
        Ok(Box::new(sink))
    }
}

#[cfg(feature = "cpal-audio")]
fn speaker_sink(config: &AudioBackendConfig) -> Result<Option<Box<dyn AudioSink>>> {
    let sink = super::device::SpeakerSink::new(config.clone())?;
    Ok(Some(Box::new(sink)))
}

#[cfg(not(feature = "cpal-audio"))]
fn speaker_sink(_config: &AudioBackendConfig) -> Result<Option<Box<dyn AudioSink>>> {
    Ok(None)
}
