use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioBackendConfig, AudioSink, AudioSource, SampleBuffer};
use super::playback::PlaybackQueue;

/// Capture source that replays a mono WAV file in real time
pub struct WavFileSource {
    path: String,
    config: AudioBackendConfig,
    samples: Vec<f32>,
    task: Option<JoinHandle<()>>,
}

impl WavFileSource {
    pub fn open(path: impl AsRef<Path>, config: AudioBackendConfig) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;
        let spec = reader.spec();

        if spec.sample_rate != config.sample_rate || spec.channels != 1 {
            bail!(
                "Resampling not supported. Expected {}Hz mono, got {}Hz {}ch",
                config.sample_rate,
                spec.sample_rate,
                spec.channels
            );
        }

        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => reader
                .into_samples::<i16>()
                .map(|s| s.map(|s| s as f32 / 32768.0))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
        };

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} samples",
            samples.len() as f64 / spec.sample_rate as f64,
            spec.sample_rate,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            config,
            samples,
            task: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioSource for WavFileSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<SampleBuffer>> {
        if self.task.is_some() {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(64);
        let samples = self.samples.clone();
        let per_buffer = self.config.samples_per_buffer().max(1);
        let sample_rate = self.config.sample_rate;
        let buffer_ms = self.config.buffer_duration_ms.max(1);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(buffer_ms));
            for (i, chunk) in samples.chunks(per_buffer).enumerate() {
                ticker.tick().await;
                let buffer = SampleBuffer {
                    samples: chunk.to_vec(),
                    sample_rate,
                    timestamp_ms: i as u64 * buffer_ms,
                };
                if tx.send(buffer).await.is_err() {
                    break;
                }
            }
        });

        self.task = Some(task);
        info!("Replaying {} as microphone input", self.path);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}

/// Output sink driven by a software clock instead of a device callback
///
/// Pulls from the playback queue at the configured sample rate and, if a path
/// is set, records what would have been played to a WAV file.
pub struct WavFileSink {
    config: AudioBackendConfig,
    output: Option<PathBuf>,
    queue: PlaybackQueue,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WavFileSink {
    pub fn new(config: AudioBackendConfig, output: Option<PathBuf>) -> Self {
        Self {
            config,
            output,
            queue: PlaybackQueue::new(),
            task: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }
}

#[async_trait::async_trait]
impl AudioSink for WavFileSink {
    async fn start(&self) -> Result<()> {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }

        let mut writer = match &self.output {
            Some(path) => {
                let spec = WavSpec {
                    channels: 1,
                    sample_rate: self.config.sample_rate,
                    bits_per_sample: 16,
                    sample_format: SampleFormat::Int,
                };
                let writer = WavWriter::create(path, spec)
                    .with_context(|| format!("Failed to create WAV file: {:?}", path))?;
                Some(writer)
            }
            None => None,
        };

        let queue = self.queue.clone();
        let tick_ms = 20u64;
        let per_tick = (self.config.sample_rate as u64 * tick_ms / 1000) as usize;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));
            let mut scratch = vec![0.0f32; per_tick];
            loop {
                ticker.tick().await;
                let consumed = queue.pull(&mut scratch);
                if let Some(w) = writer.as_mut() {
                    if consumed > 0 && write_samples(w, &scratch[..consumed]).is_err() {
                        warn!("Failed to write playback audio, disabling WAV output");
                        writer = None;
                    }
                }
            }
        });

        *slot = Some(task);
        Ok(())
    }

    fn enqueue(&self, samples: &[i16]) {
        self.queue.enqueue(samples);
    }

    fn flush(&self) {
        self.queue.flush();
    }

    async fn stop(&self) -> Result<()> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        self.queue.flush();
        Ok(())
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}

fn write_samples(writer: &mut WavWriter<BufWriter<File>>, samples: &[f32]) -> Result<()> {
    for &sample in samples {
        writer.write_sample((sample * 32767.0).round() as i16)?;
    }
    writer.flush()?;
    Ok(())
}
