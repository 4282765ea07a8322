// cpal microphone source and speaker sink
//
// cpal streams are not Send on every platform, so each stream is built and
// owned by a dedicated thread that parks until told to stop. Device callbacks
// never block: capture uses try_send and playback pulls from the shared queue.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig, SupportedStreamConfigRange};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackendConfig, AudioSink, AudioSource, SampleBuffer};
use super::playback::PlaybackQueue;

fn supports_rate(range: &SupportedStreamConfigRange, rate: u32) -> bool {
    range.min_sample_rate() <= SampleRate(rate) && range.max_sample_rate() >= SampleRate(rate)
}

/// Pick a config at `rate`, preferring mono
fn pick_config(
    mut ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    rate: u32,
) -> Option<StreamConfig> {
    let candidates: Vec<_> = ranges.by_ref().filter(|c| supports_rate(c, rate)).collect();
    candidates
        .iter()
        .find(|c| c.channels() == 1)
        .or_else(|| candidates.first())
        .map(|c| c.clone().with_sample_rate(SampleRate(rate)).config())
}

/// Owns a stream thread and its stop signal
struct StreamThread {
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            error!("Audio stream thread panicked");
        }
    }
}

/// Spawn a thread that builds a stream with `build`, plays it and parks until stopped
fn spawn_stream_thread<F>(name: &str, build: F) -> Result<StreamThread>
where
    F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
{
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();

    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build().and_then(|s| {
                s.play().context("Failed to start audio stream")?;
                Ok(s)
            }) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Returns on stop signal or when the owner is dropped
            let _ = stop_rx.recv();
            drop(stream);
        })
        .context("Failed to spawn audio thread")?;

    ready_rx
        .recv()
        .map_err(|_| anyhow!("Audio thread exited before starting"))??;

    Ok(StreamThread { stop_tx, handle })
}

/// Microphone capture through the default input device
pub struct MicrophoneSource {
    config: AudioBackendConfig,
    thread: Option<StreamThread>,
}

impl MicrophoneSource {
    pub fn new(config: AudioBackendConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;

        info!(
            "Microphone initialized: {} ({}Hz)",
            device.name().unwrap_or_default(),
            config.sample_rate
        );

        Ok(Self {
            config,
            thread: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioSource for MicrophoneSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<SampleBuffer>> {
        if self.thread.is_some() {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(64);
        let rate = self.config.sample_rate;

        let thread = spawn_stream_thread("taskvoice-capture", move || {
            let device = cpal::default_host()
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available"))?;
            let ranges = device
                .supported_input_configs()
                .context("Failed to query input configs")?;
            let stream_config = pick_config(ranges, rate)
                .ok_or_else(|| anyhow!("No input config supports {}Hz", rate))?;
            let channels = stream_config.channels as usize;
            let captured = Arc::new(AtomicU64::new(0));

            debug!("Input stream config: {}Hz, {} channels", rate, channels);

            let stream = device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let samples: Vec<f32> =
                            data.iter().step_by(channels.max(1)).copied().collect();
                        let offset = captured.fetch_add(samples.len() as u64, Ordering::Relaxed);
                        let buffer = SampleBuffer {
                            samples,
                            sample_rate: rate,
                            timestamp_ms: offset * 1000 / rate as u64,
                        };
                        // Full channel means the consumer stalled; never block the device
                        let _ = tx.try_send(buffer);
                    },
                    |err| {
                        error!("Audio capture error: {}", err);
                    },
                    None,
                )
                .context("Failed to build input stream")?;
            Ok(stream)
        })
        .context("Failed to start microphone")?;

        self.thread = Some(thread);
        info!("Microphone capture started");

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.shutdown())
                .await
                .context("Capture shutdown task panicked")?;
            info!("Microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

/// Speaker output through the default output device
pub struct SpeakerSink {
    config: AudioBackendConfig,
    queue: PlaybackQueue,
    thread: Mutex<Option<StreamThread>>,
}

impl SpeakerSink {
    pub fn new(config: AudioBackendConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available"))?;

        info!(
            "Speaker initialized: {} ({}Hz)",
            device.name().unwrap_or_default(),
            config.sample_rate
        );

        Ok(Self {
            config,
            queue: PlaybackQueue::new(),
            thread: Mutex::new(None),
        })
    }

    fn running(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[async_trait::async_trait]
impl AudioSink for SpeakerSink {
    async fn start(&self) -> Result<()> {
        if self.running() {
            return Ok(());
        }

        let queue = self.queue.clone();
        let rate = self.config.sample_rate;

        let thread = spawn_stream_thread("taskvoice-playback", move || {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| anyhow!("No output device available"))?;
            let ranges = device
                .supported_output_configs()
                .context("Failed to query output configs")?;
            let stream_config = pick_config(ranges, rate)
                .ok_or_else(|| anyhow!("No output config supports {}Hz", rate))?;
            let channels = (stream_config.channels as usize).max(1);
            let mut mono = Vec::new();

            let stream = device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let frames = data.len() / channels;
                        mono.resize(frames, 0.0);
                        queue.pull(&mut mono);
                        for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                            frame.fill(sample);
                        }
                    },
                    |err| {
                        error!("Audio playback error: {}", err);
                    },
                    None,
                )
                .context("Failed to build output stream")?;
            Ok(stream)
        })
        .context("Failed to start speaker")?;

        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread);
        Ok(())
    }

    fn enqueue(&self, samples: &[i16]) {
        self.queue.enqueue(samples);
    }

    fn flush(&self) {
        self.queue.flush();
    }

    async fn stop(&self) -> Result<()> {
        self.queue.flush();
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if tokio::task::spawn_blocking(move || thread.shutdown())
                .await
                .is_err()
            {
                warn!("Playback shutdown task panicked");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }
}
