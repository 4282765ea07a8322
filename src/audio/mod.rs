pub mod backend;
pub mod chunk;
pub mod convert;
pub mod file;
pub mod playback;

#[cfg(feature = "cpal-audio")]
pub mod device;

pub use backend::{
    AudioBackendConfig, AudioDevices, AudioInput, AudioSink, AudioSource, DefaultDevices,
    SampleBuffer,
};
pub use chunk::{AudioFrame, ChunkConfig, FrameChunker};
pub use file::{WavFileSink, WavFileSource};
pub use playback::PlaybackQueue;
