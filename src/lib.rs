pub mod audio;
pub mod commands;
pub mod config;
pub mod realtime;
pub mod session;
pub mod supervisor;

pub use audio::{
    AudioBackendConfig, AudioDevices, AudioFrame, AudioInput, AudioSink, AudioSource,
    ChunkConfig, DefaultDevices, FrameChunker, PlaybackQueue, SampleBuffer,
};
pub use commands::{
    CommandDispatcher, CommandExecutor, CommandReply, CommandResult, DispatchOutcome,
    HttpCommandExecutor,
};
pub use config::Config;
pub use realtime::{
    ClientEvent, Credentials, Endpoint, RealtimeTransport, ServerEvent, TransportConnector,
    WebSocketConnector,
};
pub use session::{SessionConfig, SessionEvent, SessionStats, SessionStatus, VoiceSession};
pub use supervisor::{ConnectionError, ReconnectPolicy};
