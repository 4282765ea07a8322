//! Voice session management
//!
//! This module provides the `VoiceSession` controller that manages:
//! - Microphone capture, PCM16 framing and paced transmission
//! - Playback of the assistant's streamed audio
//! - Inbound message handling and response accumulation
//! - Connection supervision (degrade, reconnect, fatal teardown)
//! - Routing finalized transcripts to the command executor

mod config;
mod session;
mod state;
mod stats;
mod transmit;

pub use config::{SessionConfig, DEFAULT_INSTRUCTIONS};
pub use session::VoiceSession;
pub use state::{SessionState, SessionStatus};
pub use stats::{SessionEvent, SessionStats};
pub use transmit::FrameTransmitter;
