use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionStatus;
use crate::commands::{CommandResult, DispatchOutcome};

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    pub status: SessionStatus,

    /// Whether microphone audio is being captured
    pub is_recording: bool,

    /// When the current (or last) session started
    pub started_at: Option<DateTime<Utc>>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Audio frames transmitted
    pub frames_sent: u64,

    /// Frames dropped because the pending buffer hit its cap
    pub frames_dropped: u64,

    /// Frames put back after a failed send
    pub frames_requeued: u64,

    /// Bytes waiting for transmission
    pub pending_bytes: usize,

    /// Transcripts that reached the command executor
    pub commands_dispatched: u64,

    /// Successful transport reconnects
    pub reconnects: u64,
}

/// Notifications delivered to the session's owner
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionStatus),

    /// The user started speaking
    Listening,

    /// User speech: partial deltas accumulate, the final event carries the full utterance
    Transcript { text: String, is_final: bool },

    /// Assistant response text; deltas are fragments, non-deltas are standalone messages
    Response { text: String, is_delta: bool },

    /// The assistant finished a response; carries the accumulated text
    ResponseDone(String),

    /// The command executor returned a result
    CommandExecuted(CommandResult),

    /// A finalized transcript went through the command dispatcher
    Dispatched(DispatchOutcome),

    /// Setup or fatal connection error
    Error(String),
}
