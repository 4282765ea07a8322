use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Session lifecycle: `Idle → Connecting → Open ⇄ Degraded → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionStatus {
    Idle = 0,
    Connecting = 1,
    Open = 2,
    Degraded = 3,
    Closed = 4,
}

impl SessionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionStatus::Idle,
            1 => SessionStatus::Connecting,
            2 => SessionStatus::Open,
            3 => SessionStatus::Degraded,
            _ => SessionStatus::Closed,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Open => "open",
            SessionStatus::Degraded => "degraded",
            SessionStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State shared between the capture task and the message loop
///
/// The connection-open flag is `status == Open`. The message loop restores
/// Open; either side may degrade it. Only teardown closes it.
pub struct SessionState {
    status: AtomicU8,
    recording: AtomicBool,
    stopping: AtomicBool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(SessionStatus::Idle as u8),
            recording: AtomicBool::new(false),
            // Nothing to stop until a session starts
            stopping: AtomicBool::new(true),
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn is_connection_open(&self) -> bool {
        self.status() == SessionStatus::Open
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn set_recording(&self, active: bool) {
        self.recording.store(active, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Arm state for a new session run
    pub fn begin_start(&self) {
        self.status
            .store(SessionStatus::Connecting as u8, Ordering::SeqCst);
        self.recording.store(false, Ordering::SeqCst);
        self.stopping.store(false, Ordering::SeqCst);
    }

    /// Raise the stop flag; returns false if it was already raised
    pub fn begin_stop(&self) -> bool {
        !self.stopping.swap(true, Ordering::SeqCst)
    }

    /// Move `from` → `to` if the status is one of `from`
    fn transition(&self, from: &[SessionStatus], to: SessionStatus) -> bool {
        let mut current = self.status.load(Ordering::SeqCst);
        loop {
            if !from.contains(&SessionStatus::from_u8(current)) {
                return false;
            }
            match self.status.compare_exchange(
                current,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Connecting/Degraded → Open; returns true on change
    pub fn restore_open(&self) -> bool {
        self.transition(
            &[SessionStatus::Connecting, SessionStatus::Degraded],
            SessionStatus::Open,
        )
    }

    /// Open/Connecting → Degraded; returns true on change
    pub fn degrade(&self) -> bool {
        self.transition(
            &[SessionStatus::Open, SessionStatus::Connecting],
            SessionStatus::Degraded,
        )
    }

    pub fn close(&self) {
        self.status
            .store(SessionStatus::Closed as u8, Ordering::SeqCst);
        self.recording.store(false, Ordering::SeqCst);
    }
}
