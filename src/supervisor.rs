//! Connection supervision
//!
//! Errors from the realtime endpoint arrive as free text. They are classified
//! against two vocabularies: a fatal match tears the session down, anything
//! else (including unmatched text) only degrades the connection while capture
//! keeps running.

use std::time::Duration;

/// Terms that mark a transient failure
pub const RECOVERABLE_TERMS: &[&str] = &["network", "timeout", "temporary", "closed"];

/// Terms that force teardown (matched after normalising `_` and `-` to `.`)
pub const FATAL_TERMS: &[&str] = &["session.error", "connection.error", "authentication"];

/// Classified connection failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("recoverable connection error: {message}")]
    Recoverable {
        message: String,
        /// Matched recoverable term, `None` when the text matched neither vocabulary
        matched: Option<&'static str>,
    },

    #[error("fatal connection error: {message}")]
    Fatal {
        message: String,
        matched: &'static str,
    },
}

impl ConnectionError {
    /// Classify error text; fatal terms take priority
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        let normalized = lowered.replace(['_', '-'], ".");

        if let Some(term) = FATAL_TERMS.iter().find(|t| normalized.contains(*t)).copied() {
            return ConnectionError::Fatal {
                message,
                matched: term,
            };
        }

        let matched = RECOVERABLE_TERMS
            .iter()
            .find(|t| lowered.contains(*t))
            .copied();

        ConnectionError::Recoverable { message, matched }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectionError::Fatal { .. })
    }

    /// Whether audio capture must stop because of this error
    pub fn stops_capture(&self) -> bool {
        self.is_fatal()
    }

    pub fn message(&self) -> &str {
        match self {
            ConnectionError::Recoverable { message, .. } | ConnectionError::Fatal { message, .. } => {
                message
            }
        }
    }
}

/// Exponential reconnect backoff
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(800),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), or `None` once exhausted
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let exp = (attempt - 1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        Some(delay.min(self.max_delay))
    }
}
