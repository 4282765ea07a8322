use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::executor::CommandExecutor;
use super::filter::{self, Rejection};
use super::result::{CommandReply, CommandResult};

/// What the session should do with a dispatched transcript
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Filtered out before reaching the executor
    Skipped(Rejection),
    /// Task/tasks/meetings result; the live spoken response already covers it
    Executed(CommandResult),
    /// Message-only result to feed back to the assistant
    Feedback(String),
    /// Entity not found; spoken clarification for the user
    NotFound(String),
    /// Command not understood (400); logged only
    NotUnderstood(String),
    /// Transport failure or unexpected reply; logged only
    Failed(String),
}

impl DispatchOutcome {
    /// Whether the executor was invoked
    pub fn reached_executor(&self) -> bool {
        !matches!(self, DispatchOutcome::Skipped(_))
    }
}

/// Forwards admitted transcripts to the command executor
pub struct CommandDispatcher {
    executor: Arc<dyn CommandExecutor>,
    dispatched: AtomicU64,
}

impl CommandDispatcher {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            dispatched: AtomicU64::new(0),
        }
    }

    /// Apply both filters; returns the trimmed text to send
    pub fn screen<'a>(&self, transcript: &'a str) -> Result<&'a str, Rejection> {
        filter::admit(transcript)?;

        if filter::is_trivial(transcript) {
            return Err(Rejection::Trivial);
        }

        let text = transcript.trim();
        if text.is_empty() {
            return Err(Rejection::Empty);
        }

        Ok(text)
    }

    /// Send one finalized transcript to the executor and interpret the reply
    ///
    /// Executor failures are logged and reported as `Failed`; they never
    /// surface as conversational errors.
    pub async fn dispatch(&self, transcript: &str) -> DispatchOutcome {
        let text = match self.screen(transcript) {
            Ok(text) => text,
            Err(rejection) => {
                debug!("Skipping transcript ({:?}): {}", rejection, transcript);
                return DispatchOutcome::Skipped(rejection);
            }
        };

        self.dispatched.fetch_add(1, Ordering::SeqCst);
        info!("Executing command: {}", text);

        match self.executor.execute(text).await {
            Ok(reply) => Self::interpret(reply),
            Err(e) => {
                error!("Command execution error: {}", e);
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    /// Map an executor reply to a session action
    pub fn interpret(reply: CommandReply) -> DispatchOutcome {
        match reply {
            CommandReply::Success(result) => {
                match &result {
                    CommandResult::Task { task, .. } => match task.id {
                        Some(id) => info!("Task executed successfully: {}", id),
                        None => warn!("Task object missing ID: {:?}", task),
                    },
                    CommandResult::Tasks { tasks, .. } => {
                        info!("Tasks retrieved: {}", tasks.len());
                    }
                    CommandResult::Meetings { meetings, .. } => {
                        info!("Meetings retrieved: {}", meetings.len());
                    }
                    CommandResult::Message { message } => {
                        info!("Backend message: {}", message);
                        return DispatchOutcome::Feedback(message.clone());
                    }
                }
                DispatchOutcome::Executed(result)
            }
            CommandReply::BadRequest { error } => {
                warn!("Command validation error: {}", error);
                DispatchOutcome::NotUnderstood(error)
            }
            CommandReply::NotFound {
                error,
                alternatives,
            } => {
                warn!("Not found: {} (alternatives: {:?})", error, alternatives);
                let spoken = if alternatives.is_empty() {
                    format!("Not found. {}", error)
                } else {
                    format!("Not found. Available alternatives: {}", alternatives.join(", "))
                };
                DispatchOutcome::NotFound(spoken)
            }
            CommandReply::Unexpected { status, body } => {
                error!("Command failed with status {}: {}", status, body);
                DispatchOutcome::Failed(format!("unexpected status {}", status))
            }
        }
    }

    /// Number of transcripts that reached the executor
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }
}
