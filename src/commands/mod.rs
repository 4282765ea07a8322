//! Command round trip
//!
//! Finalized transcripts are screened (language admission, trivial
//! utterances), forwarded to the external command executor, and the reply is
//! mapped to a session action: stay quiet, feed a message back to the
//! assistant, or speak a not-found clarification.

pub mod dispatcher;
pub mod executor;
pub mod filter;
pub mod result;

pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use executor::{CommandExecutor, ExecutorError, HttpCommandExecutor};
pub use filter::{admit, is_trivial, Rejection};
pub use result::{CommandReply, CommandResult, ErrorBody, Meeting, Task};
