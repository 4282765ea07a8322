use serde::{Deserialize, Serialize};

/// A task as returned by the command executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Remaining fields (assignee, due date, subtasks, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A meeting as returned by the command executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Meeting {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Successful command result
///
/// Variants are tried in order, so a body carrying `task` is a `Task` result
/// even if it also has `tasks` or `meetings`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CommandResult {
    Task {
        #[serde(default)]
        message: String,
        task: Task,
    },
    Tasks {
        #[serde(default)]
        message: String,
        tasks: Vec<Task>,
    },
    Meetings {
        #[serde(default)]
        message: String,
        meetings: Vec<Meeting>,
    },
    Message {
        message: String,
    },
}

impl CommandResult {
    pub fn message(&self) -> &str {
        match self {
            CommandResult::Task { message, .. }
            | CommandResult::Tasks { message, .. }
            | CommandResult::Meetings { message, .. }
            | CommandResult::Message { message } => message,
        }
    }
}

/// Error body for 400/404 replies
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "available_users")]
    pub available_alternatives: Option<Vec<String>>,
}

/// Command executor reply, keyed by HTTP status
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    /// 200 or 201
    Success(CommandResult),
    /// 400: the command was not understood
    BadRequest { error: String },
    /// 404: the referenced entity does not exist
    NotFound {
        error: String,
        alternatives: Vec<String>,
    },
    /// Any other status, or a success body that matched no result shape
    Unexpected { status: u16, body: String },
}

impl CommandReply {
    /// Interpret a raw status and JSON body
    pub fn from_response(status: u16, body: &str) -> Self {
        match status {
            200 | 201 => match serde_json::from_str::<CommandResult>(body) {
                Ok(result) => CommandReply::Success(result),
                Err(_) => CommandReply::Unexpected {
                    status,
                    body: body.to_string(),
                },
            },
            400 => {
                let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
                CommandReply::BadRequest {
                    error: parsed
                        .error
                        .unwrap_or_else(|| "Could not process command".to_string()),
                }
            }
            404 => {
                let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
                CommandReply::NotFound {
                    error: parsed.error.unwrap_or_else(|| "Not found".to_string()),
                    alternatives: parsed.available_alternatives.unwrap_or_default(),
                }
            }
            _ => CommandReply::Unexpected {
                status,
                body: body.to_string(),
            },
        }
    }
}
