use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::result::CommandReply;

/// Transport-level failure talking to the command executor
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("command request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("command executor unavailable: {0}")]
    Unavailable(String),
}

/// Turns recognized text into task/meeting/email actions
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, text: &str) -> Result<CommandReply, ExecutorError>;
}

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    text: &'a str,
}

/// Command executor backed by the task service's REST API
pub struct HttpCommandExecutor {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpCommandExecutor {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/voice/command", base_url.trim_end_matches('/')),
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl CommandExecutor for HttpCommandExecutor {
    async fn execute(&self, text: &str) -> Result<CommandReply, ExecutorError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&CommandRequest { text });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        debug!("Command executor replied {} ({} bytes)", status, body.len());

        Ok(CommandReply::from_response(status, &body))
    }
}
