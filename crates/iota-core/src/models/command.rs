//! Command descriptors and their lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};

/// Status of the last dispatch of a command.
///
/// ```text
/// (dispatch) ──▶ PENDING ──▶ COMPLETED
///                   │
///                   └──────▶ ERROR
/// ```
///
/// A new dispatch starts a fresh lifecycle at `PENDING`. Completing or
/// failing a command that is not pending is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    Completed,
    Error,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Completed => "COMPLETED",
            CommandStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Pending)
    }
}

/// A command an entity accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub status: Option<CommandStatus>,
    /// Result (or error message) of the last dispatch
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Command {
    pub fn new(name: impl Into<String>, command_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command_type: command_type.into(),
            status: None,
            result: None,
            updated_at: None,
        }
    }

    /// Start a new dispatch
    pub fn begin(&mut self) {
        self.status = Some(CommandStatus::Pending);
        self.result = None;
        self.updated_at = Some(Utc::now());
    }

    /// Move a pending command to a terminal status
    pub fn finish(&mut self, status: CommandStatus, result: impl Into<String>) -> GatewayResult<()> {
        if !status.is_terminal() || self.status != Some(CommandStatus::Pending) {
            return Err(GatewayError::InvalidTransition {
                command: self.name.clone(),
                from: self
                    .status
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| "none".to_string()),
                to: status.as_str().to_string(),
            });
        }

        self.status = Some(status);
        self.result = Some(result.into());
        self.updated_at = Some(Utc::now());
        Ok(())
    }
}

/// One requested command: name plus the value the broker sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl CommandInvocation {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
