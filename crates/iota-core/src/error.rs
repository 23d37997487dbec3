//! Common error types for the gateway

use std::fmt;

use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Step of a cascade deletion at which a failure happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeStep {
    /// Looking up the thing itself
    Lookup,
    /// Listing the children of the thing
    FindChildren,
    /// A child's back-reference does not resolve to the thing's namespace
    ResolveChild(String),
    /// Unregistering one child device
    UnregisterChild(String),
    /// Unregistering the thing itself
    UnregisterThing(String),
}

impl fmt::Display for CascadeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeStep::Lookup => write!(f, "lookup"),
            CascadeStep::FindChildren => write!(f, "find-children"),
            CascadeStep::ResolveChild(id) => write!(f, "resolve-child({})", id),
            CascadeStep::UnregisterChild(id) => write!(f, "unregister-child({})", id),
            CascadeStep::UnregisterThing(id) => write!(f, "unregister-thing({})", id),
        }
    }
}

/// Errors that can occur in the gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Entity lookup miss
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// An entity with the same key is already registered
    #[error("Duplicate entity: {0}")]
    Duplicate(String),

    /// Network failure reaching the context broker
    #[error("Transport error: {0}")]
    Transport(String),

    /// Context broker answered with a non-success status
    #[error("Broker error response {status}: {message}")]
    Response { status: u16, message: String },

    /// Network failure (or timeout) reaching a device endpoint
    #[error("Command '{command}' could not be delivered: {cause}")]
    CommandTransport { command: String, cause: String },

    /// Device endpoint answered a command with a non-200 status
    #[error("Command '{command}' failed with status {status}: {message}")]
    CommandResponse {
        status: u16,
        message: String,
        command: String,
    },

    /// Store write/delete failure in the middle of a cascade
    #[error("Cascade aborted at {step}: {message} (already removed: {removed:?})")]
    Integrity {
        step: CascadeStep,
        message: String,
        removed: Vec<String>,
    },

    /// Malformed wire payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// Command status change that would break the lifecycle
    #[error("Invalid command transition for '{command}': {from} -> {to}")]
    InvalidTransition {
        command: String,
        from: String,
        to: String,
    },

    /// Malformed or incomplete request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Store or internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Whether this is an expected lookup miss rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }

    /// Name of the command this error is attributed to, if any
    pub fn command(&self) -> Option<&str> {
        match self {
            GatewayError::CommandTransport { command, .. }
            | GatewayError::CommandResponse { command, .. }
            | GatewayError::InvalidTransition { command, .. } => Some(command),
            _ => None,
        }
    }

    /// Short message suitable for a command `_info` attribute
    pub fn command_message(&self) -> String {
        match self {
            GatewayError::CommandResponse { message, .. } => message.clone(),
            GatewayError::CommandTransport { cause, .. } => cause.clone(),
            other => other.to_string(),
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::NotFound(_) => 404,
            GatewayError::Duplicate(_) => 409,
            GatewayError::Transport(_) => 503,
            GatewayError::Response { .. } => 502,
            GatewayError::CommandTransport { .. } => 504,
            GatewayError::CommandResponse { .. } => 502,
            GatewayError::Integrity { .. } => 500,
            GatewayError::Decode(_) => 400,
            GatewayError::InvalidTransition { .. } => 409,
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::Internal(_) => 500,
        }
    }
}
