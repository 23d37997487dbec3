//! Error types for the UltraLight codec

use thiserror::Error;

/// Errors that can occur while encoding or decoding UL payloads
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Payload does not follow `device@command|result`
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Value cannot be carried by the grammar
    #[error("unsupported value for '{command}': {reason}")]
    Unsupported { command: String, reason: String },

    /// Empty device id or command name
    #[error("empty {0}")]
    Empty(&'static str),
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;
