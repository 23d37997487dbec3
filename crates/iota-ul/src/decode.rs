//! Decoding command results
//!
//! Devices answer a command with `device@command|result`.

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};
use crate::{FIELD_SEPARATOR, TARGET_SEPARATOR};

/// Decoded command answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub device_id: String,
    pub command: String,
    pub result: String,
}

/// Decode a device's command answer
pub fn decode_result(body: &str) -> CodecResult<CommandResult> {
    let body = body.trim();

    let (device_id, rest) = body
        .split_once(TARGET_SEPARATOR)
        .ok_or_else(|| CodecError::Malformed(format!("missing '{}' in '{}'", TARGET_SEPARATOR, body)))?;
    let (command, result) = rest
        .split_once(FIELD_SEPARATOR)
        .ok_or_else(|| CodecError::Malformed(format!("missing '{}' in '{}'", FIELD_SEPARATOR, body)))?;

    if device_id.is_empty() {
        return Err(CodecError::Empty("device id"));
    }
    if command.is_empty() {
        return Err(CodecError::Empty("command"));
    }

    Ok(CommandResult {
        device_id: device_id.to_string(),
        command: command.to_string(),
        result: result.to_string(),
    })
}
