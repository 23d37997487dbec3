//! Encoding command requests
//!
//! A command travels as `device@command|value` when its value is a scalar,
//! or `device@command|k1=v1|k2=v2` when it is an object of parameters.

use serde_json::Value;

use crate::error::{CodecError, CodecResult};
use crate::{FIELD_SEPARATOR, PARAM_SEPARATOR, TARGET_SEPARATOR};

/// Encode a command for a device endpoint
pub fn encode_command(device_id: &str, command: &str, value: &Value) -> CodecResult<String> {
    if device_id.is_empty() {
        return Err(CodecError::Empty("device id"));
    }
    if command.is_empty() {
        return Err(CodecError::Empty("command"));
    }

    let mut out = format!("{}{}{}", device_id, TARGET_SEPARATOR, command);

    match value {
        Value::Object(params) => {
            for (key, param) in params {
                out.push(FIELD_SEPARATOR);
                out.push_str(key);
                out.push(PARAM_SEPARATOR);
                out.push_str(&scalar(command, param)?);
            }
        }
        other => {
            out.push(FIELD_SEPARATOR);
            out.push_str(&scalar(command, other)?);
        }
    }

    Ok(out)
}

fn scalar(command: &str, value: &Value) -> CodecResult<String> {
    let text = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => {
            return Err(CodecError::Unsupported {
                command: command.to_string(),
                reason: "nested values are not representable".to_string(),
            })
        }
    };

    if text.contains(FIELD_SEPARATOR) {
        return Err(CodecError::Unsupported {
            command: command.to_string(),
            reason: format!("value contains '{}'", FIELD_SEPARATOR),
        });
    }
    Ok(text)
}
