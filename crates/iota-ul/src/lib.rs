//! iota-ul - UltraLight 2.0 command codec
//!
//! The subset of the UltraLight grammar used on the command path:
//!
//! ```rust
//! use iota_ul::{decode_result, encode_command};
//! use serde_json::json;
//!
//! let payload = encode_command("1", "command", &json!("on")).unwrap();
//! assert_eq!(payload, "1@command|on");
//!
//! let answer = decode_result("1@command|ok").unwrap();
//! assert_eq!(answer.result, "ok");
//! ```

pub mod decode;
pub mod encode;
pub mod error;

pub use decode::{decode_result, CommandResult};
pub use encode::encode_command;
pub use error::{CodecError, CodecResult};

/// Separates the device id from the command name
pub const TARGET_SEPARATOR: char = '@';
/// Separates fields
pub const FIELD_SEPARATOR: char = '|';
/// Separates a parameter name from its value
pub const PARAM_SEPARATOR: char = '=';
