//! Session protocol messages
//!
//! JSON text frames exchanged with thing clients over a session. Requests
//! carry an optional client-chosen `request_id` that the matching response
//! echoes, since requests may complete out of order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{CommandInvocation, Entity};

/// Sensor identifier as sent by clients (numeric or textual)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorId {
    Number(u64),
    Text(String),
}

impl SensorId {
    /// Numeric form used in listings: the id itself when numeric, otherwise
    /// the trailing run of digits (`"s1"` → `1`).
    pub fn from_device_id(id: &str) -> Self {
        if let Ok(n) = id.parse() {
            return SensorId::Number(n);
        }
        let digits: String = {
            let tail: Vec<char> = id.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
            tail.into_iter().rev().collect()
        };
        match digits.parse() {
            Ok(n) => SensorId::Number(n),
            Err(_) => SensorId::Text(id.to_string()),
        }
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorId::Number(n) => write!(f, "{}", n),
            SensorId::Text(s) => f.write_str(s),
        }
    }
}

/// One sensor of an `update_schema` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSpec {
    #[serde(alias = "sensorId")]
    pub sensor_id: SensorId,
    #[serde(alias = "valueType")]
    pub value_type: i64,
    pub unit: i64,
    #[serde(alias = "typeId")]
    pub type_id: i64,
    pub name: String,
}

/// One reading of a `publish_data` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorValue {
    #[serde(alias = "sensorId")]
    pub sensor_id: SensorId,
    pub value: Value,
}

/// Requests a session may issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionRequest {
    AddThing {
        id: String,
        name: String,
    },
    UpdateSchema {
        #[serde(alias = "parentId")]
        id: String,
        schema: Vec<SchemaSpec>,
    },
    RemoveThing {
        id: String,
    },
    PublishData {
        #[serde(alias = "parentId")]
        id: String,
        #[serde(default)]
        data: Vec<SensorValue>,
    },
    UpdateProperties {
        id: String,
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },
    ListThings,
    /// Free-form text, echoed back
    Message {
        text: String,
    },
}

impl SessionRequest {
    pub fn name(&self) -> &'static str {
        match self {
            SessionRequest::AddThing { .. } => "add_thing",
            SessionRequest::UpdateSchema { .. } => "update_schema",
            SessionRequest::RemoveThing { .. } => "remove_thing",
            SessionRequest::PublishData { .. } => "publish_data",
            SessionRequest::UpdateProperties { .. } => "update_properties",
            SessionRequest::ListThings => "list_things",
            SessionRequest::Message { .. } => "message",
        }
    }
}

/// Inbound frame: request plus correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub request: SessionRequest,
}

/// Schema entry of a thing listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaItem {
    pub sensor_id: SensorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Entry of a `list_things` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingListing {
    pub id: String,
    pub name: String,
    pub schema: Vec<SchemaItem>,
}

/// Outcome of one request
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Fail(String),
    Things(Vec<ThingListing>),
    Echo(String),
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Reply::Fail(_))
    }
}

/// Device summary carried by events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDevice {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thing: Option<String>,
    pub service: String,
    pub subservice: String,
}

impl From<&Entity> for EventDevice {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id.clone(),
            thing: entity.parent_id().map(str::to_string),
            service: entity.service.clone(),
            subservice: entity.subservice.clone(),
        }
    }
}

/// Out-of-band notifications pushed to every session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    CommandReceived {
        device: EventDevice,
        commands: Vec<CommandInvocation>,
    },
}

/// Outbound frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when the session opens
    Connected { session_id: String },

    /// Reply to a request
    Response {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Broadcast notification
    Event(SessionEvent),

    /// Frame could not be understood
    Error { message: String },
}

impl ServerMessage {
    pub fn connected(session_id: impl Into<String>) -> Self {
        ServerMessage::Connected {
            session_id: session_id.into(),
        }
    }

    pub fn response(request_id: Option<String>, reply: Reply) -> Self {
        let (result, error) = match reply {
            Reply::Ok => (Value::from("ok"), None),
            Reply::Fail(msg) => (Value::from("fail"), Some(msg)),
            Reply::Things(things) => (
                serde_json::to_value(things).unwrap_or_else(|_| Value::Array(Vec::new())),
                None,
            ),
            Reply::Echo(text) => (Value::from(format!("RECEIVED \"{}\"", text)), None),
        };
        ServerMessage::Response {
            request_id,
            result,
            error,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
