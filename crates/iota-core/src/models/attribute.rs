//! Typed attribute descriptors

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};

/// Declared type tag of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    String,
    Integer,
    Float,
    Boolean,
    /// Command attribute (value is whatever the broker sent)
    #[serde(rename = "command")]
    Command,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "String",
            AttributeType::Integer => "Integer",
            AttributeType::Float => "Float",
            AttributeType::Boolean => "Boolean",
            AttributeType::Command => "command",
        }
    }

    /// Map a broker-side type name onto a tag; unknown names are text
    pub fn from_broker_type(name: &str) -> Self {
        match name {
            "Integer" => AttributeType::Integer,
            "Float" | "Number" => AttributeType::Float,
            "Boolean" => AttributeType::Boolean,
            "command" | "commandResult" => AttributeType::Command,
            _ => AttributeType::String,
        }
    }
}

/// Attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Boolean(b) => write!(f, "{}", b),
            AttributeValue::Integer(i) => write!(f, "{}", i),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Text(s) => f.write_str(s),
        }
    }
}

impl AttributeValue {
    /// Plain JSON form, as sent to the broker or a session
    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::Boolean(b) => Value::Bool(*b),
            AttributeValue::Integer(i) => Value::from(*i),
            AttributeValue::Float(v) => Value::from(*v),
            AttributeValue::Text(s) => Value::String(s.clone()),
        }
    }
}

/// An observable, static or command attribute of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    #[serde(default)]
    pub value: Option<AttributeValue>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, attr_type: AttributeType, value: Option<AttributeValue>) -> Self {
        Self {
            name: name.into(),
            attr_type,
            value,
        }
    }

    /// Attribute declared with a type but no current value
    pub fn empty(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self::new(name, attr_type, None)
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            name,
            AttributeType::String,
            Some(AttributeValue::Text(value.into())),
        )
    }

    pub fn integer(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, AttributeType::Integer, Some(AttributeValue::Integer(value)))
    }

    /// Build an attribute from a loosely typed JSON value, converting it to
    /// the declared type.
    ///
    /// `null` yields an attribute without value. Strings are parsed for the
    /// numeric and boolean types; any scalar is accepted for `String`.
    pub fn typed(name: impl Into<String>, attr_type: AttributeType, raw: &Value) -> GatewayResult<Self> {
        let name = name.into();
        let value = convert(&name, attr_type, raw)?;
        Ok(Self::new(name, attr_type, value))
    }

    /// Check that the current value matches the declared type
    pub fn validate(&self) -> GatewayResult<()> {
        let ok = match (&self.attr_type, &self.value) {
            (_, None) => true,
            (AttributeType::Command, Some(_)) => true,
            (AttributeType::String, Some(AttributeValue::Text(_))) => true,
            (AttributeType::Integer, Some(AttributeValue::Integer(_))) => true,
            (AttributeType::Float, Some(AttributeValue::Float(_) | AttributeValue::Integer(_))) => {
                true
            }
            (AttributeType::Boolean, Some(AttributeValue::Boolean(_))) => true,
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(GatewayError::InvalidRequest(format!(
                "attribute '{}' declared {} but holds {:?}",
                self.name,
                self.attr_type.as_str(),
                self.value
            )))
        }
    }

    /// Current value rendered as text
    pub fn value_string(&self) -> Option<String> {
        self.value.as_ref().map(|v| v.to_string())
    }
}

fn convert(name: &str, attr_type: AttributeType, raw: &Value) -> GatewayResult<Option<AttributeValue>> {
    let mismatch = || {
        GatewayError::InvalidRequest(format!(
            "attribute '{}': cannot convert {} to {}",
            name,
            raw,
            attr_type.as_str()
        ))
    };

    let value = match (attr_type, raw) {
        (_, Value::Null) => return Ok(None),
        (AttributeType::String | AttributeType::Command, Value::String(s)) => {
            AttributeValue::Text(s.clone())
        }
        (AttributeType::String | AttributeType::Command, Value::Number(_) | Value::Bool(_)) => {
            AttributeValue::Text(raw.to_string())
        }
        (AttributeType::Command, other) => AttributeValue::Text(other.to_string()),
        (AttributeType::Integer, Value::Number(n)) => {
            AttributeValue::Integer(n.as_i64().ok_or_else(mismatch)?)
        }
        (AttributeType::Integer, Value::String(s)) => {
            AttributeValue::Integer(s.trim().parse().map_err(|_| mismatch())?)
        }
        (AttributeType::Float, Value::Number(n)) => {
            AttributeValue::Float(n.as_f64().ok_or_else(mismatch)?)
        }
        (AttributeType::Float, Value::String(s)) => {
            AttributeValue::Float(s.trim().parse().map_err(|_| mismatch())?)
        }
        (AttributeType::Boolean, Value::Bool(b)) => AttributeValue::Boolean(*b),
        (AttributeType::Boolean, Value::String(s)) => match s.trim() {
            "true" => AttributeValue::Boolean(true),
            "false" => AttributeValue::Boolean(false),
            _ => return Err(mismatch()),
        },
        _ => return Err(mismatch()),
    };

    Ok(Some(value))
}
