//! Entity (thing and device) models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attribute::{Attribute, AttributeValue};
use super::command::Command;
use crate::error::{GatewayError, GatewayResult};

/// Name of the static attribute a device uses to point at its thing
pub const PARENT_ATTRIBUTE: &str = "thing";

/// Kind of a registered entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityKind {
    /// Parent aggregate representing a composite device
    Thing,
    /// Single sensor/actuator owned by a thing
    Device,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Thing => "THING",
            EntityKind::Device => "DEVICE",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store key of an entity document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub id: String,
    pub service: String,
    pub subservice: String,
}

impl EntityKey {
    pub fn new(id: impl Into<String>, service: impl Into<String>, subservice: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            subservice: subservice.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}#{}", self.service, self.subservice, self.id)
    }
}

/// A registered thing or device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub service: String,
    pub subservice: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub transport: Option<String>,
    /// Device endpoint for push-mode commands
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Commands are polled instead of pushed (no endpoint)
    #[serde(default)]
    pub polling: bool,
    #[serde(default)]
    pub active_attributes: Vec<Attribute>,
    #[serde(default)]
    pub static_attributes: Vec<Attribute>,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub api_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(
        id: impl Into<String>,
        kind: EntityKind,
        service: impl Into<String>,
        subservice: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            service: service.into(),
            subservice: subservice.into(),
            protocol: None,
            transport: None,
            endpoint: None,
            polling: true,
            active_attributes: Vec::new(),
            static_attributes: Vec::new(),
            commands: Vec::new(),
            api_key: None,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.id, &self.service, &self.subservice)
    }

    pub fn is_thing(&self) -> bool {
        self.kind == EntityKind::Thing
    }

    pub fn static_attribute(&self, name: &str) -> Option<&Attribute> {
        self.static_attributes.iter().find(|a| a.name == name)
    }

    /// Id of the owning thing, read from the back-reference attribute
    pub fn parent_id(&self) -> Option<&str> {
        match self.static_attribute(PARENT_ATTRIBUTE)?.value.as_ref()? {
            AttributeValue::Text(id) => Some(id.as_str()),
            _ => None,
        }
    }

    /// Display name (`name` static attribute), empty when unset
    pub fn display_name(&self) -> String {
        self.static_attribute("name")
            .and_then(|a| a.value_string())
            .unwrap_or_default()
    }

    /// Insert a static attribute, replacing one with the same name
    pub fn merge_static_attribute(&mut self, attr: Attribute) {
        match self.static_attributes.iter_mut().find(|a| a.name == attr.name) {
            Some(existing) => *existing = attr,
            None => self.static_attributes.push(attr),
        }
    }

    pub fn command_mut(&mut self, name: &str) -> Option<&mut Command> {
        self.commands.iter_mut().find(|c| c.name == name)
    }

    /// Check identity fields, attribute types and the device back-reference
    pub fn validate(&self) -> GatewayResult<()> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("entity id is empty".to_string()));
        }
        if self.service.is_empty() || !self.subservice.starts_with('/') {
            return Err(GatewayError::InvalidRequest(format!(
                "invalid tenant scope for '{}': service='{}' subservice='{}'",
                self.id, self.service, self.subservice
            )));
        }
        for attr in self.active_attributes.iter().chain(&self.static_attributes) {
            attr.validate()?;
        }
        if self.kind == EntityKind::Device && self.parent_id().is_none() {
            return Err(GatewayError::InvalidRequest(format!(
                "device '{}' has no '{}' back-reference",
                self.id, PARENT_ATTRIBUTE
            )));
        }
        Ok(())
    }
}
