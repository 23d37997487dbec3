//! Gateway configuration
//!
//! Deserialized from the `[gateway]` table of the daemon's TOML file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default tenant service
pub const DEFAULT_SERVICE: &str = "knot";
/// Default service group resource
pub const DEFAULT_RESOURCE: &str = "/iot/d";
/// Service group subservice matching every path
pub const ANY_SUBSERVICE: &str = "/*";

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Tenant service every thing is registered under
    #[serde(default = "default_service")]
    pub service: String,
    /// API key used when no service group matches
    #[serde(default)]
    pub default_key: Option<String>,
    /// Endpoint assigned to new entities (push-mode commands); poll mode when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Timeout of one outbound command, in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Context broker host
    #[serde(default = "default_broker_host")]
    pub broker_host: String,
    /// Context broker port
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    /// Provisioned service groups
    #[serde(default)]
    pub service_groups: Vec<ServiceGroup>,
}

fn default_service() -> String {
    DEFAULT_SERVICE.to_string()
}

fn default_command_timeout() -> u64 {
    10
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1026
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            default_key: None,
            endpoint: None,
            command_timeout_secs: default_command_timeout(),
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            service_groups: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// `host:port` of the context broker
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }

    pub fn broker_url(&self) -> String {
        format!("http://{}", self.broker_address())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// API key for a tenant: the matching service group's key, else the default key
    pub fn effective_api_key(&self, service: &str, subservice: &str) -> Option<String> {
        let exact = self
            .service_groups
            .iter()
            .find(|g| g.service == service && g.subservice == subservice);
        let wildcard = || {
            self.service_groups
                .iter()
                .find(|g| g.service == service && g.subservice == ANY_SUBSERVICE)
        };

        exact
            .or_else(wildcard)
            .map(|g| g.apikey.clone())
            .or_else(|| self.default_key.clone())
    }

    /// Add the default service group if none exists for the service.
    ///
    /// Returns `true` when a group was added. Without a default key there is
    /// nothing to provision.
    pub fn ensure_default_group(&mut self) -> bool {
        let Some(apikey) = self.default_key.clone() else {
            return false;
        };
        if self.service_groups.iter().any(|g| g.service == self.service) {
            return false;
        }

        self.service_groups.push(ServiceGroup {
            apikey,
            cbroker: Some(self.broker_url()),
            entity_type: "DEVICE".to_string(),
            resource: DEFAULT_RESOURCE.to_string(),
            service: self.service.clone(),
            subservice: ANY_SUBSERVICE.to_string(),
        });
        true
    }
}

/// API key binding for a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub apikey: String,
    /// Broker URL for this group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cbroker: Option<String>,
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default = "default_resource")]
    pub resource: String,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_subservice")]
    pub subservice: String,
}

fn default_entity_type() -> String {
    "DEVICE".to_string()
}

fn default_resource() -> String {
    DEFAULT_RESOURCE.to_string()
}

fn default_subservice() -> String {
    ANY_SUBSERVICE.to_string()
}
