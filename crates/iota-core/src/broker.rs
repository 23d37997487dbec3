//! ContextBroker trait - the northbound context-management service

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayResult;
use crate::models::Attribute;

/// Where an outbound broker call is routed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerRouting {
    pub service: String,
    pub subservice: String,
    /// `host:port` of the broker; the broker client's default when `None`
    #[serde(default)]
    pub broker_host: Option<String>,
}

impl BrokerRouting {
    pub fn new(service: impl Into<String>, subservice: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            subservice: subservice.into(),
            broker_host: None,
        }
    }

    pub fn with_broker_host(mut self, host: impl Into<String>) -> Self {
        self.broker_host = Some(host.into());
        self
    }
}

/// Northbound context broker
#[async_trait]
pub trait ContextBroker: Send + Sync {
    /// Push attribute values for an entity, creating it if needed
    async fn update(
        &self,
        entity_id: &str,
        entity_type: &str,
        api_key: Option<&str>,
        attributes: &[Attribute],
        routing: &BrokerRouting,
    ) -> GatewayResult<()>;

    /// Request the current attributes of an entity
    async fn query(
        &self,
        entity_id: &str,
        entity_type: &str,
        routing: &BrokerRouting,
    ) -> GatewayResult<Vec<Attribute>>;

    /// Remove an entity from the broker
    async fn delete(
        &self,
        entity_id: &str,
        entity_type: &str,
        routing: &BrokerRouting,
    ) -> GatewayResult<()>;
}
