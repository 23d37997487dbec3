//! HttpContextBroker - ContextBroker over NGSIv2 HTTP

use std::time::Duration;

use async_trait::async_trait;
use iota_core::{Attribute, AttributeType, BrokerRouting, ContextBroker, GatewayError, GatewayResult};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};
use url::Url;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default connection timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const SERVICE_HEADER: &str = "fiware-service";
const SERVICE_PATH_HEADER: &str = "fiware-servicepath";

#[derive(Deserialize)]
struct BrokerErrorResp {
    #[serde(default)]
    error: String,
    #[serde(default)]
    description: String,
}

/// Context broker reached over NGSIv2
#[derive(Debug, Clone)]
pub struct HttpContextBroker {
    client: Client,
    base_url: Url,
}

impl HttpContextBroker {
    /// Create a client for the broker at `base_url` (e.g. "http://localhost:1026")
    pub fn new(base_url: &str) -> GatewayResult<Self> {
        Self::with_config(base_url, DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_config(base_url: &str, timeout: Duration, connect_timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: parse_base(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL for a call, honouring a per-routing broker host override
    fn base_for(&self, routing: &BrokerRouting) -> GatewayResult<Url> {
        match &routing.broker_host {
            Some(host) => parse_base(host),
            None => Ok(self.base_url.clone()),
        }
    }

    fn entity_url(&self, entity_id: &str, entity_type: &str, routing: &BrokerRouting) -> GatewayResult<Url> {
        let mut url = self.base_for(routing)?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Internal("broker url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["v2", "entities", entity_id]);
        url.query_pairs_mut().append_pair("type", entity_type);
        Ok(url)
    }

    fn scoped(&self, builder: RequestBuilder, routing: &BrokerRouting) -> RequestBuilder {
        builder
            .header(SERVICE_HEADER, &routing.service)
            .header(SERVICE_PATH_HEADER, &routing.subservice)
    }

    async fn send(&self, builder: RequestBuilder, entity_id: &str) -> GatewayResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(entity_id.to_string()));
        }
        Err(extract_error(response, status).await)
    }
}

fn parse_base(raw: &str) -> GatewayResult<Url> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };
    Url::parse(&candidate).map_err(|e| GatewayError::InvalidRequest(format!("invalid broker url '{}': {}", raw, e)))
}

async fn extract_error(response: Response, status: StatusCode) -> GatewayError {
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<BrokerErrorResp>(&body) {
        Ok(err) if !err.description.is_empty() => err.description,
        Ok(err) if !err.error.is_empty() => err.error,
        _ if !body.is_empty() => body,
        _ => format!("HTTP {}", status),
    };
    GatewayError::Response {
        status: status.as_u16(),
        message,
    }
}

/// NGSIv2 attribute map for an update body
fn attribute_map(attributes: &[Attribute]) -> Map<String, Value> {
    attributes
        .iter()
        .map(|a| {
            let value = a.value.as_ref().map(|v| v.to_json()).unwrap_or(Value::Null);
            (a.name.clone(), json!({ "type": a.attr_type.as_str(), "value": value }))
        })
        .collect()
}

/// Typed attributes from an NGSIv2 entity body
fn parse_entity(body: &Value) -> GatewayResult<Vec<Attribute>> {
    let obj = body
        .as_object()
        .ok_or_else(|| GatewayError::Decode("entity body is not an object".to_string()))?;

    let mut attributes = Vec::new();
    for (name, raw) in obj {
        if name == "id" || name == "type" {
            continue;
        }
        let attr_type = raw
            .get("type")
            .and_then(Value::as_str)
            .map(AttributeType::from_broker_type)
            .unwrap_or(AttributeType::String);
        let value = raw.get("value").unwrap_or(&Value::Null);
        let attr = Attribute::typed(name.clone(), attr_type, value)
            .or_else(|_| Attribute::typed(name.clone(), AttributeType::String, value))
            .unwrap_or_else(|_| Attribute::empty(name.clone(), attr_type));
        attributes.push(attr);
    }
    Ok(attributes)
}

#[async_trait]
impl ContextBroker for HttpContextBroker {
    #[instrument(skip(self, attributes, api_key), fields(service = %routing.service, subservice = %routing.subservice))]
    async fn update(
        &self,
        entity_id: &str,
        entity_type: &str,
        api_key: Option<&str>,
        attributes: &[Attribute],
        routing: &BrokerRouting,
    ) -> GatewayResult<()> {
        let mut url = self.base_for(routing)?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Internal("broker url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["v2", "op", "update"]);
        debug!(attributes = attributes.len(), has_api_key = api_key.is_some(), "Pushing update to {}", url);

        let mut entity = attribute_map(attributes);
        entity.insert("id".to_string(), Value::from(entity_id));
        entity.insert("type".to_string(), Value::from(entity_type));
        let body = json!({ "actionType": "append", "entities": [entity] });

        let builder = self.scoped(self.client.post(url), routing).json(&body);
        self.send(builder, entity_id).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(service = %routing.service, subservice = %routing.subservice))]
    async fn query(
        &self,
        entity_id: &str,
        entity_type: &str,
        routing: &BrokerRouting,
    ) -> GatewayResult<Vec<Attribute>> {
        let url = self.entity_url(entity_id, entity_type, routing)?;
        debug!("Querying {}", url);

        let builder = self.scoped(self.client.get(url), routing);
        let response = self.send(builder, entity_id).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        parse_entity(&body)
    }

    #[instrument(skip(self), fields(service = %routing.service, subservice = %routing.subservice))]
    async fn delete(&self, entity_id: &str, entity_type: &str, routing: &BrokerRouting) -> GatewayResult<()> {
        let url = self.entity_url(entity_id, entity_type, routing)?;
        debug!("Deleting {}", url);

        let builder = self.scoped(self.client.delete(url), routing);
        self.send(builder, entity_id).await?;
        Ok(())
    }
}
