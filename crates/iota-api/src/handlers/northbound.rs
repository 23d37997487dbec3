//! Northbound command listener
//!
//! The context broker forwards command updates as an NGSIv2 batch:
//!
//! ```text
//! POST /v2/op/update
//! fiware-service: knot
//! fiware-servicepath: /knot/t1
//!
//! {"actionType": "update",
//!  "entities": [{"id": "1", "type": "DEVICE",
//!                "command": {"type": "command", "value": "on"}}]}
//! ```
//!
//! Every entity is validated first, then all commands are marked pending
//! before the reply; delivery to the device runs in the background.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use iota_core::CommandInvocation;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub entities: Vec<NgsiEntity>,
}

#[derive(Debug, Deserialize)]
pub struct NgsiEntity {
    pub id: String,
    #[serde(default, rename = "type")]
    pub entity_type: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl NgsiEntity {
    fn invocations(&self) -> Vec<CommandInvocation> {
        self.attributes
            .iter()
            .map(|(name, attr)| {
                let value = match attr {
                    Value::Object(obj) => obj.get("value").cloned().unwrap_or(Value::Null),
                    other => other.clone(),
                };
                CommandInvocation::new(name.clone(), value)
            })
            .collect()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /v2/op/update
pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateRequest>,
) -> Result<StatusCode, ApiError> {
    let gateway = &state.gateway;
    let service = header(&headers, "fiware-service").unwrap_or(&gateway.config.service);
    let subservice = header(&headers, "fiware-servicepath")
        .ok_or_else(|| ApiError::BadRequest("missing fiware-servicepath header".to_string()))?;

    if service != gateway.config.service {
        return Err(ApiError::NotFound(format!("unknown service '{}'", service)));
    }
    if request.entities.is_empty() {
        return Err(ApiError::BadRequest("no entities in update".to_string()));
    }

    tracing::info!(
        action = request.action_type.as_deref().unwrap_or("update"),
        entities = request.entities.len(),
        subservice = %subservice,
        "Command request from broker"
    );

    // Validate the whole batch before any command is marked pending
    let mut prepared = Vec::with_capacity(request.entities.len());
    for entity in &request.entities {
        tracing::debug!(entity_id = %entity.id, entity_type = ?entity.entity_type, "Resolving command");
        prepared.push(
            gateway
                .northbound
                .resolve_command(&entity.id, subservice, entity.invocations())
                .await?,
        );
    }
    for command in &mut prepared {
        gateway.northbound.begin_command(command).await?;
    }

    for command in prepared {
        let northbound = gateway.northbound.clone();
        tokio::spawn(async move {
            let device_id = command.device.id.clone();
            if let Err(e) = northbound.dispatch(command).await {
                tracing::warn!(device_id = %device_id, error = %e, "Command delivery failed");
            }
        });
    }

    Ok(StatusCode::NO_CONTENT)
}
