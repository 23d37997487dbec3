//! Session request handling
//!
//! Turns one decoded session request into exactly one [`Reply`]. Errors are
//! logged here and surface to the client as `fail` with the error text.

use std::collections::BTreeMap;
use std::sync::Arc;

use iota_core::naming::thing_subservice;
use iota_core::protocol::{Reply, SchemaItem, SchemaSpec, SensorId, SensorValue, SessionRequest, ThingListing};
use iota_core::{Attribute, AttributeValue, Entity, EntityKind, GatewayError, GatewayResult};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::northbound::NorthboundAdapter;
use crate::provision;
use crate::reconcile::Reconciler;
use crate::registry::RegistryGateway;

pub struct SessionHandler {
    config: Arc<GatewayConfig>,
    registry: Arc<RegistryGateway>,
    reconciler: Arc<Reconciler>,
    northbound: Arc<NorthboundAdapter>,
}

impl SessionHandler {
    pub fn new(
        config: Arc<GatewayConfig>,
        registry: Arc<RegistryGateway>,
        reconciler: Arc<Reconciler>,
        northbound: Arc<NorthboundAdapter>,
    ) -> Self {
        Self {
            config,
            registry,
            reconciler,
            northbound,
        }
    }

    pub async fn handle(&self, request: SessionRequest) -> Reply {
        let kind = request.name();
        let result = match request {
            SessionRequest::AddThing { id, name } => self.add_thing(&id, &name).await.map(|_| Reply::Ok),
            SessionRequest::UpdateSchema { id, schema } => {
                self.update_schema(&id, &schema).await.map(|_| Reply::Ok)
            }
            SessionRequest::RemoveThing { id } => self.remove_thing(&id).await.map(|_| Reply::Ok),
            SessionRequest::PublishData { id, data } => {
                self.publish_data(&id, &data).await.map(|_| Reply::Ok)
            }
            SessionRequest::UpdateProperties { id, properties } => {
                self.update_properties(&id, &properties).await.map(|_| Reply::Ok)
            }
            SessionRequest::ListThings => self.list_things().await.map(Reply::Things),
            SessionRequest::Message { text } => Ok(Reply::Echo(text)),
        };

        result.unwrap_or_else(|e| {
            warn!(request = kind, error = %e, "Request failed");
            Reply::Fail(e.to_string())
        })
    }

    fn subservice(&self, thing_id: &str) -> String {
        thing_subservice(&self.config.service, thing_id)
    }

    /// Replace any previous registration of the thing, then register it
    pub async fn add_thing(&self, id: &str, name: &str) -> GatewayResult<Entity> {
        let subservice = self.subservice(id);
        self.reconciler.reconcile(id, &subservice).await?;
        let thing = self
            .registry
            .register(provision::thing(&self.config, id, name, &subservice))
            .await?;
        info!(thing_id = %id, "Created thing");
        Ok(thing)
    }

    /// Register one device per schema item under an existing thing. A device
    /// of the same thing already registered with the same sensor id is
    /// replaced; one owned by another thing rejects the whole schema before
    /// anything changes.
    pub async fn update_schema(&self, thing_id: &str, schema: &[SchemaSpec]) -> GatewayResult<()> {
        if schema.is_empty() {
            return Err(GatewayError::InvalidRequest("empty schema".to_string()));
        }

        let subservice = self.subservice(thing_id);
        self.registry
            .get(thing_id, EntityKind::Thing, &subservice)
            .await?;

        let mut devices = Vec::with_capacity(schema.len());
        for item in schema {
            let device = provision::device(&self.config, thing_id, &subservice, item);
            let replaces = self.owned_device(thing_id, &device.id, &subservice).await?;
            devices.push((device, replaces));
        }

        for (device, replaces) in devices {
            if replaces {
                debug!(device_id = %device.id, "Replacing device");
                self.registry
                    .unregister(&device.id, &device.service, &subservice)
                    .await?;
            }
            self.registry.register(device).await?;
        }
        info!(thing_id = %thing_id, devices = schema.len(), "Updated schema");
        Ok(())
    }

    /// Whether `device_id` is already registered under `thing_id`. A device
    /// in the same namespace whose back-reference names another thing is a
    /// `Duplicate`.
    async fn owned_device(&self, thing_id: &str, device_id: &str, subservice: &str) -> GatewayResult<bool> {
        let existing = match self.registry.get(device_id, EntityKind::Device, subservice).await {
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        match existing.parent_id() {
            Some(parent) if parent == thing_id => Ok(true),
            owner => {
                warn!(
                    device_id = %device_id,
                    thing_id = %thing_id,
                    owner = ?owner,
                    "Sensor id taken by another thing"
                );
                Err(GatewayError::Duplicate(format!(
                    "device '{}' in {} belongs to thing '{}'",
                    device_id,
                    subservice,
                    owner.unwrap_or("<none>")
                )))
            }
        }
    }

    /// Cascade-delete the thing, then retract it from the broker
    pub async fn remove_thing(&self, id: &str) -> GatewayResult<()> {
        let outcome = self.reconciler.remove(id, &self.subservice(id)).await?;
        self.northbound.retract(&outcome).await;
        Ok(())
    }

    pub async fn publish_data(&self, thing_id: &str, data: &[SensorValue]) -> GatewayResult<()> {
        self.northbound.push_measures(thing_id, data).await
    }

    /// Merge properties into the thing's static attributes, persist, then
    /// push them to the broker in one update
    pub async fn update_properties(&self, id: &str, properties: &BTreeMap<String, String>) -> GatewayResult<()> {
        if properties.is_empty() {
            return Err(GatewayError::InvalidRequest("no properties".to_string()));
        }

        let mut thing = self
            .registry
            .get(id, EntityKind::Thing, &self.subservice(id))
            .await?;
        for (key, value) in properties {
            thing.merge_static_attribute(Attribute::text(key, value));
        }
        self.registry.update(thing.clone()).await?;
        self.northbound.push_properties(&thing, properties).await
    }

    /// Every thing of the tenant with the schema of its devices
    pub async fn list_things(&self) -> GatewayResult<Vec<ThingListing>> {
        let things = self
            .registry
            .find_by_tenant(&self.config.service, EntityKind::Thing)
            .await?;

        let mut listings = Vec::with_capacity(things.len());
        for thing in things {
            let schema = self
                .registry
                .find_children(&thing.id)
                .await?
                .iter()
                .filter(|d| d.subservice == thing.subservice)
                .map(schema_item)
                .collect();
            listings.push(ThingListing {
                id: thing.id.clone(),
                name: thing.display_name(),
                schema,
            });
        }
        Ok(listings)
    }
}

fn static_integer(device: &Entity, name: &str) -> Option<i64> {
    match device.static_attribute(name)?.value.as_ref()? {
        AttributeValue::Integer(n) => Some(*n),
        _ => None,
    }
}

fn schema_item(device: &Entity) -> SchemaItem {
    SchemaItem {
        sensor_id: SensorId::from_device_id(&device.id),
        value_type: static_integer(device, "value_type"),
        unit: static_integer(device, "unit"),
        type_id: static_integer(device, "type_id"),
        name: device.static_attribute("name").and_then(|a| a.value_string()),
    }
}

#[cfg(test)]
mod tests {
    use iota_core::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::testing::MockBroker;
    use crate::Gateway;

    fn gateway() -> (Gateway, Arc<MemoryStore>, Arc<MockBroker>) {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(MockBroker::new());
        let config = GatewayConfig {
            default_key: Some("k".into()),
            ..Default::default()
        };
        let gw = Gateway::new(config, store.clone(), broker.clone()).unwrap();
        (gw, store, broker)
    }

    fn spec(sensor: &str, name: &str) -> SchemaSpec {
        SchemaSpec {
            sensor_id: SensorId::Text(sensor.to_string()),
            value_type: 1,
            unit: 2,
            type_id: 3,
            name: name.to_string(),
        }
    }

    fn add(id: &str, name: &str) -> SessionRequest {
        SessionRequest::AddThing {
            id: id.into(),
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn add_then_list() {
        let (gw, _, _) = gateway();
        assert_eq!(gw.handler.handle(add("t1", "Garden")).await, Reply::Ok);

        match gw.handler.handle(SessionRequest::ListThings).await {
            Reply::Things(things) => {
                assert_eq!(things.len(), 1);
                assert_eq!(things[0].id, "t1");
                assert_eq!(things[0].name, "Garden");
                assert!(things[0].schema.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn schema_shows_up_in_listing() {
        let (gw, _, _) = gateway();
        gw.handler.handle(add("t1", "Garden")).await;
        let reply = gw
            .handler
            .handle(SessionRequest::UpdateSchema {
                id: "t1".into(),
                schema: vec![spec("s1", "temp")],
            })
            .await;
        assert_eq!(reply, Reply::Ok);

        let things = gw.handler.list_things().await.unwrap();
        assert_eq!(
            things[0].schema,
            vec![SchemaItem {
                sensor_id: SensorId::Number(1),
                value_type: Some(1),
                unit: Some(2),
                type_id: Some(3),
                name: Some("temp".into()),
            }]
        );
    }

    #[tokio::test]
    async fn readding_thing_replaces_subtree() {
        let (gw, store, _) = gateway();
        gw.handler.handle(add("t-1", "Old")).await;
        gw.handler
            .update_schema("t-1", &[spec("1", "a"), spec("2", "b")])
            .await
            .unwrap();
        assert_eq!(store.len(), 3);

        assert_eq!(gw.handler.handle(add("t-1", "New")).await, Reply::Ok);
        assert_eq!(store.len(), 1);

        let things = gw.handler.list_things().await.unwrap();
        assert_eq!(things[0].name, "New");
        assert!(things[0].schema.is_empty());
    }

    #[tokio::test]
    async fn update_schema_replaces_same_sensor() {
        let (gw, store, _) = gateway();
        gw.handler.handle(add("t1", "Garden")).await;
        gw.handler.update_schema("t1", &[spec("1", "a")]).await.unwrap();
        gw.handler.update_schema("t1", &[spec("1", "b")]).await.unwrap();

        assert_eq!(store.len(), 2);
        let things = gw.handler.list_things().await.unwrap();
        assert_eq!(things[0].schema[0].name.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn update_schema_keeps_device_of_colliding_thing() {
        let (gw, store, _) = gateway();
        gw.handler.handle(add("a-b", "Dash")).await;
        gw.handler.handle(add("a_b", "Underscore")).await;
        gw.handler.update_schema("a-b", &[spec("1", "mine")]).await.unwrap();

        let err = gw
            .handler
            .update_schema("a_b", &[spec("2", "fresh"), spec("1", "theirs")])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Duplicate(_)));

        let children = gw.registry.find_children("a-b").await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(
            children[0].static_attribute("name").and_then(|a| a.value_string()).as_deref(),
            Some("mine")
        );
        // Rejected before anything was registered
        assert!(gw.registry.find_children("a_b").await.unwrap().is_empty());
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn update_schema_needs_thing() {
        let (gw, _, _) = gateway();
        let reply = gw
            .handler
            .handle(SessionRequest::UpdateSchema {
                id: "t1".into(),
                schema: vec![spec("1", "a")],
            })
            .await;
        assert!(matches!(reply, Reply::Fail(_)));
    }

    #[tokio::test]
    async fn remove_absent_thing_fails() {
        let (gw, _, broker) = gateway();
        let reply = gw.handler.handle(SessionRequest::RemoveThing { id: "t1".into() }).await;
        assert!(matches!(reply, Reply::Fail(ref msg) if msg.contains("not found")));
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn remove_retracts_from_broker() {
        let (gw, store, broker) = gateway();
        gw.handler.handle(add("t1", "Garden")).await;
        gw.handler.update_schema("t1", &[spec("1", "a")]).await.unwrap();

        let reply = gw.handler.handle(SessionRequest::RemoveThing { id: "t1".into() }).await;
        assert_eq!(reply, Reply::Ok);
        assert!(store.is_empty());
        assert_eq!(broker.deletes().len(), 2);
    }

    #[tokio::test]
    async fn publish_data_replies() {
        let (gw, _, broker) = gateway();
        let ok = gw
            .handler
            .handle(SessionRequest::PublishData {
                id: "t1".into(),
                data: vec![SensorValue {
                    sensor_id: SensorId::Number(1),
                    value: json!(20),
                }],
            })
            .await;
        assert_eq!(ok, Reply::Ok);

        let empty = gw
            .handler
            .handle(SessionRequest::PublishData {
                id: "t1".into(),
                data: vec![],
            })
            .await;
        assert!(matches!(empty, Reply::Fail(_)));
        assert_eq!(broker.updates().len(), 1);
    }

    #[tokio::test]
    async fn update_properties_persists_and_pushes() {
        let (gw, _, broker) = gateway();
        gw.handler.handle(add("t1", "Garden")).await;

        let props = BTreeMap::from([("name".to_string(), "Yard".to_string()), ("room".to_string(), "2".to_string())]);
        let reply = gw
            .handler
            .handle(SessionRequest::UpdateProperties {
                id: "t1".into(),
                properties: props,
            })
            .await;
        assert_eq!(reply, Reply::Ok);

        let things = gw.handler.list_things().await.unwrap();
        assert_eq!(things[0].name, "Yard");

        let (entity, attrs) = broker.updates().pop().unwrap();
        assert_eq!(entity, "t1");
        assert_eq!(attrs.len(), 2);
    }

    #[tokio::test]
    async fn update_properties_on_missing_thing_fails() {
        let (gw, _, _) = gateway();
        let reply = gw
            .handler
            .handle(SessionRequest::UpdateProperties {
                id: "t1".into(),
                properties: BTreeMap::from([("a".to_string(), "b".to_string())]),
            })
            .await;
        assert!(matches!(reply, Reply::Fail(_)));
    }

    #[tokio::test]
    async fn message_is_echoed() {
        let (gw, _, _) = gateway();
        let reply = gw
            .handler
            .handle(SessionRequest::Message { text: "hi".into() })
            .await;
        assert_eq!(reply, Reply::Echo("hi".into()));
    }
}
