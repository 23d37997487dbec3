//! Northbound adapter
//!
//! Translates internal changes into context broker updates, and
//! broker-originated commands into executor runs plus a session broadcast.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use iota_core::naming::thing_subservice;
use iota_core::protocol::{EventDevice, SensorValue, ServerMessage, SessionEvent};
use iota_core::{
    Attribute, BrokerRouting, CommandInvocation, CommandStatus, ContextBroker, Entity, EntityKind,
    GatewayError, GatewayResult,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::broadcast::EventBroadcaster;
use crate::commands::{CommandExecutor, CommandReporter};
use crate::config::GatewayConfig;
use crate::provision::VALUE_ATTRIBUTE;
use crate::reconcile::CascadeOutcome;
use crate::registry::RegistryGateway;

fn routing(config: &GatewayConfig, service: &str, subservice: &str) -> BrokerRouting {
    BrokerRouting::new(service, subservice).with_broker_host(config.broker_address())
}

/// Text form of a measure: strings as-is, anything else as JSON
fn measure_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Records command status in the registry and mirrors it to the broker as
/// `<command>_status` / `<command>_info` attributes.
pub struct CommandStatusUpdater {
    registry: Arc<RegistryGateway>,
    broker: Arc<dyn ContextBroker>,
    config: Arc<GatewayConfig>,
}

impl CommandStatusUpdater {
    pub fn new(registry: Arc<RegistryGateway>, broker: Arc<dyn ContextBroker>, config: Arc<GatewayConfig>) -> Self {
        Self {
            registry,
            broker,
            config,
        }
    }

    /// Mark commands pending on the stored device
    async fn begin(&self, device: &mut Entity, commands: &[CommandInvocation]) -> GatewayResult<()> {
        for invocation in commands {
            if let Some(command) = device.command_mut(&invocation.name) {
                command.begin();
            }
        }
        self.registry.update(device.clone()).await
    }
}

#[async_trait]
impl CommandReporter for CommandStatusUpdater {
    async fn report(
        &self,
        api_key: &str,
        device: &Entity,
        command: &str,
        status: CommandStatus,
        result: &str,
    ) -> GatewayResult<()> {
        let mut stored = self
            .registry
            .get(&device.id, device.kind, &device.subservice)
            .await?;
        stored
            .command_mut(command)
            .ok_or_else(|| GatewayError::NotFound(format!("command '{}' on {}", command, device.id)))?
            .finish(status, result)?;
        self.registry.update(stored).await?;

        let attributes = [
            Attribute::text(format!("{}_status", command), status.as_str()),
            Attribute::text(format!("{}_info", command), result),
        ];
        self.broker
            .update(
                &device.id,
                device.kind.as_str(),
                Some(api_key),
                &attributes,
                &routing(&self.config, &device.service, &device.subservice),
            )
            .await?;

        debug!(device_id = %device.id, command = %command, status = %status.as_str(), "Command status updated");
        Ok(())
    }
}

/// A validated command request, ready to run
#[derive(Debug, Clone)]
pub struct PreparedCommand {
    pub device: Entity,
    pub commands: Vec<CommandInvocation>,
    pub api_key: Option<String>,
}

pub struct NorthboundAdapter {
    config: Arc<GatewayConfig>,
    registry: Arc<RegistryGateway>,
    broker: Arc<dyn ContextBroker>,
    executor: CommandExecutor,
    broadcaster: EventBroadcaster,
    status: Arc<CommandStatusUpdater>,
}

impl NorthboundAdapter {
    pub fn new(
        config: Arc<GatewayConfig>,
        registry: Arc<RegistryGateway>,
        broker: Arc<dyn ContextBroker>,
        broadcaster: EventBroadcaster,
    ) -> GatewayResult<Self> {
        let status = Arc::new(CommandStatusUpdater::new(
            registry.clone(),
            broker.clone(),
            config.clone(),
        ));
        let executor = CommandExecutor::new(config.command_timeout(), status.clone())?;
        Ok(Self {
            config,
            registry,
            broker,
            executor,
            broadcaster,
            status,
        })
    }

    fn api_key(&self, service: &str, subservice: &str) -> Option<String> {
        self.config.effective_api_key(service, subservice)
    }

    // =========================================================================
    // Internal changes → broker
    // =========================================================================

    /// One broker update per reading, each for the device named by its sensor id
    pub async fn push_measures(&self, thing_id: &str, data: &[SensorValue]) -> GatewayResult<()> {
        if data.is_empty() {
            return Err(GatewayError::InvalidRequest("no data to publish".to_string()));
        }

        let service = self.registry.service();
        let subservice = thing_subservice(service, thing_id);
        let routing = routing(&self.config, service, &subservice);
        let api_key = self.api_key(service, &subservice);

        for reading in data {
            let attributes = [Attribute::text(VALUE_ATTRIBUTE, measure_text(&reading.value))];
            self.broker
                .update(
                    &reading.sensor_id.to_string(),
                    EntityKind::Device.as_str(),
                    api_key.as_deref(),
                    &attributes,
                    &routing,
                )
                .await?;
        }
        debug!(thing_id = %thing_id, readings = data.len(), "Published measures");
        Ok(())
    }

    /// One combined broker update for a thing's new properties
    pub async fn push_properties(&self, thing: &Entity, properties: &BTreeMap<String, String>) -> GatewayResult<()> {
        let attributes: Vec<Attribute> = properties
            .iter()
            .map(|(k, v)| Attribute::text(k, v))
            .collect();
        self.broker
            .update(
                &thing.id,
                EntityKind::Thing.as_str(),
                self.api_key(&thing.service, &thing.subservice).as_deref(),
                &attributes,
                &routing(&self.config, &thing.service, &thing.subservice),
            )
            .await
    }

    /// Remove a deleted thing and its devices from the broker.
    ///
    /// Failures are logged; the registry is already consistent.
    pub async fn retract(&self, outcome: &CascadeOutcome) {
        let thing = &outcome.thing;
        let routing = routing(&self.config, &thing.service, &thing.subservice);

        let targets = std::iter::once(thing).chain(outcome.children.iter());
        for entity in targets {
            if let Err(e) = self
                .broker
                .delete(&entity.id, entity.kind.as_str(), &routing)
                .await
            {
                warn!(entity_id = %entity.id, error = %e, "Failed to retract entity from broker");
            }
        }
    }

    /// Current attributes of an entity as the broker sees them
    pub async fn fetch_attributes(&self, entity: &Entity) -> GatewayResult<Vec<Attribute>> {
        self.broker
            .query(
                &entity.id,
                entity.kind.as_str(),
                &routing(&self.config, &entity.service, &entity.subservice),
            )
            .await
    }

    // =========================================================================
    // Broker commands → devices
    // =========================================================================

    /// Resolve the target device and keep the commands it declares. Nothing
    /// is written.
    pub async fn resolve_command(
        &self,
        device_id: &str,
        subservice: &str,
        requested: Vec<CommandInvocation>,
    ) -> GatewayResult<PreparedCommand> {
        let device = self
            .registry
            .get(device_id, EntityKind::Device, subservice)
            .await?;

        let commands: Vec<CommandInvocation> = requested
            .into_iter()
            .filter(|c| device.commands.iter().any(|d| d.name == c.name))
            .collect();
        if commands.is_empty() {
            return Err(GatewayError::InvalidRequest(format!(
                "no command attributes for device '{}'",
                device_id
            )));
        }

        let api_key = self.api_key(&device.service, &device.subservice);
        Ok(PreparedCommand {
            device,
            commands,
            api_key,
        })
    }

    /// Mark the commands of a resolved request pending
    pub async fn begin_command(&self, prepared: &mut PreparedCommand) -> GatewayResult<()> {
        self.status.begin(&mut prepared.device, &prepared.commands).await
    }

    /// [`resolve_command`](Self::resolve_command) then
    /// [`begin_command`](Self::begin_command)
    pub async fn prepare_command(
        &self,
        device_id: &str,
        subservice: &str,
        requested: Vec<CommandInvocation>,
    ) -> GatewayResult<PreparedCommand> {
        let mut prepared = self.resolve_command(device_id, subservice, requested).await?;
        self.begin_command(&mut prepared).await?;
        Ok(prepared)
    }

    /// Notify every session and run the batch against the device.
    ///
    /// On failure the failing command is marked `ERROR`; a failure of that
    /// update is only logged.
    pub async fn dispatch(&self, prepared: PreparedCommand) -> GatewayResult<()> {
        let PreparedCommand {
            device,
            commands,
            api_key,
        } = prepared;

        self.broadcaster
            .broadcast(&ServerMessage::Event(SessionEvent::CommandReceived {
                device: EventDevice::from(&device),
                commands: commands.clone(),
            }));

        match self
            .executor
            .execute(api_key.as_deref(), &device, &commands)
            .await
        {
            Ok(()) => {
                debug!(device_id = %device.id, "Incoming command handled");
                Ok(())
            }
            Err(e) => {
                error!(device_id = %device.id, error = %e, "Error handling incoming command");
                let command = e
                    .command()
                    .map(str::to_string)
                    .or_else(|| commands.first().map(|c| c.name.clone()))
                    .unwrap_or_default();
                match api_key.as_deref() {
                    Some(key) => {
                        if let Err(report_err) = self
                            .status
                            .report(key, &device, &command, CommandStatus::Error, &e.command_message())
                            .await
                        {
                            error!(
                                device_id = %device.id,
                                command = %command,
                                error = %report_err,
                                "Error updating error information"
                            );
                        }
                    }
                    None => info!(device_id = %device.id, command = %command, "No API key, error not recorded"),
                }
                Err(e)
            }
        }
    }

    pub async fn handle_command(
        &self,
        device_id: &str,
        subservice: &str,
        requested: Vec<CommandInvocation>,
    ) -> GatewayResult<()> {
        let prepared = self.prepare_command(device_id, subservice, requested).await?;
        self.dispatch(prepared).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use iota_core::protocol::{SchemaSpec, SensorId};
    use iota_core::MemoryStore;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::broadcast::{SessionHandle, SessionRegistry};
    use crate::provision;
    use crate::testing::{BrokerCall, MockBroker};

    struct Fixture {
        adapter: NorthboundAdapter,
        registry: Arc<RegistryGateway>,
        broker: Arc<MockBroker>,
        sessions: Arc<SessionRegistry>,
    }

    async fn fixture(config: GatewayConfig) -> Fixture {
        let config = Arc::new(config);
        let registry = Arc::new(RegistryGateway::new(Arc::new(MemoryStore::new()), "knot"));
        let broker = Arc::new(MockBroker::new());
        let sessions = Arc::new(SessionRegistry::new());
        let adapter = NorthboundAdapter::new(
            config.clone(),
            registry.clone(),
            broker.clone(),
            EventBroadcaster::new(sessions.clone()),
        )
        .unwrap();

        registry
            .register(provision::thing(&config, "t1", "Garden", "/knot/t1"))
            .await
            .unwrap();
        let spec = SchemaSpec {
            sensor_id: SensorId::Number(1),
            value_type: 1,
            unit: 0,
            type_id: 1,
            name: "led".into(),
        };
        registry
            .register(provision::device(&config, "t1", "/knot/t1", &spec))
            .await
            .unwrap();

        Fixture {
            adapter,
            registry,
            broker,
            sessions,
        }
    }

    fn keyed() -> GatewayConfig {
        GatewayConfig {
            default_key: Some("k".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn measures_become_device_updates() {
        let f = fixture(keyed()).await;
        let data = vec![
            SensorValue {
                sensor_id: SensorId::Number(1),
                value: json!(21.5),
            },
            SensorValue {
                sensor_id: SensorId::Number(2),
                value: json!("on"),
            },
        ];
        f.adapter.push_measures("t1", &data).await.unwrap();

        let calls = f.broker.calls();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            BrokerCall::Update {
                entity_id,
                entity_type,
                api_key,
                attributes,
                routing,
            } => {
                assert_eq!(entity_id, "1");
                assert_eq!(entity_type, "DEVICE");
                assert_eq!(api_key.as_deref(), Some("k"));
                assert_eq!(attributes[0], Attribute::text("value", "21.5"));
                assert_eq!(routing.subservice, "/knot/t1");
                assert_eq!(routing.broker_host.as_deref(), Some("localhost:1026"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_measures_fail() {
        let f = fixture(keyed()).await;
        assert!(f.adapter.push_measures("t1", &[]).await.is_err());
        assert!(f.broker.calls().is_empty());
    }

    #[tokio::test]
    async fn broker_failure_stops_measures() {
        let f = fixture(keyed()).await;
        f.broker.fail_entity("1");
        let data = vec![
            SensorValue {
                sensor_id: SensorId::Number(1),
                value: json!(1),
            },
            SensorValue {
                sensor_id: SensorId::Number(2),
                value: json!(2),
            },
        ];
        assert!(f.adapter.push_measures("t1", &data).await.is_err());
        assert_eq!(f.broker.updates().len(), 1);
    }

    #[tokio::test]
    async fn retract_deletes_thing_and_devices() {
        let f = fixture(keyed()).await;
        let thing = f.registry.get("t1", EntityKind::Thing, "/knot/t1").await.unwrap();
        let children = f.registry.find_children("t1").await.unwrap();
        f.broker.fail_entity("t1");

        f.adapter
            .retract(&CascadeOutcome { thing, children })
            .await;
        assert_eq!(
            f.broker.deletes(),
            vec![
                ("t1".to_string(), "THING".to_string()),
                ("1".to_string(), "DEVICE".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn fetch_reads_back_pushed_properties() {
        let f = fixture(keyed()).await;
        let thing = f.registry.get("t1", EntityKind::Thing, "/knot/t1").await.unwrap();
        let props = BTreeMap::from([("room".to_string(), "kitchen".to_string())]);
        f.adapter.push_properties(&thing, &props).await.unwrap();

        let attrs = f.adapter.fetch_attributes(&thing).await.unwrap();
        assert_eq!(attrs, vec![Attribute::text("room", "kitchen")]);
    }

    #[tokio::test]
    async fn unknown_device_or_command_is_rejected() {
        let f = fixture(keyed()).await;
        let err = f
            .adapter
            .prepare_command("9", "/knot/t1", vec![CommandInvocation::new("command", json!(1))])
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = f
            .adapter
            .prepare_command("1", "/knot/t1", vec![CommandInvocation::new("reboot", json!(1))])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn poll_mode_command_stays_pending_and_is_broadcast() {
        let f = fixture(keyed()).await;
        let (tx, mut rx) = mpsc::channel(4);
        f.sessions.register(SessionHandle::new("peer", tx));

        f.adapter
            .handle_command("1", "/knot/t1", vec![CommandInvocation::new("command", json!("on"))])
            .await
            .unwrap();

        let device = f.registry.get("1", EntityKind::Device, "/knot/t1").await.unwrap();
        assert_eq!(device.commands[0].status, Some(CommandStatus::Pending));

        match rx.recv().await.unwrap() {
            ServerMessage::Event(SessionEvent::CommandReceived { device, commands }) => {
                assert_eq!(device.id, "1");
                assert_eq!(device.thing.as_deref(), Some("t1"));
                assert_eq!(commands[0].value, json!("on"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn delivery_failure_marks_command_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let f = fixture(GatewayConfig {
            default_key: Some("k".into()),
            endpoint: Some(format!("http://{}/", addr)),
            command_timeout_secs: 1,
            ..Default::default()
        })
        .await;

        let err = f
            .adapter
            .handle_command("1", "/knot/t1", vec![CommandInvocation::new("command", json!("on"))])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CommandTransport { .. }));

        let device = f.registry.get("1", EntityKind::Device, "/knot/t1").await.unwrap();
        assert_eq!(device.commands[0].status, Some(CommandStatus::Error));

        let last = f.broker.updates().pop().unwrap();
        assert_eq!(last.0, "1");
        assert_eq!(last.1[0], Attribute::text("command_status", "ERROR"));
    }

    #[tokio::test]
    async fn failed_error_report_is_swallowed() {
        let f = fixture(GatewayConfig {
            default_key: Some("k".into()),
            endpoint: Some("http://127.0.0.1:9/".into()),
            command_timeout_secs: 1,
            ..Default::default()
        })
        .await;
        f.broker.fail_all(true);

        // The primary delivery error is returned, not the reporting one
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            f.adapter
                .handle_command("1", "/knot/t1", vec![CommandInvocation::new("command", json!(1))]),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, GatewayError::CommandTransport { .. }));
    }
}
