//! Provisioning of things and devices
//!
//! Builds the entity documents registered for `add_thing` and
//! `update_schema`, and fills in transport defaults on every registration.

use iota_core::protocol::SchemaSpec;
use iota_core::{Attribute, AttributeType, Command, Entity, EntityKind, PARENT_ATTRIBUTE};

use crate::config::GatewayConfig;

/// Protocol tag of every entity this gateway registers
pub const PROTOCOL: &str = "PDI-IoTA-UltraLight";
/// Transport tag of session-connected entities
pub const TRANSPORT_WS: &str = "WS";
/// Command every device accepts
pub const DEVICE_COMMAND: &str = "command";
/// Connectivity attribute of a thing
pub const STATUS_ATTRIBUTE: &str = "status";
/// Measure attribute of a device
pub const VALUE_ATTRIBUTE: &str = "value";

/// Fill transport defaults: `WS` when unset, poll mode when there is no endpoint
pub fn provision(entity: &mut Entity) {
    if entity.transport.is_none() {
        entity.transport = Some(TRANSPORT_WS.to_string());
    }
    if entity.transport.as_deref() == Some(TRANSPORT_WS) {
        entity.polling = entity.endpoint.is_none();
    }
}

fn base(config: &GatewayConfig, id: &str, kind: EntityKind, subservice: &str) -> Entity {
    let mut entity = Entity::new(id, kind, &config.service, subservice);
    entity.protocol = Some(PROTOCOL.to_string());
    entity.transport = Some(TRANSPORT_WS.to_string());
    entity.endpoint = config.endpoint.clone();
    entity.api_key = config.default_key.clone();
    entity
}

/// Thing document for `add_thing`
pub fn thing(config: &GatewayConfig, id: &str, name: &str, subservice: &str) -> Entity {
    let mut thing = base(config, id, EntityKind::Thing, subservice);
    thing
        .active_attributes
        .push(Attribute::text(STATUS_ATTRIBUTE, "OFFLINE"));
    thing.static_attributes.push(Attribute::text("name", name));
    thing
}

/// Device document for one `update_schema` item
pub fn device(config: &GatewayConfig, thing_id: &str, subservice: &str, spec: &SchemaSpec) -> Entity {
    let mut device = base(config, &spec.sensor_id.to_string(), EntityKind::Device, subservice);
    device
        .active_attributes
        .push(Attribute::empty(VALUE_ATTRIBUTE, AttributeType::String));
    device.static_attributes.extend([
        Attribute::text(PARENT_ATTRIBUTE, thing_id),
        Attribute::integer("value_type", spec.value_type),
        Attribute::integer("unit", spec.unit),
        Attribute::integer("type_id", spec.type_id),
        Attribute::text("name", &spec.name),
    ]);
    device
        .commands
        .push(Command::new(DEVICE_COMMAND, AttributeType::Command.as_str()));
    device
}
