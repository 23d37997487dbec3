//! Gateway - wires the registry, reconciler, northbound adapter and
//! session handler around one store and one broker

use std::sync::Arc;

use iota_core::{ContextBroker, EntityStore, GatewayResult};

use crate::broadcast::{EventBroadcaster, SessionRegistry};
use crate::config::GatewayConfig;
use crate::northbound::NorthboundAdapter;
use crate::reconcile::Reconciler;
use crate::registry::RegistryGateway;
use crate::session::SessionHandler;

/// Shared gateway services
#[derive(Clone)]
pub struct Gateway {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<RegistryGateway>,
    pub reconciler: Arc<Reconciler>,
    pub sessions: Arc<SessionRegistry>,
    pub northbound: Arc<NorthboundAdapter>,
    pub handler: Arc<SessionHandler>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn EntityStore>,
        broker: Arc<dyn ContextBroker>,
    ) -> GatewayResult<Self> {
        let config = Arc::new(config);
        let registry = Arc::new(RegistryGateway::new(store, config.service.clone()));
        let reconciler = Arc::new(Reconciler::new(registry.clone()));
        let sessions = Arc::new(SessionRegistry::new());
        let northbound = Arc::new(NorthboundAdapter::new(
            config.clone(),
            registry.clone(),
            broker,
            EventBroadcaster::new(sessions.clone()),
        )?);
        let handler = Arc::new(SessionHandler::new(
            config.clone(),
            registry.clone(),
            reconciler.clone(),
            northbound.clone(),
        ));

        tracing::info!(service = %config.service, "Gateway initialized");
        Ok(Self {
            config,
            registry,
            reconciler,
            sessions,
            northbound,
            handler,
        })
    }
}
