//! Registry gateway - CRUD façade over the entity store

use std::sync::Arc;

use iota_core::store::EntityFilter;
use iota_core::{Entity, EntityKey, EntityKind, EntityStore, GatewayError, GatewayResult, PARENT_ATTRIBUTE};
use tracing::{debug, info};

use crate::provision::provision;

/// Entity registry for one tenant service
pub struct RegistryGateway {
    store: Arc<dyn EntityStore>,
    service: String,
}

impl RegistryGateway {
    pub fn new(store: Arc<dyn EntityStore>, service: impl Into<String>) -> Self {
        Self {
            store,
            service: service.into(),
        }
    }

    /// Tenant service used by [`get`](Self::get)
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Provision, validate and store a new entity.
    ///
    /// Fails with `Duplicate` when the key is already registered.
    pub async fn register(&self, mut entity: Entity) -> GatewayResult<Entity> {
        provision(&mut entity);
        entity.validate()?;
        let entity = self.store.insert(entity).await?;
        info!(
            entity_id = %entity.id,
            kind = %entity.kind,
            subservice = %entity.subservice,
            "Registered entity"
        );
        Ok(entity)
    }

    pub async fn unregister(&self, id: &str, service: &str, subservice: &str) -> GatewayResult<()> {
        self.store
            .remove(&EntityKey::new(id, service, subservice))
            .await?;
        info!(entity_id = %id, subservice = %subservice, "Unregistered entity");
        Ok(())
    }

    /// Look up an entity of the given kind in the configured service
    pub async fn get(&self, id: &str, kind: EntityKind, subservice: &str) -> GatewayResult<Entity> {
        let entity = self
            .store
            .fetch(&EntityKey::new(id, &self.service, subservice))
            .await?;
        if entity.kind != kind {
            debug!(entity_id = %id, expected = %kind, found = %entity.kind, "Entity kind mismatch");
            return Err(GatewayError::NotFound(format!("{} {}", kind, id)));
        }
        Ok(entity)
    }

    /// Devices whose back-reference names `parent_id`
    pub async fn find_children(&self, parent_id: &str) -> GatewayResult<Vec<Entity>> {
        self.store
            .scan(
                &EntityFilter::default()
                    .with_kind(EntityKind::Device)
                    .with_static(PARENT_ATTRIBUTE, parent_id),
            )
            .await
    }

    pub async fn find_by_tenant(&self, service: &str, kind: EntityKind) -> GatewayResult<Vec<Entity>> {
        self.store
            .scan(&EntityFilter::default().with_service(service).with_kind(kind))
            .await
    }

    /// Persist a modified entity
    pub async fn update(&self, entity: Entity) -> GatewayResult<()> {
        entity.validate()?;
        debug!(entity_id = %entity.id, "Updating entity");
        self.store.replace(entity).await
    }
}
