//! Hierarchy reconciler
//!
//! A thing and its devices are removed together. The cascade is a linear
//! sequence of store calls:
//!
//! ```text
//! lookup ──▶ find-children ──▶ resolve-child* ──▶ unregister-child* ──▶ unregister-thing
//! ```
//!
//! It is not atomic: a failure midway leaves the already removed entities
//! gone, and the error lists them. Concurrent registrations of the same
//! thing may interleave with a cascade.

use std::sync::Arc;

use iota_core::{CascadeStep, Entity, EntityKind, GatewayError, GatewayResult};
use tracing::{debug, error, info};

use crate::registry::RegistryGateway;

/// Entities removed by a successful cascade
#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    pub thing: Entity,
    pub children: Vec<Entity>,
}

pub struct Reconciler {
    registry: Arc<RegistryGateway>,
}

impl Reconciler {
    pub fn new(registry: Arc<RegistryGateway>) -> Self {
        Self { registry }
    }

    /// Clear any previous registration of `external_id` before it is
    /// registered again. An unknown thing is not an error.
    pub async fn reconcile(&self, external_id: &str, subservice: &str) -> GatewayResult<()> {
        match self.lookup(external_id, subservice).await {
            Ok(thing) => {
                info!(thing_id = %external_id, "Thing already registered, removing it and its devices");
                self.cascade(thing).await.map(|_| ())
            }
            Err(e) if e.is_not_found() => {
                debug!(thing_id = %external_id, "First registration");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a thing and its devices. An unknown thing is `NotFound`.
    pub async fn remove(&self, external_id: &str, subservice: &str) -> GatewayResult<CascadeOutcome> {
        let thing = self.lookup(external_id, subservice).await?;
        self.cascade(thing).await
    }

    async fn lookup(&self, external_id: &str, subservice: &str) -> GatewayResult<Entity> {
        self.registry
            .get(external_id, EntityKind::Thing, subservice)
            .await
            .map_err(|e| match e {
                GatewayError::NotFound(_) => e,
                other => integrity(CascadeStep::Lookup, other, &[]),
            })
    }

    async fn cascade(&self, thing: Entity) -> GatewayResult<CascadeOutcome> {
        let children = self
            .registry
            .find_children(&thing.id)
            .await
            .map_err(|e| integrity(CascadeStep::FindChildren, e, &[]))?;

        // Every child must live in the thing's namespace before anything is deleted
        if let Some(stray) = children
            .iter()
            .find(|c| c.service != thing.service || c.subservice != thing.subservice)
        {
            return Err(GatewayError::Integrity {
                step: CascadeStep::ResolveChild(stray.id.clone()),
                message: format!(
                    "device is scoped to {}{} but thing '{}' is scoped to {}{}",
                    stray.service, stray.subservice, thing.id, thing.service, thing.subservice
                ),
                removed: Vec::new(),
            });
        }

        let mut removed = Vec::with_capacity(children.len() + 1);
        for child in &children {
            debug!(thing_id = %thing.id, device_id = %child.id, "Unregistering device");
            self.registry
                .unregister(&child.id, &child.service, &child.subservice)
                .await
                .map_err(|e| integrity(CascadeStep::UnregisterChild(child.id.clone()), e, &removed))?;
            removed.push(child.id.clone());
        }

        self.registry
            .unregister(&thing.id, &thing.service, &thing.subservice)
            .await
            .map_err(|e| integrity(CascadeStep::UnregisterThing(thing.id.clone()), e, &removed))?;

        info!(thing_id = %thing.id, devices = children.len(), "Removed thing and its devices");
        Ok(CascadeOutcome { thing, children })
    }
}

fn integrity(step: CascadeStep, cause: GatewayError, removed: &[String]) -> GatewayError {
    error!(step = %step, error = %cause, removed = ?removed, "Cascade aborted");
    GatewayError::Integrity {
        step,
        message: cause.to_string(),
        removed: removed.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use iota_core::protocol::{SchemaSpec, SensorId};
    use iota_core::{Attribute, EntityStore, MemoryStore, PARENT_ATTRIBUTE};

    use super::*;
    use crate::config::GatewayConfig;
    use crate::provision;
    use crate::testing::FlakyStore;

    fn spec(id: u64) -> SchemaSpec {
        SchemaSpec {
            sensor_id: SensorId::Number(id),
            value_type: 1,
            unit: 0,
            type_id: 1,
            name: format!("s{}", id),
        }
    }

    async fn seeded(store: Arc<dyn EntityStore>, devices: u64) -> (Reconciler, Arc<RegistryGateway>) {
        let registry = Arc::new(RegistryGateway::new(store, "knot"));
        let cfg = GatewayConfig::default();
        registry
            .register(provision::thing(&cfg, "t1", "Garden", "/knot/t1"))
            .await
            .unwrap();
        for id in 1..=devices {
            registry
                .register(provision::device(&cfg, "t1", "/knot/t1", &spec(id)))
                .await
                .unwrap();
        }
        (Reconciler::new(registry.clone()), registry)
    }

    #[tokio::test]
    async fn reconcile_unknown_thing_is_ok() {
        let registry = Arc::new(RegistryGateway::new(Arc::new(MemoryStore::new()), "knot"));
        let reconciler = Reconciler::new(registry);
        reconciler.reconcile("t1", "/knot/t1").await.unwrap();
    }

    #[tokio::test]
    async fn reconcile_removes_whole_subtree() {
        let store = Arc::new(MemoryStore::new());
        let (reconciler, registry) = seeded(store.clone(), 3).await;

        reconciler.reconcile("t1", "/knot/t1").await.unwrap();

        assert!(store.is_empty());
        assert!(registry.find_children("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_thing_is_not_found() {
        let registry = Arc::new(RegistryGateway::new(Arc::new(MemoryStore::new()), "knot"));
        let err = Reconciler::new(registry).remove("t1", "/knot/t1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn remove_reports_removed_entities() {
        let (reconciler, _) = seeded(Arc::new(MemoryStore::new()), 2).await;
        let outcome = reconciler.remove("t1", "/knot/t1").await.unwrap();
        assert_eq!(outcome.thing.id, "t1");
        let ids: Vec<_> = outcome.children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn child_failure_names_step_and_removed_ids() {
        let store = Arc::new(FlakyStore::new());
        let (reconciler, _) = seeded(store.clone(), 3).await;
        store.fail_remove_of("2");

        let err = reconciler.reconcile("t1", "/knot/t1").await.unwrap_err();
        match err {
            GatewayError::Integrity { step, removed, .. } => {
                assert_eq!(step, CascadeStep::UnregisterChild("2".to_string()));
                assert_eq!(removed, vec!["1".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
        // No rollback: device 1 stays removed, the thing and device 3 remain
        assert_eq!(store.inner().len(), 3);
    }

    #[tokio::test]
    async fn lookup_failure_aborts_before_deleting() {
        let store = Arc::new(FlakyStore::new());
        let (reconciler, _) = seeded(store.clone(), 1).await;
        store.fail_fetch(true);

        let err = reconciler.reconcile("t1", "/knot/t1").await.unwrap_err();
        assert!(matches!(err, GatewayError::Integrity { step: CascadeStep::Lookup, .. }));
        assert_eq!(store.inner().len(), 2);
    }

    #[tokio::test]
    async fn stray_child_aborts_before_deleting() {
        let store = Arc::new(MemoryStore::new());
        let (reconciler, _) = seeded(store.clone(), 1).await;

        // A device in another namespace pointing at t1
        let mut stray = iota_core::Entity::new("9", EntityKind::Device, "knot", "/knot/other");
        stray
            .static_attributes
            .push(Attribute::text(PARENT_ATTRIBUTE, "t1"));
        store.insert(stray).await.unwrap();

        let err = reconciler.reconcile("t1", "/knot/t1").await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Integrity { step: CascadeStep::ResolveChild(ref id), .. } if id == "9"
        ));
        assert_eq!(store.len(), 3);
    }
}
