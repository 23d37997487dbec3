//! Test doubles for the store and the context broker
//!
//! Used by this crate's unit tests and by the end-to-end tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use iota_core::store::EntityFilter;
use iota_core::{
    Attribute, BrokerRouting, ContextBroker, Entity, EntityKey, EntityStore, GatewayError,
    GatewayResult, MemoryStore,
};
use parking_lot::Mutex;

/// One recorded broker call
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerCall {
    Update {
        entity_id: String,
        entity_type: String,
        api_key: Option<String>,
        attributes: Vec<Attribute>,
        routing: BrokerRouting,
    },
    Delete {
        entity_id: String,
        entity_type: String,
        routing: BrokerRouting,
    },
}

/// Recording context broker with failure injection
#[derive(Debug, Default)]
pub struct MockBroker {
    calls: Mutex<Vec<BrokerCall>>,
    entities: Mutex<HashMap<String, Vec<Attribute>>>,
    failing: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call touching `entity_id` fail with a 500 response
    pub fn fail_entity(&self, entity_id: &str) {
        self.failing.lock().insert(entity_id.to_string());
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().clone()
    }

    /// `(entity id, attributes)` of every update, in call order
    pub fn updates(&self) -> Vec<(String, Vec<Attribute>)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                BrokerCall::Update {
                    entity_id,
                    attributes,
                    ..
                } => Some((entity_id.clone(), attributes.clone())),
                _ => None,
            })
            .collect()
    }

    /// `(entity id, entity type)` of every delete, in call order
    pub fn deletes(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                BrokerCall::Delete {
                    entity_id,
                    entity_type,
                    ..
                } => Some((entity_id.clone(), entity_type.clone())),
                _ => None,
            })
            .collect()
    }

    fn check(&self, entity_id: &str) -> GatewayResult<()> {
        if self.fail_all.load(Ordering::SeqCst) || self.failing.lock().contains(entity_id) {
            return Err(GatewayError::Response {
                status: 500,
                message: format!("injected failure for {}", entity_id),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ContextBroker for MockBroker {
    async fn update(
        &self,
        entity_id: &str,
        entity_type: &str,
        api_key: Option<&str>,
        attributes: &[Attribute],
        routing: &BrokerRouting,
    ) -> GatewayResult<()> {
        self.calls.lock().push(BrokerCall::Update {
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            api_key: api_key.map(str::to_string),
            attributes: attributes.to_vec(),
            routing: routing.clone(),
        });
        self.check(entity_id)?;

        let mut entities = self.entities.lock();
        let stored = entities.entry(entity_id.to_string()).or_default();
        for attr in attributes {
            match stored.iter_mut().find(|a| a.name == attr.name) {
                Some(existing) => *existing = attr.clone(),
                None => stored.push(attr.clone()),
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        entity_id: &str,
        _entity_type: &str,
        _routing: &BrokerRouting,
    ) -> GatewayResult<Vec<Attribute>> {
        self.check(entity_id)?;
        self.entities
            .lock()
            .get(entity_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(entity_id.to_string()))
    }

    async fn delete(&self, entity_id: &str, entity_type: &str, routing: &BrokerRouting) -> GatewayResult<()> {
        self.calls.lock().push(BrokerCall::Delete {
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            routing: routing.clone(),
        });
        self.check(entity_id)?;
        self.entities.lock().remove(entity_id);
        Ok(())
    }
}

/// In-memory store that can be told to fail specific calls
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_remove: Mutex<HashSet<String>>,
    fail_fetch: AtomicBool,
    fail_scan: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Fail removal of any entity with this id
    pub fn fail_remove_of(&self, id: &str) {
        self.fail_remove.lock().insert(id.to_string());
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_scan(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }
}

fn offline() -> GatewayError {
    GatewayError::Internal("store offline".to_string())
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn insert(&self, entity: Entity) -> GatewayResult<Entity> {
        self.inner.insert(entity).await
    }

    async fn replace(&self, entity: Entity) -> GatewayResult<()> {
        self.inner.replace(entity).await
    }

    async fn remove(&self, key: &EntityKey) -> GatewayResult<()> {
        if self.fail_remove.lock().contains(&key.id) {
            return Err(offline());
        }
        self.inner.remove(key).await
    }

    async fn fetch(&self, key: &EntityKey) -> GatewayResult<Entity> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(offline());
        }
        self.inner.fetch(key).await
    }

    async fn scan(&self, filter: &EntityFilter) -> GatewayResult<Vec<Entity>> {
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(offline());
        }
        self.inner.scan(filter).await
    }
}
