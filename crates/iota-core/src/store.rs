//! EntityStore trait - the document store behind the registry
//!
//! Entities are stored as documents keyed by `(id, service, subservice)`.
//! The store offers no uniqueness constraint beyond the key and no joins:
//! parent/child lookups are equality scans over a static attribute.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{GatewayError, GatewayResult};
use crate::models::{Entity, EntityKey, EntityKind};

/// Scan filter; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub service: Option<String>,
    pub subservice: Option<String>,
    pub kind: Option<EntityKind>,
    /// `(name, value)` a static attribute must equal
    pub static_attribute: Option<(String, String)>,
}

impl EntityFilter {
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_subservice(mut self, subservice: impl Into<String>) -> Self {
        self.subservice = Some(subservice.into());
        self
    }

    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_static(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_attribute = Some((name.into(), value.into()));
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(service) = &self.service {
            if &entity.service != service {
                return false;
            }
        }
        if let Some(subservice) = &self.subservice {
            if &entity.subservice != subservice {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if entity.kind != kind {
                return false;
            }
        }
        if let Some((name, value)) = &self.static_attribute {
            let hit = entity
                .static_attributes
                .iter()
                .any(|a| &a.name == name && a.value_string().as_deref() == Some(value.as_str()));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Document store consumed by the registry gateway
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert a new document. Fails with `Duplicate` if the key exists.
    async fn insert(&self, entity: Entity) -> GatewayResult<Entity>;

    /// Replace an existing document. Fails with `NotFound` if absent.
    async fn replace(&self, entity: Entity) -> GatewayResult<()>;

    /// Delete a document. Fails with `NotFound` if absent.
    async fn remove(&self, key: &EntityKey) -> GatewayResult<()>;

    /// Fetch a document. Fails with `NotFound` if absent.
    async fn fetch(&self, key: &EntityKey) -> GatewayResult<Entity>;

    /// Full scan returning every document matching `filter`
    async fn scan(&self, filter: &EntityFilter) -> GatewayResult<Vec<Entity>>;
}

/// In-memory store, optionally snapshotted to a JSON file after each write
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RwLock<BTreeMap<EntityKey, Entity>>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store backed by a snapshot file, loading it if it exists
    pub fn with_snapshot(path: impl Into<PathBuf>) -> GatewayResult<Self> {
        let path = path.into();
        let mut entities = BTreeMap::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                GatewayError::Internal(format!("failed to read snapshot {}: {}", path.display(), e))
            })?;
            let docs: Vec<Entity> = serde_json::from_str(&content).map_err(|e| {
                GatewayError::Internal(format!("corrupt snapshot {}: {}", path.display(), e))
            })?;
            for doc in docs {
                entities.insert(doc.key(), doc);
            }
            tracing::info!(path = %path.display(), entities = entities.len(), "Loaded store snapshot");
        }

        Ok(Self {
            entities: RwLock::new(entities),
            snapshot: Some(path),
        })
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    fn persist(&self) -> GatewayResult<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let docs: Vec<Entity> = self.entities.read().values().cloned().collect();
        write_snapshot(path, &docs)
    }
}

fn write_snapshot(path: &Path, docs: &[Entity]) -> GatewayResult<()> {
    let json = serde_json::to_vec_pretty(docs)
        .map_err(|e| GatewayError::Internal(format!("failed to encode snapshot: {}", e)))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| {
            GatewayError::Internal(format!("failed to write snapshot {}: {}", path.display(), e))
        })
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn insert(&self, entity: Entity) -> GatewayResult<Entity> {
        let key = entity.key();
        {
            let mut entities = self.entities.write();
            if entities.contains_key(&key) {
                return Err(GatewayError::Duplicate(key.to_string()));
            }
            entities.insert(key, entity.clone());
        }
        self.persist()?;
        Ok(entity)
    }

    async fn replace(&self, entity: Entity) -> GatewayResult<()> {
        let key = entity.key();
        {
            let mut entities = self.entities.write();
            match entities.get_mut(&key) {
                Some(slot) => *slot = entity,
                None => return Err(GatewayError::NotFound(key.to_string())),
            }
        }
        self.persist()
    }

    async fn remove(&self, key: &EntityKey) -> GatewayResult<()> {
        if self.entities.write().remove(key).is_none() {
            return Err(GatewayError::NotFound(key.to_string()));
        }
        self.persist()
    }

    async fn fetch(&self, key: &EntityKey) -> GatewayResult<Entity> {
        self.entities
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(key.to_string()))
    }

    async fn scan(&self, filter: &EntityFilter) -> GatewayResult<Vec<Entity>> {
        Ok(self
            .entities
            .read()
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }
}
