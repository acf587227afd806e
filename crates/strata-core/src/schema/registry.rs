//! In-memory schema registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::entity::Entity;
use super::field::EntityField;
use super::field_type::FieldType;

/// Loaded module summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Module name (uppercase).
    pub name: String,
    /// Whether runtime schema changes are accepted.
    pub editable: bool,
    /// Load order.
    pub order: i32,
}

/// Registry of resolved entities.
///
/// Readers take cheap snapshots of `Arc<Entity>`. Runtime schema changes
/// replace the entity under the write lock once their transaction commits.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entities: RwLock<HashMap<String, Arc<Entity>>>,
    modules: RwLock<Vec<ModuleInfo>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole content.
    pub fn load(&self, entities: Vec<Entity>, modules: Vec<ModuleInfo>) {
        let map = entities
            .into_iter()
            .map(|e| (e.name().to_string(), Arc::new(e)))
            .collect();
        *self.entities.write() = map;
        *self.modules.write() = modules;
    }

    /// Look up an entity by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<Arc<Entity>> {
        self.entities.read().get(&name.to_uppercase()).cloned()
    }

    /// Whether the entity exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entities.read().contains_key(&name.to_uppercase())
    }

    /// All entities sorted by name.
    pub fn all(&self) -> Vec<Arc<Entity>> {
        let mut all: Vec<_> = self.entities.read().values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Entity whose catalog identity is `id`.
    pub fn entity_by_id(&self, id: i64) -> Option<Arc<Entity>> {
        self.entities
            .read()
            .values()
            .find(|e| e.id_value() == Some(id))
            .cloned()
    }

    /// Fields of any entity that may point at `target`.
    ///
    /// Includes every generic reference, which can point anywhere.
    pub fn reference_fields_to(&self, target: &str) -> Vec<(Arc<Entity>, EntityField)> {
        let target = target.to_uppercase();
        let mut out = Vec::new();
        for entity in self.all() {
            for field in entity.data_fields() {
                let matches = match field.field_type() {
                    FieldType::EntityRef | FieldType::EntityRefArray => {
                        field.target_entity() == Some(target.as_str())
                    }
                    FieldType::GenericEntityRef => true,
                    _ => false,
                };
                if matches {
                    out.push((Arc::clone(&entity), field.clone()));
                }
            }
        }
        out
    }

    /// Insert or replace an entity.
    pub fn publish(&self, entity: Entity) -> Arc<Entity> {
        let entity = Arc::new(entity);
        info!(entity = %entity.name(), "entity published");
        self.entities
            .write()
            .insert(entity.name().to_string(), Arc::clone(&entity));
        entity
    }

    /// Remove an entity.
    pub fn remove(&self, name: &str) -> Option<Arc<Entity>> {
        let removed = self.entities.write().remove(&name.to_uppercase());
        if removed.is_some() {
            info!(entity = %name, "entity removed");
        }
        removed
    }

    /// Look up a module by name, ignoring case.
    pub fn module(&self, name: &str) -> Option<ModuleInfo> {
        self.modules
            .read()
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Modules in load order.
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.modules.read().clone()
    }
}
