//! Dynamically typed records.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::reference::LogicalKeyValue;
use super::value::FieldValue;
use crate::error::{Error, Result};
use crate::schema::field::ID_FIELD;
use crate::schema::{Entity, EntityField};

/// A record of an entity.
///
/// Values are keyed by lowercase field name. Fields set through
/// [`put`](Self::put) or [`set`](Self::set) are tracked as modified so
/// updates only write what the caller touched.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    entity: Arc<Entity>,
    values: BTreeMap<String, FieldValue>,
    modified: BTreeSet<String>,
    uuid: Option<String>,
}

impl EntityRecord {
    /// Create an empty record.
    pub fn new(entity: Arc<Entity>) -> Self {
        Self {
            entity,
            values: BTreeMap::new(),
            modified: BTreeSet::new(),
            uuid: None,
        }
    }

    /// The record's entity.
    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    /// Set a field. Unknown fields are ignored and reported as `false`.
    pub fn put(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<bool> {
        let Some(field) = self.entity.field(name) else {
            return Ok(false);
        };
        let key = field.key();
        let value = value.into().coerce_for(field)?;
        self.values.insert(key.clone(), value);
        self.modified.insert(key);
        Ok(true)
    }

    /// Set a field, failing on unknown fields.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<()> {
        if self.put(name, value)? {
            Ok(())
        } else {
            Err(Error::FieldNotFound {
                entity: self.entity.name().to_string(),
                field: name.to_string(),
            })
        }
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Stored value, without defaults.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(&name.to_lowercase())
    }

    /// Value of a known field, with the kind default when unset or null.
    pub fn value(&self, name: &str) -> Option<FieldValue> {
        let field = self.entity.field(name)?;
        Some(self.value_of(field))
    }

    pub(crate) fn value_of(&self, field: &EntityField) -> FieldValue {
        match self.values.get(&field.key()) {
            Some(value) if !value.is_null() => value.clone(),
            _ => field.null_default(),
        }
    }

    /// Storage identity, once persisted.
    pub fn id(&self) -> Option<i64> {
        match self.values.get(ID_FIELD) {
            Some(FieldValue::Id(id)) if *id > 0 => Some(*id),
            _ => None,
        }
    }

    /// External identifier, once persisted.
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub(crate) fn set_uuid(&mut self, uuid: Option<String>) {
        self.uuid = uuid;
    }

    /// Projection onto the entity's logical key, with defaults for unset pieces.
    pub fn logical_key_value(&self) -> LogicalKeyValue {
        self.entity
            .logical_key_fields()
            .into_iter()
            .map(|field| (field.key(), self.value_of(field)))
            .collect()
    }

    /// Whether the caller set the field.
    pub fn is_modified(&self, name: &str) -> bool {
        self.modified.contains(&name.to_lowercase())
    }

    /// Fields the caller set, excluding the identity, in name order.
    pub fn modified_values(&self) -> Vec<(&EntityField, &FieldValue)> {
        self.modified
            .iter()
            .filter(|key| key.as_str() != ID_FIELD)
            .filter_map(|key| {
                let field = self.entity.field(key)?;
                let value = self.values.get(key)?;
                Some((field, value))
            })
            .collect()
    }

    /// Every meta and data field with its value or default, in name order.
    pub fn all_values(&self) -> Vec<(&EntityField, FieldValue)> {
        let mut all: Vec<_> = self
            .entity
            .fields()
            .map(|field| (field, self.value_of(field)))
            .collect();
        all.sort_by_key(|(field, _)| field.key());
        all
    }

    /// Copy `other`'s modified fields into this record.
    ///
    /// An embedded record without identity is merged into the embedded
    /// record already held here, keeping its identity.
    pub fn update(&mut self, other: &EntityRecord) -> Result<()> {
        for (field, value) in other.modified_values() {
            let key = field.key();
            let merged = match (self.values.get_mut(&key), value) {
                (Some(FieldValue::Embedded(current)), FieldValue::Embedded(incoming))
                    if incoming.id().is_none() =>
                {
                    current.update(incoming)?;
                    true
                }
                _ => false,
            };
            if !merged {
                self.values.insert(key.clone(), value.clone());
            }
            self.modified.insert(key);
        }
        Ok(())
    }

    /// Load a value read from storage without marking it modified.
    pub(crate) fn load(&mut self, field: &EntityField, value: FieldValue) {
        self.values.insert(field.key(), value);
    }

    /// Forget which fields were set.
    pub(crate) fn clear_modified(&mut self) {
        self.modified.clear();
    }
}

impl PartialEq for EntityRecord {
    fn eq(&self, other: &Self) -> bool {
        self.entity.name() == other.entity.name() && self.values == other.values
    }
}
