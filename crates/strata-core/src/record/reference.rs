//! References between records.

use std::collections::BTreeMap;
use std::fmt;

use super::entity_record::EntityRecord;
use super::value::FieldValue;

/// Identity value meaning "no reference".
pub const NO_REFERENCE_ID: i64 = 0;

/// Projection of a record onto its entity's logical key, keyed by
/// lowercase field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogicalKeyValue(BTreeMap<String, FieldValue>);

impl LogicalKeyValue {
    /// Create an empty key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Key made of a single field.
    pub fn single(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let mut key = Self::new();
        key.insert(field, value);
        key
    }

    /// Add a key piece.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(field.into().to_lowercase(), value.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Key piece by field name, ignoring case.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(&field.to_lowercase())
    }

    /// Pieces in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    /// Number of pieces.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key has no pieces.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, FieldValue)> for LogicalKeyValue {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        let mut key = Self::new();
        for (field, value) in iter {
            key.insert(field, value);
        }
        key
    }
}

impl IntoIterator for LogicalKeyValue {
    type Item = (String, FieldValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for LogicalKeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}={value}")?;
        }
        Ok(())
    }
}

/// A pointer to a record of another entity.
///
/// Carries a primary key, a logical-key projection, or both. A reference
/// with neither is unresolved. [`NO_REFERENCE`](Self::NO_REFERENCE) marks an
/// explicitly absent reference.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityReferenceRecord {
    entity: String,
    primary_key: Option<i64>,
    logical_key: Option<LogicalKeyValue>,
    record: Option<Box<EntityRecord>>,
}

impl EntityReferenceRecord {
    /// The explicitly absent reference.
    pub const NO_REFERENCE: EntityReferenceRecord = EntityReferenceRecord {
        entity: String::new(),
        primary_key: Some(NO_REFERENCE_ID),
        logical_key: None,
        record: None,
    };

    /// Reference by storage identity.
    pub fn by_id(entity: impl Into<String>, id: i64) -> Self {
        if id == NO_REFERENCE_ID {
            return Self::NO_REFERENCE;
        }
        Self {
            entity: entity.into().to_uppercase(),
            primary_key: Some(id),
            logical_key: None,
            record: None,
        }
    }

    /// Reference by logical key.
    pub fn by_logical_key(entity: impl Into<String>, key: LogicalKeyValue) -> Self {
        Self {
            entity: entity.into().to_uppercase(),
            primary_key: None,
            logical_key: Some(key),
            record: None,
        }
    }

    /// Resolved reference carrying both identity and logical key.
    pub fn resolved(entity: impl Into<String>, id: i64, key: LogicalKeyValue) -> Self {
        Self {
            entity: entity.into().to_uppercase(),
            primary_key: Some(id),
            logical_key: Some(key),
            record: None,
        }
    }

    /// Reference to a materialized record.
    pub fn from_record(record: EntityRecord) -> Self {
        Self {
            entity: record.entity().name().to_string(),
            primary_key: record.id(),
            logical_key: Some(record.logical_key_value()),
            record: Some(Box::new(record)),
        }
    }

    /// Same reference, retargeted.
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        if !self.is_no_reference() {
            self.entity = entity.into().to_uppercase();
        }
        self
    }

    /// Target entity name. Empty for `NO_REFERENCE`.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Storage identity, if known.
    pub fn primary_key(&self) -> Option<i64> {
        self.primary_key
    }

    /// Logical-key projection, if known.
    pub fn logical_key(&self) -> Option<&LogicalKeyValue> {
        self.logical_key.as_ref()
    }

    /// Materialized record, if loaded.
    pub fn record(&self) -> Option<&EntityRecord> {
        self.record.as_deref()
    }

    /// Whether this is the `NO_REFERENCE` sentinel.
    pub fn is_no_reference(&self) -> bool {
        self.primary_key == Some(NO_REFERENCE_ID)
    }

    /// Whether the storage identity is known.
    pub fn is_resolved(&self) -> bool {
        self.primary_key.is_some()
    }
}

impl fmt::Display for EntityReferenceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_no_reference() {
            return f.write_str("NO_REFERENCE");
        }
        match (&self.logical_key, self.primary_key) {
            (Some(key), _) => write!(f, "{}({key})", self.entity),
            (None, Some(id)) => write!(f, "{}#{id}", self.entity),
            (None, None) => write!(f, "{}(?)", self.entity),
        }
    }
}
