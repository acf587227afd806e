//! Entity field definitions.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use super::field_type::FieldType;
use crate::record::FieldValue;

/// Name of the synthesized identity field.
pub const ID_FIELD: &str = "id";

/// Name of the external identifier column.
pub const UUID_COLUMN: &str = "uuid";

/// Suffix of the column holding a generic reference's target entity.
pub const GENERIC_ENTITY_SUFFIX: &str = "__entity";

/// Suffix of the column holding a generic reference's target row.
pub const GENERIC_REF_SUFFIX: &str = "__ref";

/// Visibility of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldScope {
    /// Visible to API consumers.
    Data,
    /// Framework bookkeeping.
    Meta,
}

impl FieldScope {
    /// Catalog spelling.
    pub fn name(&self) -> &'static str {
        match self {
            FieldScope::Data => "DATA",
            FieldScope::Meta => "META",
        }
    }
}

/// Target of a reference or embedded field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTarget {
    /// Target entity name (uppercase).
    pub entity: String,
    /// Lowercase logical-key field names of the target, sorted.
    pub logical_key: Vec<String>,
}

/// Where a field came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// Contributing module.
    pub module: String,
    /// Interface the field was inherited from, if any.
    pub interface: Option<String>,
}

/// A field of an entity.
#[derive(Debug)]
pub struct EntityField {
    name: String,
    field_type: FieldType,
    scope: FieldScope,
    is_logical_key: bool,
    lk_order: i64,
    entity: String,
    target: Option<FieldTarget>,
    provenance: Provenance,
    id_value: AtomicI64,
}

impl EntityField {
    /// Create a field owned by `entity`.
    pub fn new(
        entity: impl Into<String>,
        name: impl Into<String>,
        field_type: FieldType,
        scope: FieldScope,
        module: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            field_type,
            scope,
            is_logical_key: false,
            lk_order: 0,
            entity: entity.into(),
            target: None,
            provenance: Provenance {
                module: module.into(),
                interface: None,
            },
            id_value: AtomicI64::new(0),
        }
    }

    /// The identity field of `entity`.
    pub fn id(entity: impl Into<String>, module: impl Into<String>) -> Self {
        Self::new(entity, ID_FIELD, FieldType::Pk, FieldScope::Meta, module)
    }

    /// Mark the field as part of the logical key.
    pub fn with_logical_key(mut self, order: i64) -> Self {
        self.is_logical_key = true;
        self.lk_order = order;
        self
    }

    /// Set the reference target.
    pub fn with_target(mut self, target: FieldTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Record the interface the field was inherited from.
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.provenance.interface = Some(interface.into());
        self
    }

    /// Declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercase name used for lookups and as the column name.
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Field kind.
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Field scope.
    pub fn scope(&self) -> FieldScope {
        self.scope
    }

    /// Whether the field is part of the logical key.
    pub fn is_logical_key(&self) -> bool {
        self.is_logical_key
    }

    /// Declared logical-key order.
    pub fn lk_order(&self) -> i64 {
        self.lk_order
    }

    /// Owning entity name.
    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    /// Reference target, for reference and embedded kinds.
    pub fn target(&self) -> Option<&FieldTarget> {
        self.target.as_ref()
    }

    /// Target entity name, for reference and embedded kinds.
    pub fn target_entity(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.entity.as_str())
    }

    /// Contributing module and interface.
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Catalog identity, once the FIELD row is persisted.
    pub fn id_value(&self) -> Option<i64> {
        match self.id_value.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// Store the catalog identity.
    pub fn set_id_value(&self, id: i64) {
        self.id_value.store(id, Ordering::Release);
    }

    /// Whether this is the synthesized identity field.
    pub fn is_id(&self) -> bool {
        self.field_type == FieldType::Pk
    }

    /// Storage column(s) backing the field.
    pub fn columns(&self) -> Vec<String> {
        let key = self.key();
        match self.field_type {
            FieldType::GenericEntityRef => vec![
                format!("{key}{GENERIC_ENTITY_SUFFIX}"),
                format!("{key}{GENERIC_REF_SUFFIX}"),
            ],
            _ => vec![key],
        }
    }

    /// Value a record reports when the field was never set.
    pub fn null_default(&self) -> FieldValue {
        FieldValue::null_default(self.field_type)
    }

    /// Copy of this field re-owned by `entity`.
    pub fn reowned(&self, entity: impl Into<String>) -> Self {
        let mut field = self.clone();
        field.entity = entity.into();
        field.id_value = AtomicI64::new(0);
        field
    }
}

impl Clone for EntityField {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            field_type: self.field_type,
            scope: self.scope,
            is_logical_key: self.is_logical_key,
            lk_order: self.lk_order,
            entity: self.entity.clone(),
            target: self.target.clone(),
            provenance: self.provenance.clone(),
            id_value: AtomicI64::new(self.id_value.load(Ordering::Acquire)),
        }
    }
}

impl PartialEq for EntityField {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
            && self.name.eq_ignore_ascii_case(&other.name)
            && self.field_type == other.field_type
            && self.scope == other.scope
    }
}

impl fmt::Display for EntityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.name)
    }
}
