//! Entity definitions.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::{Map, Value};

use super::field::{EntityField, FieldScope};
use super::field_type::FieldType;

/// Suffix of the per-entity identity domain.
pub const DOMAIN_SUFFIX: &str = "_pk";

/// Suffix of the logical-key uniqueness constraint.
pub const LOGICAL_KEY_CONSTRAINT_SUFFIX: &str = "_lk";

/// A resolved entity.
#[derive(Debug)]
pub struct Entity {
    name: String,
    module: String,
    embedable: bool,
    one_record: bool,
    tree: bool,
    id_field: EntityField,
    meta_fields: Vec<EntityField>,
    data_fields: Vec<EntityField>,
    logical_key: Vec<String>,
    default_record: Option<Map<String, Value>>,
    id_value: AtomicI64,
}

impl Entity {
    /// Create an entity with no fields. The name is stored uppercase.
    pub fn new(name: &str, module: impl Into<String>) -> Self {
        let name = name.to_uppercase();
        let module = module.into();
        Self {
            id_field: EntityField::id(name.clone(), module.clone()),
            name,
            module,
            embedable: false,
            one_record: false,
            tree: false,
            meta_fields: Vec::new(),
            data_fields: Vec::new(),
            logical_key: Vec::new(),
            default_record: None,
            id_value: AtomicI64::new(0),
        }
    }

    /// Mark the entity as embedable.
    pub fn with_embedable(mut self, embedable: bool) -> Self {
        self.embedable = embedable;
        self
    }

    /// Mark the entity as holding exactly one record.
    pub fn with_one_record(mut self, one_record: bool) -> Self {
        self.one_record = one_record;
        self
    }

    /// Mark the entity as a tree.
    pub fn with_tree(mut self, tree: bool) -> Self {
        self.tree = tree;
        self
    }

    /// Attach a default-record template.
    pub fn with_default_record(mut self, template: Option<Map<String, Value>>) -> Self {
        self.default_record = template;
        self
    }

    /// Add a field, routed by its scope. The logical key is recomputed.
    pub fn with_field(mut self, field: EntityField) -> Self {
        self.push_field(field);
        self
    }

    fn push_field(&mut self, field: EntityField) {
        match field.scope() {
            FieldScope::Meta => self.meta_fields.push(field),
            FieldScope::Data => self.data_fields.push(field),
        }
        self.logical_key = self
            .data_fields
            .iter()
            .filter(|f| f.is_logical_key())
            .map(EntityField::key)
            .collect();
        self.logical_key.sort();
    }

    /// Copy of this entity with one more field.
    pub fn with_added_field(&self, field: EntityField) -> Self {
        let mut entity = self.clone();
        entity.push_field(field);
        entity
    }

    /// Copy of this entity without the named field.
    pub fn without_field(&self, name: &str) -> Self {
        let mut entity = self.clone();
        entity
            .data_fields
            .retain(|f| !f.name().eq_ignore_ascii_case(name));
        entity.logical_key.retain(|k| !k.eq_ignore_ascii_case(name));
        entity
    }

    /// Entity name (uppercase).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning module.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Whether records only exist embedded in other records.
    pub fn is_embedable(&self) -> bool {
        self.embedable
    }

    /// Whether the entity holds exactly one record.
    pub fn is_one_record(&self) -> bool {
        self.one_record
    }

    /// Whether the entity is a tree.
    pub fn is_tree(&self) -> bool {
        self.tree
    }

    /// The synthesized identity field.
    pub fn id_field(&self) -> &EntityField {
        &self.id_field
    }

    /// Meta fields in declaration order.
    pub fn meta_fields(&self) -> &[EntityField] {
        &self.meta_fields
    }

    /// Data fields in declaration order.
    pub fn data_fields(&self) -> &[EntityField] {
        &self.data_fields
    }

    /// Meta then data fields, excluding the identity field.
    pub fn fields(&self) -> impl Iterator<Item = &EntityField> {
        self.meta_fields.iter().chain(self.data_fields.iter())
    }

    /// Look up a field by name, ignoring case. `id` resolves to the identity field.
    pub fn field(&self, name: &str) -> Option<&EntityField> {
        if name.eq_ignore_ascii_case(self.id_field.name()) {
            return Some(&self.id_field);
        }
        self.fields().find(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// Lowercase logical-key field names, sorted.
    pub fn logical_key(&self) -> &[String] {
        &self.logical_key
    }

    /// Logical-key fields in key order.
    pub fn logical_key_fields(&self) -> Vec<&EntityField> {
        self.logical_key
            .iter()
            .filter_map(|name| self.field(name))
            .collect()
    }

    /// Whether the entity declares a logical key.
    pub fn has_logical_key(&self) -> bool {
        !self.logical_key.is_empty()
    }

    /// Data fields that reference or embed another entity.
    pub fn reference_fields(&self) -> impl Iterator<Item = &EntityField> {
        self.data_fields.iter().filter(|f| {
            matches!(
                f.field_type(),
                FieldType::EntityRef
                    | FieldType::EntityEmbedded
                    | FieldType::GenericEntityRef
                    | FieldType::EntityRefArray
            )
        })
    }

    /// Default-record template.
    pub fn default_record(&self) -> Option<&Map<String, Value>> {
        self.default_record.as_ref()
    }

    /// Storage table name.
    pub fn table_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Name of the identity domain other tables reference this entity by.
    pub fn domain_name(&self) -> String {
        domain_name(&self.name)
    }

    /// Name of the logical-key uniqueness constraint.
    pub fn logical_key_constraint(&self) -> String {
        format!("{}{LOGICAL_KEY_CONSTRAINT_SUFFIX}", self.table_name())
    }

    /// Catalog identity, once the ENTITY row is persisted.
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
}

/// Domain name for an entity name.
pub fn domain_name(entity: &str) -> String {
    format!("{}{DOMAIN_SUFFIX}", entity.to_lowercase())
}

impl Clone for Entity {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            module: self.module.clone(),
            embedable: self.embedable,
            one_record: self.one_record,
            tree: self.tree,
            id_field: self.id_field.clone(),
            meta_fields: self.meta_fields.clone(),
            data_fields: self.data_fields.clone(),
            logical_key: self.logical_key.clone(),
            default_record: self.default_record.clone(),
            id_value: AtomicI64::new(self.id_value.load(Ordering::Acquire)),
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.module == other.module && self.name == other.name && self.embedable == other.embedable
    }
}

impl Eq for Entity {}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Entity {
        Entity::new("doc", "APP")
            .with_field(
                EntityField::new("DOC", "Title", FieldType::Text, FieldScope::Data, "APP")
                    .with_logical_key(1),
            )
            .with_field(
                EntityField::new("DOC", "Code", FieldType::Long, FieldScope::Data, "APP")
                    .with_logical_key(0),
            )
            .with_field(EntityField::new(
                "DOC",
                "created",
                FieldType::DateTime,
                FieldScope::Meta,
                "CORE",
            ))
    }

    #[test]
    fn test_name_uppercase() {
        let entity = doc();
        assert_eq!(entity.name(), "DOC");
        assert_eq!(entity.table_name(), "doc");
        assert_eq!(entity.domain_name(), "doc_pk");
        assert_eq!(entity.logical_key_constraint(), "doc_lk");
    }

    #[test]
    fn test_logical_key_sorted_by_lowercase_name() {
        let entity = doc();
        assert_eq!(entity.logical_key(), &["code".to_string(), "title".to_string()]);
    }

    #[test]
    fn test_field_lookup() {
        let entity = doc();
        assert!(entity.field("TITLE").is_some());
        assert!(entity.field("Created").is_some());
        assert!(entity.field("ID").is_some_and(|f| f.is_id()));
        assert!(entity.field("missing").is_none());
        assert_eq!(entity.fields().count(), 3);
    }

    #[test]
    fn test_equality() {
        let a = Entity::new("doc", "APP");
        let b = Entity::new("DOC", "APP").with_field(EntityField::new(
            "DOC",
            "x",
            FieldType::Text,
            FieldScope::Data,
            "APP",
        ));
        assert_eq!(a, b);
        assert_ne!(a, Entity::new("doc", "APP").with_embedable(true));
        assert_ne!(a, Entity::new("doc", "OTHER"));
    }

    #[test]
    fn test_copy_on_write_field_changes() {
        let entity = doc();
        let added = entity.with_added_field(EntityField::new(
            "DOC",
            "extra",
            FieldType::Bool,
            FieldScope::Data,
            "RUNTIME",
        ));
        assert!(entity.field("extra").is_none());
        assert!(added.field("extra").is_some());
        let removed = added.without_field("title");
        assert_eq!(removed.logical_key(), &["code".to_string()]);
    }
}
