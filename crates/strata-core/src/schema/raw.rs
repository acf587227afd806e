//! Raw schema and record declarations.
//!
//! These trees are what a schema parser hands the engine. They are plain
//! serde types so modules can also be loaded from JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Minimum length of entity, interface and field names.
pub const MIN_NAME_LEN: usize = 3;

/// Declarations of one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSchema {
    /// Entity declarations.
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    /// Interface declarations.
    #[serde(default)]
    pub interfaces: Vec<RawEntity>,
}

impl RawSchema {
    /// Add an entity declaration.
    pub fn with_entity(mut self, entity: RawEntity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Add an interface declaration.
    pub fn with_interface(mut self, interface: RawEntity) -> Self {
        self.interfaces.push(interface);
        self
    }
}

/// An entity or interface declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntity {
    /// Declared name.
    pub name: String,
    /// Records only exist embedded in other records.
    #[serde(default)]
    pub embedable: bool,
    /// Exactly one record exists.
    #[serde(default)]
    pub one_record: bool,
    /// Tree-shaped entity.
    #[serde(default)]
    pub tree: bool,
    /// Field declarations.
    #[serde(default)]
    pub entries: Vec<RawEntry>,
    /// Implemented interface names.
    #[serde(default)]
    pub implements: Vec<String>,
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntry {
    /// Declared type: a kind, an alias, an entity name or `[Entity]`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Field name.
    pub name: String,
    /// Part of the logical key.
    #[serde(default)]
    pub is_logical_key: bool,
    /// Position in the logical key.
    #[serde(default)]
    pub lk_order: i64,
}

impl RawEntry {
    /// A plain field declaration.
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
            is_logical_key: false,
            lk_order: 0,
        }
    }

    /// A logical-key field declaration.
    pub fn logical_key(type_name: impl Into<String>, name: impl Into<String>, order: i64) -> Self {
        Self {
            is_logical_key: true,
            lk_order: order,
            ..Self::new(type_name, name)
        }
    }
}

/// Validating builder for [`RawEntity`].
#[derive(Debug, Clone)]
pub struct RawEntityBuilder {
    entity: RawEntity,
    lk_count: i64,
}

impl RawEntityBuilder {
    /// Start a declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            entity: RawEntity {
                name: name.into(),
                ..RawEntity::default()
            },
            lk_count: 0,
        }
    }

    /// Mark as embedable.
    pub fn embedable(mut self) -> Self {
        self.entity.embedable = true;
        self
    }

    /// Mark as single-record.
    pub fn one_record(mut self) -> Self {
        self.entity.one_record = true;
        self
    }

    /// Mark as tree.
    pub fn tree(mut self) -> Self {
        self.entity.tree = true;
        self
    }

    /// Add a field.
    pub fn entry(mut self, type_name: impl Into<String>, name: impl Into<String>) -> Self {
        self.entity.entries.push(RawEntry::new(type_name, name));
        self
    }

    /// Add a logical-key field; keys are numbered in declaration order.
    pub fn lk_entry(mut self, type_name: impl Into<String>, name: impl Into<String>) -> Self {
        self.entity
            .entries
            .push(RawEntry::logical_key(type_name, name, self.lk_count));
        self.lk_count += 1;
        self
    }

    /// Declare an implemented interface.
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.entity.implements.push(interface.into());
        self
    }

    /// Validate names and flags.
    pub fn build(self) -> Result<RawEntity> {
        let entity = self.entity;
        validate_name(&entity.name)?;
        for entry in &entity.entries {
            validate_name(&entry.name)?;
        }
        if entity.embedable && entity.one_record {
            return Err(Error::InvalidSchema {
                entity: entity.name,
                reason: "a single record entity cannot be embedable".to_string(),
            });
        }
        Ok(entity)
    }
}

/// Check a name against `^[a-zA-Z0-9_]{3,}$`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.chars().count() < MIN_NAME_LEN {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: format!("must be at least {MIN_NAME_LEN} characters"),
        });
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(Error::InvalidName {
            name: name.to_string(),
            reason: format!("character '{c}' not allowed"),
        });
    }
    Ok(())
}

/// Seed records of one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecords {
    /// Per-entity record batches.
    #[serde(default)]
    pub entities: Vec<RawEntityRecords>,
}

impl RawRecords {
    /// Add the records of one entity.
    pub fn with_entity(mut self, records: RawEntityRecords) -> Self {
        self.entities.push(records);
        self
    }
}

/// Seed records of one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntityRecords {
    /// Entity name.
    pub entity: String,
    /// Template used for the default record.
    #[serde(default)]
    pub default_record: Option<Map<String, Value>>,
    /// Versioned batches, each applied at most once.
    #[serde(default)]
    pub versions: Vec<RawRecordVersion>,
}

impl RawEntityRecords {
    /// Start the records of `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Self::default()
        }
    }

    /// Set the default-record template.
    pub fn with_default_record(mut self, template: Map<String, Value>) -> Self {
        self.default_record = Some(template);
        self
    }

    /// Add a versioned batch.
    pub fn with_version(mut self, version: RawRecordVersion) -> Self {
        self.versions.push(version);
        self
    }
}

/// A named, numbered batch of flat-map records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecordVersion {
    /// Version name.
    pub name: String,
    /// Version number; batches apply in ascending order.
    pub number: i64,
    /// Records as flat maps.
    #[serde(default)]
    pub records: Vec<Map<String, Value>>,
}

impl RawRecordVersion {
    /// Create a batch.
    pub fn new(name: impl Into<String>, number: i64, records: Vec<Map<String, Value>>) -> Self {
        Self {
            name: name.into(),
            number,
            records,
        }
    }
}

/// A schema-declaring unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// Module name.
    pub name: String,
    /// Names of modules this one builds on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether runtime schema changes are accepted.
    #[serde(default)]
    pub editable: bool,
    /// Load order.
    #[serde(default)]
    pub order: i32,
    /// Declarations.
    #[serde(default)]
    pub schema: RawSchema,
    /// Seed records.
    #[serde(default)]
    pub records: RawRecords,
}

impl Module {
    /// Create an empty module.
    pub fn new(name: impl Into<String>, order: i32) -> Self {
        Self {
            name: name.into().to_uppercase(),
            order,
            ..Self::default()
        }
    }

    /// Accept runtime schema changes.
    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }

    /// Declare a dependency.
    pub fn depends_on(mut self, module: impl Into<String>) -> Self {
        self.dependencies.push(module.into());
        self
    }

    /// Set the declarations.
    pub fn with_schema(mut self, schema: RawSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Set the seed records.
    pub fn with_records(mut self, records: RawRecords) -> Self {
        self.records = records;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_numbers_logical_keys() {
        let raw = RawEntityBuilder::new("BOOK")
            .lk_entry("TEXT", "isbn")
            .lk_entry("LONG", "edition")
            .entry("TEXT", "title")
            .build()
            .unwrap();
        let orders: Vec<_> = raw
            .entries
            .iter()
            .filter(|e| e.is_logical_key)
            .map(|e| e.lk_order)
            .collect();
        assert_eq!(orders, vec![0, 1]);
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(
            RawEntityBuilder::new("AB").build(),
            Err(Error::InvalidName { .. })
        ));
        assert!(matches!(
            RawEntityBuilder::new("BOOK").entry("TEXT", "bad-name").build(),
            Err(Error::InvalidName { .. })
        ));
        assert!(validate_name("snake_case_99").is_ok());
    }

    #[test]
    fn test_one_record_cannot_be_embedable() {
        let err = RawEntityBuilder::new("SETTINGS")
            .one_record()
            .embedable()
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_module_from_json() {
        let json = r#"{
            "name": "shop",
            "order": 10,
            "schema": {
                "entities": [
                    {"name": "PRODUCT", "entries": [
                        {"type": "TEXT", "name": "code", "isLogicalKey": true},
                        {"type": "DECIMAL", "name": "price"}
                    ]}
                ]
            },
            "records": {
                "entities": [
                    {"entity": "PRODUCT", "versions": [
                        {"name": "init", "number": 1, "records": [{"code": "p1", "price": 2.5}]}
                    ]}
                ]
            }
        }"#;
        let module: Module = serde_json::from_str(json).unwrap();
        assert_eq!(module.order, 10);
        assert!(!module.editable);
        assert_eq!(module.schema.entities[0].entries[1].type_name, "DECIMAL");
        assert!(module.schema.entities[0].entries[0].is_logical_key);
        assert_eq!(module.records.entities[0].versions[0].records.len(), 1);
    }
}
