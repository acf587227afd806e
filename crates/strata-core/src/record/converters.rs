//! Conversion between records and flat JSON maps.

use std::sync::Arc;

use serde_json::{Map, Number, Value};
use tracing::debug;

use super::entity_record::EntityRecord;
use super::reference::{EntityReferenceRecord, LogicalKeyValue};
use super::value::{reference_from_value, FieldValue, DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT};
use crate::error::{Error, Result};
use crate::schema::field::{ID_FIELD, UUID_COLUMN};
use crate::schema::{Entity, EntityField, FieldType, SchemaRegistry};

/// Key of a generic reference's target entity.
pub const GENERIC_ENTITY_KEY: &str = "entity";

/// Key of a generic reference's target logical key.
pub const GENERIC_REF_KEY: &str = "ref";

/// Build a record from a flat map. Unknown keys are ignored.
pub fn from_flat_map(
    entity: Arc<Entity>,
    map: &Map<String, Value>,
    registry: &SchemaRegistry,
) -> Result<EntityRecord> {
    let mut record = EntityRecord::new(Arc::clone(&entity));
    for (key, json) in map {
        let Some(field) = entity.field(key) else {
            debug!(entity = %entity.name(), key = %key, "ignoring unknown key");
            continue;
        };
        let value = json_to_value(field, json, registry)?;
        record.put(key, value)?;
    }
    Ok(record)
}

/// Convert a JSON value for `field`.
pub fn json_to_value(
    field: &EntityField,
    json: &Value,
    registry: &SchemaRegistry,
) -> Result<FieldValue> {
    if json.is_null() {
        return Ok(FieldValue::Null);
    }
    let invalid = || Error::InvalidFieldValue {
        entity: field.entity_name().to_string(),
        field: field.name().to_string(),
        value: json.to_string(),
    };

    let value = match field.field_type() {
        FieldType::Pk => FieldValue::Id(json.as_i64().ok_or_else(invalid)?),
        FieldType::Password => match json {
            Value::String(plain) => FieldValue::Text(plain.clone()),
            _ => return Err(invalid()),
        },
        FieldType::Text | FieldType::TranslText => match json {
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Number(n) => FieldValue::Text(n.to_string()),
            Value::Bool(b) => FieldValue::Text(b.to_string()),
            _ => return Err(invalid()),
        },
        FieldType::EntityEmbedded => {
            let Value::Object(map) = json else {
                return Err(invalid());
            };
            let target = target_entity(field, registry)?;
            FieldValue::Embedded(Box::new(from_flat_map(target, map, registry)?))
        }
        FieldType::GenericEntityRef => {
            let Value::Object(map) = json else {
                return Err(invalid());
            };
            if map.is_empty() {
                return Ok(FieldValue::Reference(EntityReferenceRecord::NO_REFERENCE));
            }
            let name = map
                .get(GENERIC_ENTITY_KEY)
                .and_then(Value::as_str)
                .ok_or_else(invalid)?;
            let target = registry.get(name).ok_or_else(|| Error::EntityNotFound {
                entity: name.to_string(),
            })?;
            let key = logical_key_from_json(&target, map.get(GENERIC_REF_KEY).unwrap_or(&Value::Null))?;
            FieldValue::Reference(EntityReferenceRecord::by_logical_key(target.name(), key))
        }
        FieldType::EntityRefArray => {
            let Value::Array(items) = json else {
                return Err(invalid());
            };
            FieldValue::ReferenceArray(
                items
                    .iter()
                    .map(|item| reference_from_value(field, FieldValue::from_json(item)))
                    .collect::<Result<_>>()?,
            )
        }
        _ => FieldValue::from_json(json),
    };
    Ok(value)
}

fn target_entity(field: &EntityField, registry: &SchemaRegistry) -> Result<Arc<Entity>> {
    let name = field.target_entity().unwrap_or_default();
    registry.get(name).ok_or_else(|| Error::EntityNotFound {
        entity: name.to_string(),
    })
}

/// Parse a logical key given as a scalar (single-column keys) or a map.
pub fn logical_key_from_json(entity: &Entity, json: &Value) -> Result<LogicalKeyValue> {
    let fields = entity.logical_key_fields();
    let invalid = || Error::InvalidFieldValue {
        entity: entity.name().to_string(),
        field: entity.logical_key().join(","),
        value: json.to_string(),
    };

    let mut key = LogicalKeyValue::new();
    match (json, fields.as_slice()) {
        (Value::Object(map), _) => {
            for field in &fields {
                let piece = map
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(field.name()))
                    .map(|(_, v)| v)
                    .ok_or_else(invalid)?;
                key.insert(field.key(), FieldValue::from_json(piece).coerce_for(field)?);
            }
        }
        (scalar, [field]) if !scalar.is_null() && !scalar.is_array() => {
            key.insert(field.key(), FieldValue::from_json(scalar).coerce_for(field)?);
        }
        _ => return Err(invalid()),
    }
    Ok(key)
}

/// Convert data fields to a flat map keyed by declared field name.
pub fn to_flat_map(record: &EntityRecord) -> Map<String, Value> {
    let mut map = Map::new();
    for field in record.entity().data_fields() {
        if let Some(json) = value_to_json(field, &record.value_of(field)) {
            map.insert(field.name().to_string(), json);
        }
    }
    map
}

/// Like [`to_flat_map`] but with identity, external identifier and meta fields.
pub fn to_flat_map_with_meta(record: &EntityRecord) -> Map<String, Value> {
    let mut map = to_flat_map(record);
    if let Some(id) = record.id() {
        map.insert(ID_FIELD.to_string(), Value::from(id));
    }
    if let Some(uuid) = record.uuid() {
        map.insert(UUID_COLUMN.to_string(), Value::from(uuid));
    }
    for field in record.entity().meta_fields() {
        if let Some(json) = value_to_json(field, &record.value_of(field)) {
            map.insert(field.name().to_string(), json);
        }
    }
    map
}

/// Convert a value of `field` to JSON. Passwords yield `None`.
pub fn value_to_json(field: &EntityField, value: &FieldValue) -> Option<Value> {
    match (field.field_type(), value) {
        (FieldType::Password, _) => None,
        (FieldType::GenericEntityRef, FieldValue::Reference(r)) => {
            if r.is_no_reference() {
                return Some(Value::Object(Map::new()));
            }
            let mut map = Map::new();
            map.insert(GENERIC_ENTITY_KEY.to_string(), Value::from(r.entity()));
            map.insert(GENERIC_REF_KEY.to_string(), reference_json(r));
            Some(Value::Object(map))
        }
        (
            FieldType::EntityRef | FieldType::GenericEntityRef,
            FieldValue::Null,
        ) => Some(Value::Object(Map::new())),
        _ => Some(plain_json(value)),
    }
}

/// JSON of a value without field context.
pub fn plain_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Id(0) => Value::Null,
        FieldValue::Id(id) => Value::from(*id),
        FieldValue::Text(s) => Value::from(s.as_str()),
        FieldValue::Number(n) => Value::Number(n.clone()),
        FieldValue::Long(v) => Value::from(*v),
        FieldValue::Double(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
        FieldValue::Bool(b) => Value::from(*b),
        FieldValue::Time(t) => Value::from(t.format(TIME_FORMAT).to_string()),
        FieldValue::Date(d) => Value::from(d.format(DATE_FORMAT).to_string()),
        FieldValue::DateTime(dt) => Value::from(dt.format(DATETIME_FORMAT).to_string()),
        FieldValue::TextArray(items) => Value::from(items.clone()),
        FieldValue::Record(map) => Value::Object(map.clone()),
        FieldValue::Password(_) => Value::Null,
        FieldValue::Reference(r) => reference_json(r),
        FieldValue::Embedded(record) => Value::Object(to_flat_map(record)),
        FieldValue::ReferenceArray(items) => {
            Value::Array(items.iter().map(reference_json).collect())
        }
    }
}

/// JSON of a reference: its logical key as a scalar when the key has one
/// column, as a map otherwise, and `{}` for `NO_REFERENCE`.
pub fn reference_json(reference: &EntityReferenceRecord) -> Value {
    if reference.is_no_reference() {
        return Value::Object(Map::new());
    }
    match reference.logical_key() {
        Some(key) if key.len() == 1 => key
            .iter()
            .next()
            .map_or(Value::Null, |(_, value)| plain_json(value)),
        Some(key) => Value::Object(
            key.iter()
                .map(|(field, value)| (field.clone(), plain_json(value)))
                .collect(),
        ),
        None => reference.primary_key().map_or(Value::Null, Value::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldScope, FieldTarget, ModuleInfo};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let address = Entity::new("ADDRESS", "APP")
            .with_embedable(true)
            .with_field(EntityField::new(
                "ADDRESS",
                "street",
                FieldType::Text,
                FieldScope::Data,
                "APP",
            ));
        let person = Entity::new("PERSON", "APP")
            .with_field(
                EntityField::new("PERSON", "name", FieldType::Text, FieldScope::Data, "APP")
                    .with_logical_key(0),
            )
            .with_field(EntityField::new(
                "PERSON",
                "birth",
                FieldType::Date,
                FieldScope::Data,
                "APP",
            ))
            .with_field(EntityField::new(
                "PERSON",
                "secret",
                FieldType::Password,
                FieldScope::Data,
                "APP",
            ))
            .with_field(
                EntityField::new(
                    "PERSON",
                    "home",
                    FieldType::EntityEmbedded,
                    FieldScope::Data,
                    "APP",
                )
                .with_target(FieldTarget {
                    entity: "ADDRESS".into(),
                    logical_key: vec![],
                }),
            )
            .with_field(
                EntityField::new(
                    "PERSON",
                    "parent",
                    FieldType::EntityRef,
                    FieldScope::Data,
                    "APP",
                )
                .with_target(FieldTarget {
                    entity: "PERSON".into(),
                    logical_key: vec!["name".into()],
                }),
            )
            .with_field(EntityField::new(
                "PERSON",
                "owner",
                FieldType::GenericEntityRef,
                FieldScope::Data,
                "APP",
            ));
        let registry = SchemaRegistry::new();
        registry.load(
            vec![address, person],
            vec![ModuleInfo {
                name: "APP".into(),
                editable: false,
                order: 1,
            }],
        );
        registry
    }

    #[test]
    fn test_flat_map_round_trip() {
        let registry = registry();
        let person = registry.get("PERSON").unwrap();
        let input = json!({
            "NAME": "ann",
            "birth": "1990-05-06",
            "secret": "pw",
            "home": {"street": "Main"},
            "parent": "bob",
            "owner": {"entity": "PERSON", "ref": "carl"},
            "ignored": 1
        });
        let record = from_flat_map(person, input.as_object().unwrap(), &registry).unwrap();
        let out = Value::Object(to_flat_map(&record));
        assert_eq!(
            out,
            json!({
                "name": "ann",
                "birth": "1990-05-06",
                "home": {"street": "Main"},
                "parent": "bob",
                "owner": {"entity": "PERSON", "ref": "carl"}
            })
        );
    }

    #[test]
    fn test_no_reference_serializes_empty() {
        let registry = registry();
        let person = registry.get("PERSON").unwrap();
        let record = EntityRecord::new(person);
        let out = to_flat_map(&record);
        assert_eq!(out.get("parent"), Some(&json!({})));
        assert_eq!(out.get("owner"), Some(&json!({})));
        assert_eq!(out.get("birth"), Some(&Value::Null));
        assert!(out.get("secret").is_none());
    }

    #[test]
    fn test_logical_key_from_json() {
        let registry = registry();
        let person = registry.get("PERSON").unwrap();
        let key = logical_key_from_json(&person, &json!("ann")).unwrap();
        assert_eq!(key.to_string(), "name=ann");
        let key = logical_key_from_json(&person, &json!({"NAME": "ann"})).unwrap();
        assert_eq!(key.to_string(), "name=ann");
        assert!(logical_key_from_json(&person, &json!({"other": 1})).is_err());
    }

    #[test]
    fn test_meta_map_includes_id() {
        let registry = registry();
        let person = registry.get("PERSON").unwrap();
        let record = EntityRecord::new(person)
            .with("name", "ann")
            .unwrap()
            .with("id", FieldValue::Id(3))
            .unwrap();
        let out = to_flat_map_with_meta(&record);
        assert_eq!(out.get("id"), Some(&json!(3)));
    }
}
