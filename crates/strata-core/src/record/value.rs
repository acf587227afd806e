//! Typed field values.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::entity_record::EntityRecord;
use super::reference::{EntityReferenceRecord, LogicalKeyValue};
use crate::error::{Error, Result};
use crate::schema::{EntityField, FieldType};

/// Textual pattern of DATE values.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Textual pattern of TIME values.
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Textual pattern of DATETIME values.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A hashed secret. Only the hash is ever stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Password {
    hash: String,
}

impl Password {
    /// Hash a plain-text secret.
    pub fn from_plain(plain: &str) -> Self {
        Self {
            hash: blake3::hash(plain.as_bytes()).to_hex().to_string(),
        }
    }

    /// Wrap an existing hash.
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    /// The hex hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Check a plain-text candidate.
    pub fn verify(&self, plain: &str) -> bool {
        Self::from_plain(plain).hash == self.hash
    }
}

/// A field value, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Absent value.
    Null,
    /// Storage identity.
    Id(i64),
    /// Text or translatable text.
    Text(String),
    /// Arbitrary precision number.
    Number(Number),
    /// 64-bit integer.
    Long(i64),
    /// 64-bit float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// Time of day.
    Time(NaiveTime),
    /// Calendar date.
    Date(NaiveDate),
    /// Date and time.
    DateTime(NaiveDateTime),
    /// Text array.
    TextArray(Vec<String>),
    /// Opaque JSON object.
    Record(Map<String, Value>),
    /// Hashed secret.
    Password(Password),
    /// Reference to another record (fixed or generic target).
    Reference(EntityReferenceRecord),
    /// Embedded record.
    Embedded(Box<EntityRecord>),
    /// Array of references.
    ReferenceArray(Vec<EntityReferenceRecord>),
}

impl FieldValue {
    /// Value reported for a field that was never set.
    pub fn null_default(kind: FieldType) -> FieldValue {
        match kind {
            FieldType::Pk => FieldValue::Id(0),
            FieldType::Text | FieldType::TranslText => FieldValue::Text(String::new()),
            FieldType::Number => FieldValue::Number(Number::from(0)),
            FieldType::Long => FieldValue::Long(0),
            FieldType::Double => FieldValue::Double(0.0),
            FieldType::Bool => FieldValue::Bool(false),
            FieldType::Time | FieldType::Date | FieldType::DateTime => FieldValue::Null,
            FieldType::TextArray => FieldValue::TextArray(Vec::new()),
            FieldType::Record => FieldValue::Record(Map::new()),
            FieldType::EntityRef | FieldType::GenericEntityRef => {
                FieldValue::Reference(EntityReferenceRecord::NO_REFERENCE)
            }
            FieldType::EntityEmbedded => FieldValue::Null,
            FieldType::EntityRefArray => FieldValue::ReferenceArray(Vec::new()),
            FieldType::Password => FieldValue::Null,
        }
    }

    /// Whether the value is [`FieldValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Text content, if the value is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content of id and long values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Id(v) | FieldValue::Long(v) => Some(*v),
            FieldValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Boolean content.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Reference content.
    pub fn as_reference(&self) -> Option<&EntityReferenceRecord> {
        match self {
            FieldValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Untyped conversion from JSON. Objects become records.
    pub fn from_json(value: &Value) -> FieldValue {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Long(i),
                None => FieldValue::Number(n.clone()),
            },
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Array(items) => FieldValue::TextArray(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::Object(map) => FieldValue::Record(map.clone()),
        }
    }

    /// Parse text into a value of `kind`. Only scalar kinds are parseable.
    pub fn parse_text(kind: FieldType, text: &str) -> Option<FieldValue> {
        match kind {
            FieldType::Pk => text.parse().ok().map(FieldValue::Id),
            FieldType::Text | FieldType::TranslText => Some(FieldValue::Text(text.to_string())),
            FieldType::Number => text.trim().parse::<Number>().ok().map(FieldValue::Number),
            FieldType::Long => text.trim().parse().ok().map(FieldValue::Long),
            FieldType::Double => text.trim().parse().ok().map(FieldValue::Double),
            FieldType::Bool => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(FieldValue::Bool(true)),
                "false" | "0" => Some(FieldValue::Bool(false)),
                _ => None,
            },
            FieldType::Time => parse_time(text).map(FieldValue::Time),
            FieldType::Date => NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
                .ok()
                .map(FieldValue::Date),
            FieldType::DateTime => parse_datetime(text).map(FieldValue::DateTime),
            FieldType::Password => Some(FieldValue::Password(Password::from_plain(text))),
            FieldType::TextArray
            | FieldType::Record
            | FieldType::EntityRef
            | FieldType::EntityEmbedded
            | FieldType::GenericEntityRef
            | FieldType::EntityRefArray => None,
        }
    }

    /// Convert the value to the kind of `field`.
    pub fn coerce_for(self, field: &EntityField) -> Result<FieldValue> {
        if self.is_null() {
            return Ok(self);
        }
        let invalid = |value: &FieldValue| Error::InvalidFieldValue {
            entity: field.entity_name().to_string(),
            field: field.name().to_string(),
            value: value.to_string(),
        };

        let kind = field.field_type();
        let coerced = match (kind, self) {
            (FieldType::Pk, FieldValue::Id(v) | FieldValue::Long(v)) => FieldValue::Id(v),
            (FieldType::Text | FieldType::TranslText, FieldValue::Text(s)) => FieldValue::Text(s),
            (FieldType::Number, FieldValue::Number(n)) => FieldValue::Number(n),
            (FieldType::Number, FieldValue::Long(v)) => FieldValue::Number(Number::from(v)),
            (FieldType::Number, FieldValue::Double(v)) => match Number::from_f64(v) {
                Some(n) => FieldValue::Number(n),
                None => return Err(invalid(&FieldValue::Double(v))),
            },
            (FieldType::Long, FieldValue::Long(v)) => FieldValue::Long(v),
            (FieldType::Long, FieldValue::Number(n)) => match n.as_i64() {
                Some(v) => FieldValue::Long(v),
                None => return Err(invalid(&FieldValue::Number(n))),
            },
            (FieldType::Double, FieldValue::Double(v)) => FieldValue::Double(v),
            (FieldType::Double, FieldValue::Long(v)) => FieldValue::Double(v as f64),
            (FieldType::Double, FieldValue::Number(n)) => match n.as_f64() {
                Some(v) => FieldValue::Double(v),
                None => return Err(invalid(&FieldValue::Number(n))),
            },
            (FieldType::Bool, FieldValue::Bool(b)) => FieldValue::Bool(b),
            (FieldType::Time, FieldValue::Time(t)) => FieldValue::Time(t),
            (FieldType::Date, FieldValue::Date(d)) => FieldValue::Date(d),
            (FieldType::DateTime, FieldValue::DateTime(dt)) => FieldValue::DateTime(dt),
            (FieldType::TextArray, FieldValue::TextArray(items)) => FieldValue::TextArray(items),
            (FieldType::Record, FieldValue::Record(map)) => FieldValue::Record(map),
            (FieldType::Password, FieldValue::Password(p)) => FieldValue::Password(p),
            (FieldType::EntityRef, value) => {
                FieldValue::Reference(reference_from_value(field, value)?)
            }
            (FieldType::GenericEntityRef, FieldValue::Reference(r))
                if r.is_no_reference() || !r.entity().is_empty() =>
            {
                FieldValue::Reference(r)
            }
            (FieldType::GenericEntityRef, FieldValue::Record(map)) if map.is_empty() => {
                FieldValue::Reference(EntityReferenceRecord::NO_REFERENCE)
            }
            (FieldType::EntityEmbedded, FieldValue::Embedded(record))
                if Some(record.entity().name()) == field.target_entity() =>
            {
                FieldValue::Embedded(record)
            }
            (FieldType::EntityRefArray, FieldValue::ReferenceArray(items)) => {
                FieldValue::ReferenceArray(
                    items
                        .into_iter()
                        .map(|r| reference_from_value(field, FieldValue::Reference(r)))
                        .collect::<Result<_>>()?,
                )
            }
            (FieldType::EntityRefArray, FieldValue::TextArray(items)) => FieldValue::ReferenceArray(
                items
                    .into_iter()
                    .map(|s| reference_from_value(field, FieldValue::Text(s)))
                    .collect::<Result<_>>()?,
            ),
            // Text is accepted for every parseable kind.
            (kind, FieldValue::Text(s)) => match FieldValue::parse_text(kind, &s) {
                Some(v) => v,
                None => return Err(invalid(&FieldValue::Text(s))),
            },
            (_, other) => return Err(invalid(&other)),
        };
        Ok(coerced)
    }
}

/// Build a reference to the target of `field` from a loosely typed value.
///
/// Scalars are taken as a single-column logical key, JSON objects as a
/// multi-column one, and an empty object as `NO_REFERENCE`.
pub(crate) fn reference_from_value(
    field: &EntityField,
    value: FieldValue,
) -> Result<EntityReferenceRecord> {
    let Some(target) = field.target() else {
        return Err(Error::Inconsistent(format!(
            "reference field {field} has no target entity"
        )));
    };
    let invalid = |value: &FieldValue| Error::InvalidFieldValue {
        entity: field.entity_name().to_string(),
        field: field.name().to_string(),
        value: value.to_string(),
    };

    let reference = match value {
        FieldValue::Reference(r) if r.is_no_reference() => r,
        FieldValue::Reference(r) if r.entity().is_empty() || r.entity() == target.entity => {
            r.with_entity(target.entity.clone())
        }
        FieldValue::Id(id) => EntityReferenceRecord::by_id(target.entity.clone(), id),
        FieldValue::Embedded(record) if record.entity().name() == target.entity => {
            EntityReferenceRecord::from_record(*record)
        }
        FieldValue::Record(map) if map.is_empty() => EntityReferenceRecord::NO_REFERENCE,
        FieldValue::Record(map) => {
            let key = map
                .iter()
                .map(|(k, v)| (k.to_lowercase(), FieldValue::from_json(v)))
                .collect::<LogicalKeyValue>();
            EntityReferenceRecord::by_logical_key(target.entity.clone(), key)
        }
        scalar @ (FieldValue::Text(_)
        | FieldValue::Long(_)
        | FieldValue::Number(_)
        | FieldValue::Double(_)
        | FieldValue::Bool(_)
        | FieldValue::Date(_)
        | FieldValue::Time(_)
        | FieldValue::DateTime(_)) => match target.logical_key.as_slice() {
            [single] => EntityReferenceRecord::by_logical_key(
                target.entity.clone(),
                LogicalKeyValue::single(single.clone(), scalar),
            ),
            _ => return Err(invalid(&scalar)),
        },
        other => return Err(invalid(&other)),
    };
    Ok(reference)
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Id(v) | FieldValue::Long(v) => write!(f, "{v}"),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Double(v) => write!(f, "{v}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
            FieldValue::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            FieldValue::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            FieldValue::TextArray(items) => write!(f, "[{}]", items.join(", ")),
            FieldValue::Record(map) => write!(f, "{}", Value::Object(map.clone())),
            FieldValue::Password(_) => f.write_str("******"),
            FieldValue::Reference(r) => write!(f, "{r}"),
            FieldValue::Embedded(record) => {
                write!(f, "{}({})", record.entity().name(), record.logical_key_value())
            }
            FieldValue::ReferenceArray(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Long(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Long(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Double(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Number> for FieldValue {
    fn from(value: Number) -> Self {
        FieldValue::Number(value)
    }
}

impl From<NaiveTime> for FieldValue {
    fn from(value: NaiveTime) -> Self {
        FieldValue::Time(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(value: NaiveDateTime) -> Self {
        FieldValue::DateTime(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::TextArray(value)
    }
}

impl From<Password> for FieldValue {
    fn from(value: Password) -> Self {
        FieldValue::Password(value)
    }
}

impl From<EntityReferenceRecord> for FieldValue {
    fn from(value: EntityReferenceRecord) -> Self {
        FieldValue::Reference(value)
    }
}

impl From<EntityRecord> for FieldValue {
    fn from(value: EntityRecord) -> Self {
        FieldValue::Embedded(Box::new(value))
    }
}

impl From<Vec<EntityReferenceRecord>> for FieldValue {
    fn from(value: Vec<EntityReferenceRecord>) -> Self {
        FieldValue::ReferenceArray(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldScope, FieldTarget};

    fn field(kind: FieldType) -> EntityField {
        EntityField::new("DOC", "value", kind, FieldScope::Data, "APP")
    }

    fn ref_field(kind: FieldType, lk: &[&str]) -> EntityField {
        field(kind).with_target(FieldTarget {
            entity: "PERSON".into(),
            logical_key: lk.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_null_defaults() {
        assert_eq!(FieldValue::null_default(FieldType::Text), FieldValue::Text(String::new()));
        assert_eq!(FieldValue::null_default(FieldType::Long), FieldValue::Long(0));
        assert_eq!(FieldValue::null_default(FieldType::Bool), FieldValue::Bool(false));
        assert_eq!(FieldValue::null_default(FieldType::Date), FieldValue::Null);
        assert!(matches!(
            FieldValue::null_default(FieldType::EntityRef),
            FieldValue::Reference(r) if r.is_no_reference()
        ));
        assert_eq!(
            FieldValue::null_default(FieldType::EntityRefArray),
            FieldValue::ReferenceArray(Vec::new())
        );
    }

    #[test]
    fn test_coerce_scalars() {
        let v = FieldValue::from(10).coerce_for(&field(FieldType::Double)).unwrap();
        assert_eq!(v, FieldValue::Double(10.0));
        let v = FieldValue::from("42").coerce_for(&field(FieldType::Long)).unwrap();
        assert_eq!(v, FieldValue::Long(42));
        let v = FieldValue::from("2019-03-04").coerce_for(&field(FieldType::Date)).unwrap();
        assert_eq!(v, FieldValue::Date(NaiveDate::from_ymd_opt(2019, 3, 4).unwrap()));
        let v = FieldValue::from("10:11:12.5").coerce_for(&field(FieldType::Time)).unwrap();
        assert_eq!(
            v,
            FieldValue::Time(NaiveTime::from_hms_milli_opt(10, 11, 12, 500).unwrap())
        );
    }

    #[test]
    fn test_coerce_rejects_mismatch() {
        let err = FieldValue::from(true)
            .coerce_for(&field(FieldType::Long))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFieldValue { .. }));
        assert!(FieldValue::from("abc").coerce_for(&field(FieldType::Long)).is_err());
    }

    #[test]
    fn test_coerce_reference_from_text() {
        let v = FieldValue::from("bob")
            .coerce_for(&ref_field(FieldType::EntityRef, &["name"]))
            .unwrap();
        let r = v.as_reference().unwrap();
        assert_eq!(r.entity(), "PERSON");
        assert_eq!(
            r.logical_key().unwrap().get("name"),
            Some(&FieldValue::Text("bob".into()))
        );
        assert!(FieldValue::from("bob")
            .coerce_for(&ref_field(FieldType::EntityRef, &["first", "last"]))
            .is_err());
    }

    #[test]
    fn test_coerce_reference_array_from_texts() {
        let v = FieldValue::from(vec!["a".to_string(), "b".to_string()])
            .coerce_for(&ref_field(FieldType::EntityRefArray, &["name"]))
            .unwrap();
        assert!(matches!(v, FieldValue::ReferenceArray(ref items) if items.len() == 2));
    }

    #[test]
    fn test_password_hashing() {
        let v = FieldValue::from("secret")
            .coerce_for(&field(FieldType::Password))
            .unwrap();
        match v {
            FieldValue::Password(p) => {
                assert!(p.verify("secret"));
                assert!(!p.verify("other"));
                assert_eq!(p.hash().len(), 64);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_datetime_formats() {
        let parsed = FieldValue::parse_text(FieldType::DateTime, "2020-01-02T03:04:05").unwrap();
        assert_eq!(parsed.to_string(), "2020-01-02T03:04:05");
        assert!(FieldValue::parse_text(FieldType::DateTime, "2020-01-02 03:04:05.250").is_some());
        assert!(FieldValue::parse_text(FieldType::DateTime, "2020-01-02T03:04:05Z").is_some());
    }
}
