//! Conversion between scalar field values and SQLite values.
//!
//! Reference kinds need storage lookups and are handled by the entity
//! manager; everything else maps one value to one column here.

use serde_json::{Map, Number, Value};

use super::transaction::SqlValue;
use crate::error::{Error, Result};
use crate::record::{FieldValue, Password, DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT};
use crate::schema::FieldType;

/// Storage value of a scalar field value.
pub fn scalar_to_sql(value: &FieldValue) -> Result<SqlValue> {
    let sql = match value {
        FieldValue::Null => SqlValue::Null,
        FieldValue::Id(v) | FieldValue::Long(v) => SqlValue::Integer(*v),
        FieldValue::Text(s) => SqlValue::Text(s.clone()),
        FieldValue::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) => SqlValue::Real(f),
            (None, None) => SqlValue::Text(n.to_string()),
        },
        FieldValue::Double(v) => SqlValue::Real(*v),
        FieldValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        FieldValue::Time(t) => SqlValue::Text(t.format(TIME_FORMAT).to_string()),
        FieldValue::Date(d) => SqlValue::Text(d.format(DATE_FORMAT).to_string()),
        FieldValue::DateTime(dt) => SqlValue::Text(dt.format(DATETIME_FORMAT).to_string()),
        FieldValue::TextArray(items) => SqlValue::Text(serde_json::to_string(items)?),
        FieldValue::Record(map) => SqlValue::Text(serde_json::to_string(map)?),
        FieldValue::Password(p) => SqlValue::Text(serde_json::to_string(p)?),
        FieldValue::Reference(_) | FieldValue::Embedded(_) | FieldValue::ReferenceArray(_) => {
            return Err(Error::Inconsistent(format!(
                "value {value} is not a scalar"
            )))
        }
    };
    Ok(sql)
}

/// Field value of a scalar column. NULL reads as the kind default.
pub fn scalar_from_sql(kind: FieldType, sql: &SqlValue) -> Result<FieldValue> {
    if matches!(sql, SqlValue::Null) {
        return Ok(FieldValue::null_default(kind));
    }
    let mismatch = || Error::Inconsistent(format!("column of kind {kind} holds {sql:?}"));

    let value = match (kind, sql) {
        (FieldType::Pk, SqlValue::Integer(v)) => FieldValue::Id(*v),
        (FieldType::Text | FieldType::TranslText, SqlValue::Text(s)) => FieldValue::Text(s.clone()),
        (FieldType::Text | FieldType::TranslText, SqlValue::Integer(v)) => {
            FieldValue::Text(v.to_string())
        }
        (FieldType::Number, SqlValue::Integer(v)) => FieldValue::Number(Number::from(*v)),
        (FieldType::Number, SqlValue::Real(v)) => {
            FieldValue::Number(Number::from_f64(*v).ok_or_else(mismatch)?)
        }
        (FieldType::Number, SqlValue::Text(s)) => {
            FieldValue::Number(s.parse::<Number>().map_err(|_| mismatch())?)
        }
        (FieldType::Long, SqlValue::Integer(v)) => FieldValue::Long(*v),
        (FieldType::Double, SqlValue::Real(v)) => FieldValue::Double(*v),
        (FieldType::Double, SqlValue::Integer(v)) => FieldValue::Double(*v as f64),
        (FieldType::Bool, SqlValue::Integer(v)) => FieldValue::Bool(*v != 0),
        (FieldType::Time | FieldType::Date | FieldType::DateTime, SqlValue::Text(s)) => {
            FieldValue::parse_text(kind, s).ok_or_else(mismatch)?
        }
        (FieldType::TextArray, SqlValue::Text(s)) => {
            FieldValue::TextArray(serde_json::from_str::<Vec<String>>(s)?)
        }
        (FieldType::Record, SqlValue::Text(s)) => {
            FieldValue::Record(serde_json::from_str::<Map<String, Value>>(s)?)
        }
        (FieldType::Password, SqlValue::Text(s)) => {
            FieldValue::Password(serde_json::from_str::<Password>(s)?)
        }
        _ => return Err(mismatch()),
    };
    Ok(value)
}

/// Integer content of a column, treating NULL as absent.
pub fn sql_i64(sql: &SqlValue) -> Option<i64> {
    match sql {
        SqlValue::Integer(v) => Some(*v),
        SqlValue::Real(v) => Some(*v as i64),
        SqlValue::Text(s) => s.parse().ok(),
        _ => None,
    }
}

/// Stable textual form used for hashing.
pub fn sql_repr(sql: &SqlValue) -> String {
    match sql {
        SqlValue::Null => String::new(),
        SqlValue::Integer(v) => v.to_string(),
        SqlValue::Real(v) => v.to_string(),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Blob(b) => hex::encode(b),
    }
}
