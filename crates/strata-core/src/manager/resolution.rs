//! Reference resolution on delete.
//!
//! Before a record is deleted every field that may point at it is visited
//! and the field's policy applied:
//! - EMPTY: clear the reference, or drop the element from a reference array
//! - RESTRICT: refuse the delete while references exist
//! - DELETE: delete the referencing records, recursively

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::persistence::marshal::scalar_to_sql;
use crate::persistence::{quote, PersistenceEntityManager, SqlStatement, SqlValue, Transaction};
use crate::record::{EntityRecord, EntityReferenceRecord, FieldValue};
use crate::schema::catalog::{self, fields, MODIFIED, RESOLUTION_DELETE_CODE};
use crate::schema::field::ID_FIELD;
use crate::schema::{Entity, EntityField, FieldType, SchemaRegistry};

/// What happens to references when their target is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionPolicy {
    /// Clear the reference.
    #[default]
    Empty,
    /// Delete the referencing record.
    Delete,
    /// Reject the delete.
    Restrict,
}

impl ResolutionPolicy {
    /// Parse a FIELDRESOLUTION value, ignoring case.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "EMPTY" => Some(ResolutionPolicy::Empty),
            "DELETE" => Some(ResolutionPolicy::Delete),
            "RESTRICT" => Some(ResolutionPolicy::Restrict),
            _ => None,
        }
    }

    /// Catalog spelling.
    pub fn name(&self) -> &'static str {
        match self {
            ResolutionPolicy::Empty => "EMPTY",
            ResolutionPolicy::Delete => "DELETE",
            ResolutionPolicy::Restrict => "RESTRICT",
        }
    }
}

/// A reference cleared by a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullifiedField {
    /// Entity of the referencing record.
    pub entity: String,
    /// Referencing field.
    pub field: String,
    /// Identity of the referencing record.
    pub record_id: i64,
}

/// A record removed by a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedRecord {
    /// Entity name.
    pub entity: String,
    /// Record identity.
    pub id: i64,
}

/// Outcome of a delete.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    /// References that were cleared.
    pub nullified_fields: Vec<NullifiedField>,
    /// Records that were deleted, the requested one last.
    pub deleted_records: Vec<DeletedRecord>,
}

impl ResolutionResult {
    /// Create an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records touched.
    pub fn affected_count(&self) -> usize {
        self.deleted_records.len() + self.nullified_fields.len()
    }
}

/// Deletes records after resolving references to them.
#[derive(Debug)]
pub struct ResolutionExecutor {
    registry: Arc<SchemaRegistry>,
    persistence: Arc<PersistenceEntityManager>,
    max_depth: usize,
}

impl ResolutionExecutor {
    /// Create an executor bounded to `max_depth` levels of cascading.
    pub fn new(
        registry: Arc<SchemaRegistry>,
        persistence: Arc<PersistenceEntityManager>,
        max_depth: usize,
    ) -> Self {
        Self {
            registry,
            persistence,
            max_depth,
        }
    }

    /// Resolve references to `record`, then delete it.
    pub fn delete(&self, record: &EntityRecord, tx: &Transaction<'_>) -> Result<ResolutionResult> {
        let Some(id) = record.id() else {
            return Err(Error::IdFieldRequired {
                operation: "delete",
                entity: record.entity().name().to_string(),
            });
        };
        let mut result = ResolutionResult::new();
        let mut visited = HashSet::new();
        self.delete_recursive(record.entity(), id, tx, &mut result, &mut visited, 0)?;
        Ok(result)
    }

    fn delete_recursive(
        &self,
        entity: &Arc<Entity>,
        id: i64,
        tx: &Transaction<'_>,
        result: &mut ResolutionResult,
        visited: &mut HashSet<(String, i64)>,
        depth: usize,
    ) -> Result<()> {
        if depth > self.max_depth {
            return Err(Error::ResolutionDepthExceeded { depth });
        }
        if !visited.insert((entity.name().to_string(), id)) {
            return Ok(());
        }

        for (referencing, field) in self.registry.reference_fields_to(entity.name()) {
            let ids: Vec<i64> = self
                .find_referencing(&referencing, &field, entity, id, tx)?
                .into_iter()
                .filter(|rid| !visited.contains(&(referencing.name().to_string(), *rid)))
                .collect();
            if ids.is_empty() {
                continue;
            }

            match self.policy(&field, tx)? {
                ResolutionPolicy::Restrict => {
                    return Err(Error::ResolutionRestricted {
                        entity: entity.name().to_string(),
                        referencing_entity: referencing.name().to_string(),
                        field: field.name().to_string(),
                        count: ids.len(),
                    });
                }
                ResolutionPolicy::Delete => {
                    for rid in ids {
                        self.delete_recursive(&referencing, rid, tx, result, visited, depth + 1)?;
                    }
                }
                ResolutionPolicy::Empty => {
                    for rid in ids {
                        self.nullify(&referencing, &field, rid, id, tx)?;
                        result.nullified_fields.push(NullifiedField {
                            entity: referencing.name().to_string(),
                            field: field.name().to_string(),
                            record_id: rid,
                        });
                    }
                }
            }
        }

        self.persistence.delete_by_id(entity, id, tx)?;
        debug!(entity = %entity.name(), id, depth, "record deleted");
        result.deleted_records.push(DeletedRecord {
            entity: entity.name().to_string(),
            id,
        });
        Ok(())
    }

    /// Delete policy configured for a field.
    pub fn policy(&self, field: &EntityField, tx: &Transaction<'_>) -> Result<ResolutionPolicy> {
        let Some(field_id) = field.id_value() else {
            return Ok(ResolutionPolicy::default());
        };
        let Some(resolutions) = self.registry.get(catalog::FIELD_RESOLUTION) else {
            return Ok(ResolutionPolicy::default());
        };
        let records = self.persistence.get_entity_records_matching_values(
            &resolutions,
            &[
                (
                    fields::FIELD,
                    FieldValue::Reference(EntityReferenceRecord::by_id(catalog::FIELD, field_id)),
                ),
                (fields::CODE, FieldValue::from(RESOLUTION_DELETE_CODE)),
            ],
            tx,
        )?;
        let Some(record) = records.first() else {
            return Ok(ResolutionPolicy::default());
        };
        let code = record
            .value(fields::VALUE)
            .and_then(|v| v.as_text().map(str::to_string))
            .unwrap_or_default();
        Ok(ResolutionPolicy::from_code(&code).unwrap_or_else(|| {
            warn!(field = %field, code = %code, "unknown resolution policy, using EMPTY");
            ResolutionPolicy::default()
        }))
    }

    fn find_referencing(
        &self,
        referencing: &Entity,
        field: &EntityField,
        target: &Entity,
        id: i64,
        tx: &Transaction<'_>,
    ) -> Result<Vec<i64>> {
        let table = quote(&referencing.table_name());
        let stmt = match field.field_type() {
            FieldType::EntityRef => SqlStatement::new(format!(
                "SELECT {} FROM {table} WHERE {} = :target",
                quote(ID_FIELD),
                quote(&field.key())
            ))
            .bind("target", id),
            FieldType::EntityRefArray => SqlStatement::new(format!(
                "SELECT src.{id_col} FROM {table} AS src WHERE EXISTS \
                 (SELECT 1 FROM json_each(src.{col}) WHERE json_each.value = :target)",
                id_col = quote(ID_FIELD),
                col = quote(&field.key())
            ))
            .bind("target", id),
            FieldType::GenericEntityRef => {
                let Some(entity_id) = target.id_value() else {
                    return Ok(Vec::new());
                };
                let columns = field.columns();
                let (Some(entity_column), Some(ref_column)) = (columns.first(), columns.get(1))
                else {
                    return Ok(Vec::new());
                };
                SqlStatement::new(format!(
                    "SELECT {} FROM {table} WHERE {} = :entity AND {} = :target",
                    quote(ID_FIELD),
                    quote(entity_column),
                    quote(ref_column)
                ))
                .bind("entity", entity_id)
                .bind("target", id)
            }
            _ => return Ok(Vec::new()),
        };
        Ok(tx
            .query(&stmt)?
            .iter()
            .filter_map(|row| row.get_i64(ID_FIELD))
            .collect())
    }

    fn nullify(
        &self,
        referencing: &Entity,
        field: &EntityField,
        record_id: i64,
        target_id: i64,
        tx: &Transaction<'_>,
    ) -> Result<()> {
        let mut assignments: Vec<(String, SqlValue)> = match field.field_type() {
            FieldType::EntityRef => vec![(field.key(), SqlValue::Integer(0))],
            FieldType::GenericEntityRef => field
                .columns()
                .into_iter()
                .map(|column| (column, SqlValue::Integer(0)))
                .collect(),
            FieldType::EntityRefArray => {
                let stmt = SqlStatement::new(format!(
                    "SELECT {} FROM {} WHERE {} = :id",
                    quote(&field.key()),
                    quote(&referencing.table_name()),
                    quote(ID_FIELD)
                ))
                .bind("id", record_id);
                let rows = tx.query(&stmt)?;
                let current: Vec<i64> = match rows.first().and_then(|row| row.get_text(&field.key())) {
                    Some(json) => serde_json::from_str(json)?,
                    None => Vec::new(),
                };
                let remaining: Vec<i64> = current.into_iter().filter(|v| *v != target_id).collect();
                vec![(field.key(), SqlValue::Text(serde_json::to_string(&remaining)?))]
            }
            _ => return Ok(()),
        };
        if referencing.field(MODIFIED).is_some() {
            let now = FieldValue::DateTime(Utc::now().naive_utc());
            assignments.push((MODIFIED.to_string(), scalar_to_sql(&now)?));
        }

        let set: Vec<String> = assignments
            .iter()
            .map(|(column, _)| format!("{} = :{column}", quote(column)))
            .collect();
        let mut stmt = SqlStatement::new(format!(
            "UPDATE {} SET {} WHERE {} = :record_id",
            quote(&referencing.table_name()),
            set.join(", "),
            quote(ID_FIELD)
        ));
        for (column, value) in assignments {
            stmt.push_param(&column, value);
        }
        stmt.push_param("record_id", record_id);
        tx.execute_update(&stmt)?;
        debug!(entity = %referencing.name(), field = %field.name(), record_id, "reference cleared");
        Ok(())
    }
}
