//! Record persistence: marshalling records to rows and back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::marshal::{scalar_from_sql, scalar_to_sql, sql_i64, sql_repr};
use super::transaction::{is_unique_violation, quote, Row, SqlStatement, SqlValue, Transaction};
use crate::error::{Error, Result};
use crate::filter::{FilterContext, FilterTranslator};
use crate::record::{EntityRecord, EntityReferenceRecord, FieldValue, LogicalKeyValue};
use crate::schema::catalog::{CREATED, MODIFIED};
use crate::schema::field::{ID_FIELD, UUID_COLUMN};
use crate::schema::{Entity, EntityField, FieldType, SchemaRegistry};

/// Bound on nested reference and embedded reads.
pub const MAX_REFERENCE_DEPTH: usize = 32;

static UUID_NONCE: AtomicU64 = AtomicU64::new(0);

/// Reads and writes records of any entity.
#[derive(Debug)]
pub struct PersistenceEntityManager {
    registry: Arc<SchemaRegistry>,
}

impl PersistenceEntityManager {
    /// Create a manager over the registry.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// The schema registry.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Insert a record and return it as stored.
    ///
    /// Embedded records are written first. `created` and `modified` are
    /// stamped, the external identifier is derived from the logical key, and
    /// a uniqueness rejection is reported as `MultipleLogicalKeyFound`.
    pub fn create_new_record(
        &self,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        let entity = Arc::clone(record.entity());
        let now = FieldValue::DateTime(Utc::now().naive_utc());

        let mut columns: Vec<(String, SqlValue)> = Vec::new();
        for (field, value) in record.all_values() {
            let value = match value {
                FieldValue::Embedded(sub) => FieldValue::Embedded(Box::new(self.save_embedded(&sub, tx)?)),
                _ if is_stamp(field, CREATED) || is_stamp(field, MODIFIED) => now.clone(),
                other => other,
            };
            columns.extend(self.write_columns(field, &value, tx)?);
        }

        if !entity.is_embedable() {
            let uuid = self.derive_uuid(&entity, &columns);
            columns.push((UUID_COLUMN.to_string(), SqlValue::Text(uuid)));
        }

        let stmt = insert_statement(&entity, columns);
        let id = match tx.execute_insert(&stmt) {
            Ok(id) => id,
            Err(Error::Sqlite(ref e)) if is_unique_violation(e) => {
                return Err(Error::MultipleLogicalKeyFound {
                    entity: entity.name().to_string(),
                    key: record.logical_key_value().to_string(),
                })
            }
            Err(e) => return Err(e),
        };
        debug!(entity = %entity.name(), id, "record inserted");
        self.get_entity_record_by_id(&entity, id, tx)
    }

    /// Write the modified fields of a record addressed by its id.
    pub fn update_entity_record_by_id(
        &self,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        let entity = Arc::clone(record.entity());
        let Some(id) = record.id() else {
            return Err(Error::IdFieldRequired {
                operation: "update",
                entity: entity.name().to_string(),
            });
        };

        let previous_embedded = self.embedded_ids(&entity, id, tx)?;
        let mut replaced_embedded = Vec::new();
        let mut columns: Vec<(String, SqlValue)> = Vec::new();
        let mut stamped = false;

        for (field, value) in record.modified_values() {
            if is_stamp(field, CREATED) {
                continue;
            }
            let value = match value {
                FieldValue::Embedded(sub) => FieldValue::Embedded(Box::new(self.save_embedded(sub, tx)?)),
                _ if is_stamp(field, MODIFIED) => {
                    stamped = true;
                    FieldValue::DateTime(Utc::now().naive_utc())
                }
                other => other.clone(),
            };
            if field.field_type() == FieldType::EntityEmbedded {
                let new_id = match &value {
                    FieldValue::Embedded(sub) => sub.id(),
                    _ => None,
                };
                if let Some((_, Some(old_id))) =
                    previous_embedded.iter().find(|(key, _)| *key == field.key())
                {
                    if new_id != Some(*old_id) {
                        replaced_embedded.push((field.clone(), *old_id));
                    }
                }
            }
            columns.extend(self.write_columns(field, &value, tx)?);
        }
        if !stamped {
            if let Some(field) = entity.field(MODIFIED) {
                let value = FieldValue::DateTime(Utc::now().naive_utc());
                columns.extend(self.write_columns(field, &value, tx)?);
            }
        }

        if !columns.is_empty() {
            let assignments: Vec<String> = columns
                .iter()
                .map(|(column, _)| format!("{} = :{column}", quote(column)))
                .collect();
            let mut stmt = SqlStatement::new(format!(
                "UPDATE {} SET {} WHERE {} = :{ID_FIELD}",
                quote(&entity.table_name()),
                assignments.join(", "),
                quote(ID_FIELD)
            ));
            for (column, value) in columns {
                stmt.push_param(&column, value);
            }
            stmt.push_param(ID_FIELD, id);

            let updated = match tx.execute_update(&stmt) {
                Ok(n) => n,
                Err(Error::Sqlite(ref e)) if is_unique_violation(e) => {
                    return Err(Error::MultipleLogicalKeyFound {
                        entity: entity.name().to_string(),
                        key: record.logical_key_value().to_string(),
                    })
                }
                Err(e) => return Err(e),
            };
            if updated == 0 {
                return Err(Error::IdNotFound {
                    entity: entity.name().to_string(),
                    id: id.to_string(),
                });
            }
        }

        for (field, old_id) in replaced_embedded {
            if let Some(target) = field.target_entity().and_then(|t| self.registry.get(t)) {
                self.delete_by_id(&target, old_id, tx)?;
            }
        }
        debug!(entity = %entity.name(), id, "record updated");
        self.get_entity_record_by_id(&entity, id, tx)
    }

    /// Delete a record addressed by its id, with its embedded records.
    pub fn delete_entity_record_by_id(
        &self,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<()> {
        let Some(id) = record.id() else {
            return Err(Error::IdFieldRequired {
                operation: "delete",
                entity: record.entity().name().to_string(),
            });
        };
        self.delete_by_id(record.entity(), id, tx)
    }

    /// Delete a row and its embedded records.
    pub(crate) fn delete_by_id(
        &self,
        entity: &Arc<Entity>,
        id: i64,
        tx: &Transaction<'_>,
    ) -> Result<()> {
        for (key, embedded_id) in self.embedded_ids(entity, id, tx)? {
            let Some(embedded_id) = embedded_id else {
                continue;
            };
            let target = entity
                .field(&key)
                .and_then(EntityField::target_entity)
                .and_then(|t| self.registry.get(t));
            if let Some(target) = target {
                self.delete_by_id(&target, embedded_id, tx)?;
            }
        }

        let stmt = SqlStatement::new(format!(
            "DELETE FROM {} WHERE {} = :{ID_FIELD}",
            quote(&entity.table_name()),
            quote(ID_FIELD)
        ))
        .bind(ID_FIELD, id);
        if tx.execute_update(&stmt)? == 0 {
            return Err(Error::IdNotFound {
                entity: entity.name().to_string(),
                id: id.to_string(),
            });
        }
        debug!(entity = %entity.name(), id, "record deleted");
        Ok(())
    }

    /// Read a record by id.
    pub fn get_entity_record_by_id(
        &self,
        entity: &Arc<Entity>,
        id: i64,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        self.read_by_id(entity, id, tx, 0)?
            .ok_or_else(|| Error::IdNotFound {
                entity: entity.name().to_string(),
                id: id.to_string(),
            })
    }

    /// Read a record by its external identifier.
    pub fn get_entity_record_by_uuid(
        &self,
        entity: &Arc<Entity>,
        uuid: &str,
        tx: &Transaction<'_>,
    ) -> Result<Option<EntityRecord>> {
        let stmt = SqlStatement::new(format!(
            "SELECT * FROM {} WHERE {} = :uuid",
            quote(&entity.table_name()),
            quote(UUID_COLUMN)
        ))
        .bind("uuid", uuid.to_string());
        match tx.query(&stmt)?.first() {
            Some(row) => Ok(Some(self.read_row(entity, row, tx, 0)?)),
            None => Ok(None),
        }
    }

    /// Read a record by logical key. Pieces missing from `key` take their
    /// kind default.
    pub fn get_entity_record_by_logical_key(
        &self,
        entity: &Arc<Entity>,
        key: &LogicalKeyValue,
        tx: &Transaction<'_>,
    ) -> Result<Option<EntityRecord>> {
        let pairs = self.logical_key_pairs(entity, key)?;
        let mut records = self.select_matching(entity, pairs, tx)?;
        match records.len() {
            0 => Ok(None),
            1 => Ok(records.pop()),
            n => Err(Error::Inconsistent(format!(
                "logical key {key} of {} matches {n} records",
                entity.name()
            ))),
        }
    }

    /// Records whose fields equal all of `values`.
    pub fn get_entity_records_matching_values(
        &self,
        entity: &Arc<Entity>,
        values: &[(&str, FieldValue)],
        tx: &Transaction<'_>,
    ) -> Result<Vec<EntityRecord>> {
        let mut pairs = Vec::with_capacity(values.len());
        for (name, value) in values {
            let field = entity.field(name).ok_or_else(|| Error::FieldNotFound {
                entity: entity.name().to_string(),
                field: name.to_string(),
            })?;
            pairs.push((field, value.clone().coerce_for(field)?));
        }
        self.select_matching(entity, pairs, tx)
    }

    /// Records selected by a filter context.
    pub fn get_entity_records_matching(
        &self,
        entity: &Arc<Entity>,
        context: &FilterContext,
        tx: &Transaction<'_>,
    ) -> Result<Vec<EntityRecord>> {
        let filter = FilterTranslator::new(&self.registry).translate(entity, context)?;
        let stmt = filter.statement(&format!("SELECT * FROM {}", quote(&entity.table_name())));
        tx.query(&stmt)?
            .iter()
            .map(|row| self.read_row(entity, row, tx, 0))
            .collect()
    }

    /// The row of a single-record entity.
    pub fn get_one_record(&self, entity: &Arc<Entity>, tx: &Transaction<'_>) -> Result<EntityRecord> {
        let stmt = SqlStatement::new(format!("SELECT * FROM {}", quote(&entity.table_name())));
        let rows = tx.query(&stmt)?;
        match rows.as_slice() {
            [] => Err(Error::OneRecordMissing {
                entity: entity.name().to_string(),
            }),
            [row] => self.read_row(entity, row, tx, 0),
            _ => Err(Error::SingleRecordEntity {
                entity: entity.name().to_string(),
                count: rows.len() as i64,
            }),
        }
    }

    /// Insert the record, or update the stored record with the same
    /// logical key when they differ.
    pub fn create_or_update(
        &self,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        let entity = record.entity();
        let persisted = if entity.has_logical_key() {
            self.get_entity_record_by_logical_key(entity, &record.logical_key_value(), tx)?
        } else if entity.is_one_record() {
            match self.get_one_record(entity, tx) {
                Ok(persisted) => Some(persisted),
                Err(Error::OneRecordMissing { .. }) => None,
                Err(e) => return Err(e),
            }
        } else if let Some(id) = record.id() {
            self.read_by_id(entity, id, tx, 0)?
        } else {
            None
        };

        match persisted {
            Some(persisted) => self.merge_into(persisted, record, tx),
            None => self.create_new_record(record, tx),
        }
    }

    /// Apply `record` on top of `persisted` unless nothing changes.
    pub(crate) fn merge_into(
        &self,
        persisted: EntityRecord,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        if self.same_as(&persisted, record, tx)? {
            debug!(entity = %persisted.entity().name(), "record unchanged");
            return Ok(persisted);
        }
        let mut merged = persisted;
        merged.clear_modified();
        merged.update(record)?;
        self.update_entity_record_by_id(&merged, tx)
    }

    /// Whether every field `incoming` sets already holds that value in
    /// `persisted`. References compare by resolved id.
    pub fn same_as(
        &self,
        persisted: &EntityRecord,
        incoming: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<bool> {
        for (field, value) in incoming.modified_values() {
            if is_stamp(field, CREATED) || is_stamp(field, MODIFIED) {
                continue;
            }
            let current = persisted.value_of(field);
            if !self.values_equal(&current, value, tx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn values_equal(
        &self,
        current: &FieldValue,
        incoming: &FieldValue,
        tx: &Transaction<'_>,
    ) -> Result<bool> {
        let equal = match (current, incoming) {
            (FieldValue::Reference(a), FieldValue::Reference(b)) => {
                a.is_no_reference() == b.is_no_reference()
                    && (a.is_no_reference()
                        || (a.entity() == b.entity()
                            && self.resolve_reference_id(a, tx)?
                                == self.resolve_reference_id(b, tx)?))
            }
            (FieldValue::ReferenceArray(a), FieldValue::ReferenceArray(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(b) {
                    if self.resolve_reference_id(x, tx)? != self.resolve_reference_id(y, tx)? {
                        return Ok(false);
                    }
                }
                true
            }
            (FieldValue::Embedded(a), FieldValue::Embedded(b)) => {
                (b.id().is_none() || b.id() == a.id()) && self.same_as(a, b, tx)?
            }
            (FieldValue::Number(a), FieldValue::Number(b)) => a.as_f64() == b.as_f64(),
            (a, b) => a == b,
        };
        Ok(equal)
    }

    /// Storage identity of a reference target.
    ///
    /// `NO_REFERENCE` resolves to 0. Otherwise the primary key is used when
    /// known, else the logical key is looked up.
    pub fn resolve_reference_id(
        &self,
        reference: &EntityReferenceRecord,
        tx: &Transaction<'_>,
    ) -> Result<i64> {
        if reference.is_no_reference() {
            return Ok(crate::record::NO_REFERENCE_ID);
        }
        if let Some(id) = reference.primary_key() {
            return Ok(id);
        }
        if let Some(id) = reference.record().and_then(EntityRecord::id) {
            return Ok(id);
        }

        let target = self
            .registry
            .get(reference.entity())
            .ok_or_else(|| Error::EntityNotFound {
                entity: reference.entity().to_string(),
            })?;
        let key = match (reference.logical_key(), reference.record()) {
            (Some(key), _) => key.clone(),
            (None, Some(record)) => record.logical_key_value(),
            (None, None) => {
                return Err(Error::Inconsistent(format!(
                    "reference {reference} carries neither id nor logical key"
                )))
            }
        };

        let pairs = self.logical_key_pairs(&target, &key)?;
        let (conditions, params) = self.conditions(pairs, tx)?;
        let mut stmt = SqlStatement::new(format!(
            "SELECT {} FROM {}{}",
            quote(ID_FIELD),
            quote(&target.table_name()),
            where_clause(&conditions)
        ));
        stmt.params = params;

        let rows = tx.query(&stmt)?;
        match rows.as_slice() {
            [row] => row.get_i64(ID_FIELD).ok_or_else(|| {
                Error::Inconsistent(format!("row of {} without id", target.name()))
            }),
            [] => Err(Error::LogicalKeyNotFound {
                entity: target.name().to_string(),
                key: key.to_string(),
            }),
            _ => Err(Error::MultipleLogicalKeyFound {
                entity: target.name().to_string(),
                key: key.to_string(),
            }),
        }
    }

    /// Storage columns of a field value, resolving references.
    pub(crate) fn write_columns(
        &self,
        field: &EntityField,
        value: &FieldValue,
        tx: &Transaction<'_>,
    ) -> Result<Vec<(String, SqlValue)>> {
        let column = field.key();
        let columns = match (field.field_type(), value) {
            (FieldType::EntityRef, FieldValue::Reference(r)) => {
                vec![(column, SqlValue::Integer(self.resolve_reference_id(r, tx)?))]
            }
            (FieldType::EntityRef, FieldValue::Null) => vec![(column, SqlValue::Integer(0))],
            (FieldType::EntityEmbedded, FieldValue::Embedded(sub)) => match sub.id() {
                Some(id) => vec![(column, SqlValue::Integer(id))],
                None => {
                    return Err(Error::Inconsistent(format!(
                        "embedded record of {field} written before it was saved"
                    )))
                }
            },
            (FieldType::EntityEmbedded, FieldValue::Null) => vec![(column, SqlValue::Null)],
            (FieldType::GenericEntityRef, value) => {
                let (entity_id, ref_id) = match value {
                    FieldValue::Reference(r) if !r.is_no_reference() => {
                        let target = self.registry.get(r.entity()).ok_or_else(|| {
                            Error::EntityNotFound {
                                entity: r.entity().to_string(),
                            }
                        })?;
                        let entity_id = target.id_value().ok_or_else(|| {
                            Error::Inconsistent(format!(
                                "entity {} has no catalog identity",
                                target.name()
                            ))
                        })?;
                        (entity_id, self.resolve_reference_id(r, tx)?)
                    }
                    _ => (0, 0),
                };
                let mut columns = field.columns().into_iter();
                match (columns.next(), columns.next()) {
                    (Some(entity_column), Some(ref_column)) => vec![
                        (entity_column, SqlValue::Integer(entity_id)),
                        (ref_column, SqlValue::Integer(ref_id)),
                    ],
                    _ => return Err(Error::Inconsistent(format!("generic field {field} columns"))),
                }
            }
            (FieldType::EntityRefArray, FieldValue::ReferenceArray(items)) => {
                let ids = items
                    .iter()
                    .map(|r| self.resolve_reference_id(r, tx))
                    .collect::<Result<Vec<i64>>>()?;
                vec![(column, SqlValue::Text(serde_json::to_string(&ids)?))]
            }
            (FieldType::EntityRefArray, FieldValue::Null) => {
                vec![(column, SqlValue::Text("[]".to_string()))]
            }
            (_, value) => vec![(column, scalar_to_sql(value)?)],
        };
        Ok(columns)
    }

    fn save_embedded(&self, sub: &EntityRecord, tx: &Transaction<'_>) -> Result<EntityRecord> {
        if sub.id().is_some() {
            self.update_entity_record_by_id(sub, tx)
        } else {
            self.create_new_record(sub, tx)
        }
    }

    /// Current embedded record ids of a row, by field key.
    fn embedded_ids(
        &self,
        entity: &Entity,
        id: i64,
        tx: &Transaction<'_>,
    ) -> Result<Vec<(String, Option<i64>)>> {
        let fields: Vec<&EntityField> = entity
            .data_fields()
            .iter()
            .filter(|f| f.field_type() == FieldType::EntityEmbedded)
            .collect();
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let stmt = SqlStatement::new(format!(
            "SELECT * FROM {} WHERE {} = :{ID_FIELD}",
            quote(&entity.table_name()),
            quote(ID_FIELD)
        ))
        .bind(ID_FIELD, id);
        let rows = tx.query(&stmt)?;
        let Some(row) = rows.first() else {
            return Ok(Vec::new());
        };
        Ok(fields
            .into_iter()
            .map(|f| (f.key(), sql_i64(row.get(&f.key())).filter(|id| *id > 0)))
            .collect())
    }

    fn logical_key_pairs<'e>(
        &self,
        entity: &'e Entity,
        key: &LogicalKeyValue,
    ) -> Result<Vec<(&'e EntityField, FieldValue)>> {
        entity
            .logical_key_fields()
            .into_iter()
            .map(|field| {
                let value = key
                    .get(&field.key())
                    .cloned()
                    .unwrap_or_else(|| field.null_default());
                Ok((field, value.coerce_for(field)?))
            })
            .collect()
    }

    fn conditions(
        &self,
        pairs: Vec<(&EntityField, FieldValue)>,
        tx: &Transaction<'_>,
    ) -> Result<(Vec<String>, Vec<(String, SqlValue)>)> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        for (field, value) in pairs {
            for (column, sql) in self.write_columns(field, &value, tx)? {
                if matches!(sql, SqlValue::Null) {
                    conditions.push(format!("{} IS NULL", quote(&column)));
                } else {
                    let name = format!(":w{}", params.len());
                    conditions.push(format!("{} = {name}", quote(&column)));
                    params.push((name, sql));
                }
            }
        }
        Ok((conditions, params))
    }

    fn select_matching(
        &self,
        entity: &Arc<Entity>,
        pairs: Vec<(&EntityField, FieldValue)>,
        tx: &Transaction<'_>,
    ) -> Result<Vec<EntityRecord>> {
        let (conditions, params) = self.conditions(pairs, tx)?;
        let mut stmt = SqlStatement::new(format!(
            "SELECT * FROM {}{} ORDER BY {}",
            quote(&entity.table_name()),
            where_clause(&conditions),
            quote(ID_FIELD)
        ));
        stmt.params = params;
        tx.query(&stmt)?
            .iter()
            .map(|row| self.read_row(entity, row, tx, 0))
            .collect()
    }

    fn read_by_id(
        &self,
        entity: &Arc<Entity>,
        id: i64,
        tx: &Transaction<'_>,
        depth: usize,
    ) -> Result<Option<EntityRecord>> {
        let stmt = SqlStatement::new(format!(
            "SELECT * FROM {} WHERE {} = :{ID_FIELD}",
            quote(&entity.table_name()),
            quote(ID_FIELD)
        ))
        .bind(ID_FIELD, id);
        match tx.query(&stmt)?.first() {
            Some(row) => Ok(Some(self.read_row(entity, row, tx, depth)?)),
            None => Ok(None),
        }
    }

    fn read_row(
        &self,
        entity: &Arc<Entity>,
        row: &Row,
        tx: &Transaction<'_>,
        depth: usize,
    ) -> Result<EntityRecord> {
        if depth > MAX_REFERENCE_DEPTH {
            return Err(Error::Inconsistent(format!(
                "reference depth exceeded reading {}",
                entity.name()
            )));
        }
        let mut record = EntityRecord::new(Arc::clone(entity));
        let id = row.get_i64(ID_FIELD).unwrap_or_default();
        record.load(entity.id_field(), FieldValue::Id(id));
        record.set_uuid(row.get_text(UUID_COLUMN).map(str::to_string));
        for field in entity.fields() {
            let value = self.read_field(field, row, tx, depth)?;
            record.load(field, value);
        }
        Ok(record)
    }

    fn read_field(
        &self,
        field: &EntityField,
        row: &Row,
        tx: &Transaction<'_>,
        depth: usize,
    ) -> Result<FieldValue> {
        let column = field.key();
        match field.field_type() {
            FieldType::EntityRef => {
                let id = sql_i64(row.get(&column)).unwrap_or_default();
                if id == crate::record::NO_REFERENCE_ID {
                    return Ok(FieldValue::Reference(EntityReferenceRecord::NO_REFERENCE));
                }
                let target = self.target_of(field)?;
                match self.reference_projection(&target, id, tx, depth)? {
                    Some(reference) => Ok(FieldValue::Reference(reference)),
                    None => Err(Error::Inconsistent(format!(
                        "{field} points at missing {} #{id}",
                        target.name()
                    ))),
                }
            }
            FieldType::EntityEmbedded => {
                let Some(id) = sql_i64(row.get(&column)).filter(|id| *id > 0) else {
                    return Ok(FieldValue::Null);
                };
                let target = self.target_of(field)?;
                match self.read_by_id(&target, id, tx, depth + 1)? {
                    Some(sub) => Ok(FieldValue::Embedded(Box::new(sub))),
                    None => Err(Error::Inconsistent(format!(
                        "{field} embeds missing {} #{id}",
                        target.name()
                    ))),
                }
            }
            FieldType::GenericEntityRef => {
                let columns = field.columns();
                let entity_id = columns
                    .first()
                    .and_then(|c| sql_i64(row.get(c)))
                    .unwrap_or_default();
                let ref_id = columns
                    .get(1)
                    .and_then(|c| sql_i64(row.get(c)))
                    .unwrap_or_default();
                if entity_id == 0 || ref_id == 0 {
                    return Ok(FieldValue::Reference(EntityReferenceRecord::NO_REFERENCE));
                }
                let Some(target) = self.registry.entity_by_id(entity_id) else {
                    warn!(field = %field, entity_id, "generic reference to unknown entity");
                    return Ok(FieldValue::Reference(EntityReferenceRecord::NO_REFERENCE));
                };
                Ok(FieldValue::Reference(
                    self.reference_projection(&target, ref_id, tx, depth)?
                        .unwrap_or(EntityReferenceRecord::NO_REFERENCE),
                ))
            }
            FieldType::EntityRefArray => {
                let ids: Vec<i64> = match row.get(&column) {
                    SqlValue::Text(s) => serde_json::from_str(s)?,
                    _ => Vec::new(),
                };
                let target = self.target_of(field)?;
                let mut items = Vec::with_capacity(ids.len());
                for id in ids {
                    match self.reference_projection(&target, id, tx, depth)? {
                        Some(reference) => items.push(reference),
                        None => {
                            return Err(Error::Inconsistent(format!(
                                "{field} lists missing {} #{id}",
                                target.name()
                            )))
                        }
                    }
                }
                Ok(FieldValue::ReferenceArray(items))
            }
            kind => scalar_from_sql(kind, row.get(&column)),
        }
    }

    /// Resolved reference carrying the target's id and logical key.
    fn reference_projection(
        &self,
        target: &Arc<Entity>,
        id: i64,
        tx: &Transaction<'_>,
        depth: usize,
    ) -> Result<Option<EntityReferenceRecord>> {
        if depth >= MAX_REFERENCE_DEPTH {
            return Err(Error::Inconsistent(format!(
                "reference depth exceeded resolving {} #{id}",
                target.name()
            )));
        }
        let stmt = SqlStatement::new(format!(
            "SELECT * FROM {} WHERE {} = :{ID_FIELD}",
            quote(&target.table_name()),
            quote(ID_FIELD)
        ))
        .bind(ID_FIELD, id);
        let rows = tx.query(&stmt)?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let mut key = LogicalKeyValue::new();
        for field in target.logical_key_fields() {
            key.insert(field.key(), self.read_field(field, row, tx, depth + 1)?);
        }
        Ok(Some(EntityReferenceRecord::resolved(target.name(), id, key)))
    }

    fn target_of(&self, field: &EntityField) -> Result<Arc<Entity>> {
        let name = field.target_entity().unwrap_or_default();
        self.registry.get(name).ok_or_else(|| Error::EntityNotFound {
            entity: name.to_string(),
        })
    }

    /// Stable identifier derived from the logical key. Entities without a
    /// key hash a nonce, except single-record entities.
    fn derive_uuid(&self, entity: &Entity, columns: &[(String, SqlValue)]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(entity.name().as_bytes());
        if entity.has_logical_key() {
            for key in entity.logical_key() {
                let repr = columns
                    .iter()
                    .find(|(column, _)| column == key)
                    .map(|(_, value)| sql_repr(value))
                    .unwrap_or_default();
                hasher.update(&(repr.len() as u64).to_le_bytes());
                hasher.update(repr.as_bytes());
            }
        } else if !entity.is_one_record() {
            let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            let nonce = UUID_NONCE.fetch_add(1, Ordering::Relaxed);
            hasher.update(&nanos.to_le_bytes());
            hasher.update(&nonce.to_le_bytes());
        }
        format_uuid(&hasher.finalize().as_bytes()[..16])
    }
}

fn is_stamp(field: &EntityField, name: &str) -> bool {
    field.name() == name && field.field_type() == FieldType::DateTime
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn insert_statement(entity: &Entity, columns: Vec<(String, SqlValue)>) -> SqlStatement {
    let table = quote(&entity.table_name());
    if columns.is_empty() {
        return SqlStatement::new(format!("INSERT INTO {table} DEFAULT VALUES"));
    }
    let names: Vec<String> = columns.iter().map(|(c, _)| quote(c)).collect();
    let placeholders: Vec<String> = columns.iter().map(|(c, _)| format!(":{c}")).collect();
    let mut stmt = SqlStatement::new(format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    ));
    for (column, value) in columns {
        stmt.push_param(&column, value);
    }
    stmt
}

fn format_uuid(bytes: &[u8]) -> String {
    let hex = hex::encode(bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uuid() {
        let uuid = format_uuid(&[0xab; 16]);
        assert_eq!(uuid, "abababab-abab-abab-abab-abababababab");
        assert_eq!(uuid.len(), 36);
    }

    #[test]
    fn test_where_clause() {
        assert_eq!(where_clause(&[]), "");
        assert_eq!(
            where_clause(&["a = :w0".into(), "b IS NULL".into()]),
            " WHERE a = :w0 AND b IS NULL"
        );
    }

    #[test]
    fn test_uuid_is_stable_for_logical_key() {
        use crate::schema::{FieldScope, Entity, EntityField};
        let entity = Entity::new("DOC", "APP").with_field(
            EntityField::new("DOC", "code", FieldType::Text, FieldScope::Data, "APP")
                .with_logical_key(0),
        );
        let manager = PersistenceEntityManager::new(Arc::new(SchemaRegistry::new()));
        let columns = vec![("code".to_string(), SqlValue::Text("a".into()))];
        assert_eq!(
            manager.derive_uuid(&entity, &columns),
            manager.derive_uuid(&entity, &columns)
        );
        let other = vec![("code".to_string(), SqlValue::Text("b".into()))];
        assert_ne!(
            manager.derive_uuid(&entity, &columns),
            manager.derive_uuid(&entity, &other)
        );

        let keyless = Entity::new("LOG", "APP");
        assert_ne!(
            manager.derive_uuid(&keyless, &[]),
            manager.derive_uuid(&keyless, &[])
        );
    }

    #[test]
    fn test_uuid_separates_key_parts() {
        use crate::schema::{Entity, EntityField, FieldScope};
        let entity = Entity::new("PAIR", "APP")
            .with_field(
                EntityField::new("PAIR", "aaa", FieldType::Text, FieldScope::Data, "APP")
                    .with_logical_key(0),
            )
            .with_field(
                EntityField::new("PAIR", "bbb", FieldType::Text, FieldScope::Data, "APP")
                    .with_logical_key(1),
            );
        let manager = PersistenceEntityManager::new(Arc::new(SchemaRegistry::new()));
        let key = |a: &str, b: &str| {
            vec![
                ("aaa".to_string(), SqlValue::Text(a.into())),
                ("bbb".to_string(), SqlValue::Text(b.into())),
            ]
        };
        assert_ne!(
            manager.derive_uuid(&entity, &key("x|", "y")),
            manager.derive_uuid(&entity, &key("x", "|y"))
        );
    }
}
