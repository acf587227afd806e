//! Storage layout synchronization.
//!
//! Creates one table per entity, adds missing columns, and verifies the
//! declared types of existing ones. Tables and columns are never dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::transaction::{quote, SqlStatement, Transaction};
use crate::error::{Error, Result};
use crate::schema::catalog::{self, fields};
use crate::schema::entity::domain_name;
use crate::schema::field::{GENERIC_ENTITY_SUFFIX, GENERIC_REF_SUFFIX, ID_FIELD, UUID_COLUMN};
use crate::schema::{Entity, EntityField, FieldType};

/// Registry of identity domains.
pub const DOMAIN_TABLE: &str = "strata_domain";

/// Counts of DDL work done by a sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Tables created.
    pub tables_created: usize,
    /// Columns added to existing tables.
    pub columns_added: usize,
    /// Identity domains registered.
    pub domains_created: usize,
}

impl SyncReport {
    /// Total number of storage changes.
    pub fn ddl_count(&self) -> usize {
        self.tables_created + self.columns_added + self.domains_created
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.ddl_count() == 0
    }

    pub(crate) fn merge(&mut self, other: SyncReport) {
        self.tables_created += other.tables_created;
        self.columns_added += other.columns_added;
        self.domains_created += other.domains_created;
    }
}

/// Declared storage type of a column.
pub fn declared_type(field: &EntityField) -> String {
    match field.field_type() {
        FieldType::Pk => "INTEGER".into(),
        FieldType::Text | FieldType::TranslText => "TEXT".into(),
        FieldType::Password | FieldType::Record => "JSON_TEXT".into(),
        FieldType::Number => "NUMERIC".into(),
        FieldType::Long => "BIGINT".into(),
        FieldType::Double => "DOUBLE PRECISION".into(),
        FieldType::Bool => "BOOLEAN".into(),
        FieldType::Time => "TIME".into(),
        FieldType::Date => "DATE".into(),
        FieldType::DateTime => "TIMESTAMP".into(),
        FieldType::TextArray => "TEXT_ARRAY".into(),
        FieldType::EntityRef | FieldType::EntityEmbedded => {
            domain_name(field.target_entity().unwrap_or_default())
        }
        FieldType::EntityRefArray => "BIGINT_ARRAY".into(),
        FieldType::GenericEntityRef => "BIGINT".into(),
    }
}

/// Columns backing a field with their declared types.
pub fn column_definitions(field: &EntityField) -> Vec<(String, String)> {
    match field.field_type() {
        FieldType::GenericEntityRef => {
            let key = field.key();
            vec![
                (
                    format!("{key}{GENERIC_ENTITY_SUFFIX}"),
                    domain_name(catalog::ENTITY),
                ),
                (format!("{key}{GENERIC_REF_SUFFIX}"), "BIGINT".into()),
            ]
        }
        _ => vec![(field.key(), declared_type(field))],
    }
}

/// Keeps the relational layout in line with the schema.
#[derive(Debug, Default)]
pub struct PersistenceSchemaManager;

impl PersistenceSchemaManager {
    /// Create a manager.
    pub fn new() -> Self {
        Self
    }

    /// Bring storage in line with `entities`.
    ///
    /// Runs the domain pass first, then creates or updates each table.
    #[instrument(skip(self, entities, tx), fields(entities = entities.len()))]
    pub fn sync(&self, entities: &[Arc<Entity>], tx: &Transaction<'_>) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for entity in entities {
            report.domains_created += self.ensure_domain(&entity.domain_name(), entity.name(), tx)?;
        }

        for entity in entities {
            report.merge(self.handle_entity(entity, tx)?);
        }

        for entity in entities.iter().filter(|e| e.is_one_record()) {
            self.check_single_record(entity, tx)?;
        }

        info!(
            tables_created = report.tables_created,
            columns_added = report.columns_added,
            domains_created = report.domains_created,
            "storage synchronized"
        );
        Ok(report)
    }

    /// Create the table of `entity`, or add its missing columns.
    pub fn handle_entity(&self, entity: &Entity, tx: &Transaction<'_>) -> Result<SyncReport> {
        let existing = self.table_columns(&entity.table_name(), tx)?;
        if existing.is_empty() {
            self.create_table(entity, tx)
        } else {
            let mut report = SyncReport::default();
            for field in entity.fields() {
                report.merge(self.verify_field(entity, field, &existing, tx)?);
            }
            Ok(report)
        }
    }

    /// Add the storage of a field registered at runtime.
    pub fn add_field_storage(
        &self,
        entity: &Entity,
        field: &EntityField,
        tx: &Transaction<'_>,
    ) -> Result<SyncReport> {
        let existing = self.table_columns(&entity.table_name(), tx)?;
        if existing.is_empty() {
            return self.create_table(&entity.with_added_field(field.clone()), tx);
        }
        if field.is_logical_key() {
            warn!(
                entity = %entity.name(),
                field = %field.name(),
                "logical key constraint is not extended for fields added at runtime"
            );
        }
        self.verify_field(entity, field, &existing, tx)
    }

    /// Fail if a single-record entity holds more than one row.
    pub fn check_single_record(&self, entity: &Entity, tx: &Transaction<'_>) -> Result<()> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", quote(&entity.table_name()));
        let count = tx
            .query(&SqlStatement::new(sql))?
            .first()
            .and_then(|row| row.get_i64("n"))
            .unwrap_or(0);
        if count > 1 {
            return Err(Error::SingleRecordEntity {
                entity: entity.name().to_string(),
                count,
            });
        }
        Ok(())
    }

    /// Remove catalog rows of entities whose ids are not in `keep`.
    ///
    /// FIELD rows of the removed entities go first, then their resolution
    /// rows. Tables are left in place.
    pub fn delete_unnecessary_entities(&self, keep: &[i64], tx: &Transaction<'_>) -> Result<usize> {
        let field_table = quote(&catalog::FIELD.to_lowercase());
        let entity_table = quote(&catalog::ENTITY.to_lowercase());

        let (not_in, params) = not_in_clause("keep", keep);
        let mut stmt = SqlStatement::new(format!(
            "DELETE FROM {field_table} WHERE {} {not_in}",
            quote(&fields::ENTITY.to_lowercase())
        ));
        stmt.params.extend(params.iter().cloned());
        let fields_deleted = tx.execute_update(&stmt)?;

        let mut stmt = SqlStatement::new(format!(
            "DELETE FROM {entity_table} WHERE {} {not_in}",
            quote(ID_FIELD)
        ));
        stmt.params = params;
        let entities_deleted = tx.execute_update(&stmt)?;

        let resolutions_deleted = self.delete_orphan_resolutions(tx)?;
        if entities_deleted > 0 || fields_deleted > 0 {
            warn!(
                entities = entities_deleted,
                fields = fields_deleted,
                resolutions = resolutions_deleted,
                "removed catalog rows of entities no longer in the schema"
            );
        }
        Ok(entities_deleted)
    }

    /// Remove FIELD rows of one entity whose ids are not in `keep`.
    pub fn delete_unnecessary_fields(
        &self,
        entity_id: i64,
        keep: &[i64],
        tx: &Transaction<'_>,
    ) -> Result<usize> {
        let (not_in, params) = not_in_clause("keep", keep);
        let mut stmt = SqlStatement::new(format!(
            "DELETE FROM {} WHERE {} = :entity AND {} {not_in}",
            quote(&catalog::FIELD.to_lowercase()),
            quote(&fields::ENTITY.to_lowercase()),
            quote(ID_FIELD)
        ))
        .bind("entity", entity_id);
        stmt.params.extend(params);
        let deleted = tx.execute_update(&stmt)?;
        if deleted > 0 {
            let resolutions = self.delete_orphan_resolutions(tx)?;
            warn!(
                entity_id,
                fields = deleted,
                resolutions,
                "removed catalog rows of fields no longer in the schema"
            );
        }
        Ok(deleted)
    }

    fn delete_orphan_resolutions(&self, tx: &Transaction<'_>) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {} WHERE {} NOT IN (SELECT {} FROM {})",
            quote(&catalog::FIELD_RESOLUTION.to_lowercase()),
            quote(&fields::FIELD.to_lowercase()),
            quote(ID_FIELD),
            quote(&catalog::FIELD.to_lowercase())
        );
        tx.execute_update(&SqlStatement::new(sql))
    }

    fn create_table(&self, entity: &Entity, tx: &Transaction<'_>) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut columns = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote(ID_FIELD))];
        if !entity.is_embedable() {
            columns.push(format!("{} TEXT UNIQUE", quote(UUID_COLUMN)));
        }
        for field in entity.fields() {
            report.domains_created += self.ensure_target_domain(field, tx)?;
            for (column, declared) in column_definitions(field) {
                columns.push(format!("{} {declared}", quote(&column)));
            }
        }
        if entity.has_logical_key() {
            let key: Vec<String> = entity.logical_key().iter().map(|k| quote(k)).collect();
            columns.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                quote(&entity.logical_key_constraint()),
                key.join(", ")
            ));
        }

        let sql = format!(
            "CREATE TABLE {} ({})",
            quote(&entity.table_name()),
            columns.join(", ")
        );
        tx.execute_ddl(&sql)?;
        info!(entity = %entity.name(), table = %entity.table_name(), "table created");
        report.tables_created = 1;
        Ok(report)
    }

    fn verify_field(
        &self,
        entity: &Entity,
        field: &EntityField,
        existing: &HashMap<String, String>,
        tx: &Transaction<'_>,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let definitions = column_definitions(field);

        if field.field_type() == FieldType::GenericEntityRef {
            let present: Vec<_> = definitions
                .iter()
                .filter(|(column, _)| existing.contains_key(column))
                .collect();
            if present.len() == 1 {
                return Err(Error::GenericColumnMismatch {
                    entity: entity.name().to_string(),
                    field: field.name().to_string(),
                    reason: format!("only column {} exists", present[0].0),
                });
            }
            for (column, declared) in &definitions {
                if let Some(found) = existing.get(column) {
                    if !found.eq_ignore_ascii_case(declared) {
                        return Err(Error::GenericColumnMismatch {
                            entity: entity.name().to_string(),
                            field: field.name().to_string(),
                            reason: format!("column {column} has type {found}"),
                        });
                    }
                }
            }
        } else {
            for (column, declared) in &definitions {
                if let Some(found) = existing.get(column) {
                    if !found.eq_ignore_ascii_case(declared) {
                        return Err(Error::IncompatibleColumn {
                            entity: entity.name().to_string(),
                            field: field.name().to_string(),
                            found: found.clone(),
                        });
                    }
                }
            }
        }

        let missing: Vec<_> = definitions
            .into_iter()
            .filter(|(column, _)| !existing.contains_key(column))
            .collect();
        if missing.is_empty() {
            return Ok(report);
        }

        report.domains_created += self.ensure_target_domain(field, tx)?;
        for (column, declared) in missing {
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {declared}",
                quote(&entity.table_name()),
                quote(&column)
            );
            tx.execute_ddl(&sql)?;
            info!(entity = %entity.name(), column = %column, "column added");
            report.columns_added += 1;
        }
        Ok(report)
    }

    /// Columns of a table by lowercase name, with their declared types.
    fn table_columns(&self, table: &str, tx: &Transaction<'_>) -> Result<HashMap<String, String>> {
        let rows = tx.query(&SqlStatement::new(format!("PRAGMA table_info({})", quote(table))))?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = row.get_text("name")?.to_lowercase();
                let declared = row.get_text("type").unwrap_or_default().to_string();
                Some((name, declared))
            })
            .collect())
    }

    fn ensure_target_domain(&self, field: &EntityField, tx: &Transaction<'_>) -> Result<usize> {
        match field.field_type() {
            FieldType::EntityRef | FieldType::EntityEmbedded => match field.target_entity() {
                Some(target) => self.ensure_domain(&domain_name(target), target, tx),
                None => Ok(0),
            },
            FieldType::GenericEntityRef => {
                self.ensure_domain(&domain_name(catalog::ENTITY), catalog::ENTITY, tx)
            }
            _ => Ok(0),
        }
    }

    /// Register an identity domain. Returns 1 when it was created.
    fn ensure_domain(&self, domain: &str, entity: &str, tx: &Transaction<'_>) -> Result<usize> {
        let mut created = 0;
        let exists = tx
            .query(
                &SqlStatement::new(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = :name",
                )
                .bind("name", DOMAIN_TABLE.to_string()),
            )?
            .len()
            == 1;
        if !exists {
            tx.execute_ddl(&format!(
                "CREATE TABLE {} (name TEXT PRIMARY KEY, entity TEXT NOT NULL)",
                quote(DOMAIN_TABLE)
            ))?;
            debug!(table = DOMAIN_TABLE, "domain registry created");
        }

        let registered = tx.query(
            &SqlStatement::new(format!(
                "SELECT name FROM {} WHERE name = :name",
                quote(DOMAIN_TABLE)
            ))
            .bind("name", domain.to_string()),
        )?;
        if registered.is_empty() {
            tx.execute_update(
                &SqlStatement::new(format!(
                    "INSERT INTO {} (name, entity) VALUES (:name, :entity)",
                    quote(DOMAIN_TABLE)
                ))
                .bind("name", domain.to_string())
                .bind("entity", entity.to_uppercase()),
            )?;
            info!(domain = %domain, "domain created");
            created = 1;
        }
        Ok(created)
    }
}

/// `NOT IN (...)` clause over ids. SQLite accepts the empty list.
fn not_in_clause(prefix: &str, ids: &[i64]) -> (String, Vec<(String, super::SqlValue)>) {
    let names: Vec<String> = (0..ids.len()).map(|i| format!(":{prefix}{i}")).collect();
    let params = names
        .iter()
        .zip(ids)
        .map(|(name, id)| (name.clone(), super::SqlValue::Integer(*id)))
        .collect();
    (format!("NOT IN ({})", names.join(", ")), params)
}
