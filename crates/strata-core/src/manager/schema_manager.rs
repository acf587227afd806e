//! Schema lifecycle: building, storage bootstrap, catalog records and
//! runtime schema changes.
//!
//! Entities declared at runtime live only in the ENTITY and FIELD catalog
//! tables. On start they are read back and declared again through the
//! RUNTIME module so the builder resolves them like any other declaration.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::state::{State, StateManager};
use crate::error::{Error, Result};
use crate::filter::FilterContext;
use crate::persistence::{
    quote, PersistenceEntityManager, PersistenceSchemaManager, SqlStatement, SyncReport,
    Transaction,
};
use crate::record::{from_flat_map, EntityRecord, EntityReferenceRecord, FieldValue, LogicalKeyValue};
use crate::schema::catalog::{self, fields, CORE_MODULE, RUNTIME_MODULE};
use crate::schema::field::ID_FIELD;
use crate::schema::raw::validate_name;
use crate::schema::{
    resolve_field_type, Entity, EntityField, FieldScope, FieldType, Module, ModuleInfo, RawEntity,
    RawEntry, RawSchema, SchemaBuilder, SchemaRegistry, TargetInfo,
};

/// Owns the schema registry and keeps storage and catalog in line with it.
#[derive(Debug)]
pub struct SchemaManager {
    registry: Arc<SchemaRegistry>,
    persistence_schema: PersistenceSchemaManager,
    persistence: Arc<PersistenceEntityManager>,
    state: Arc<StateManager>,
}

impl SchemaManager {
    /// Create a manager over shared registry, persistence and state.
    pub fn new(
        registry: Arc<SchemaRegistry>,
        persistence: Arc<PersistenceEntityManager>,
        state: Arc<StateManager>,
    ) -> Self {
        Self {
            registry,
            persistence_schema: PersistenceSchemaManager::new(),
            persistence,
            state,
        }
    }

    /// The schema registry.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Build the schema from `modules` and synchronize storage.
    ///
    /// Entities and fields previously declared at runtime are read back from
    /// the catalog and built again before the final sync.
    #[instrument(skip(self, modules, tx), fields(modules = modules.len()))]
    pub fn initialize_schemas_storage(
        &self,
        modules: &[Module],
        tx: &Transaction<'_>,
    ) -> Result<SyncReport> {
        let mut report = self.build_and_sync(modules.to_vec(), tx)?;

        let runtime = self.runtime_declarations(modules, tx)?;
        if !runtime.entities.is_empty() {
            info!(
                entities = runtime.entities.len(),
                "reloading runtime declarations"
            );
            report.merge(self.build_and_sync(with_runtime_schema(modules, runtime), tx)?);
        }

        self.state.transition(State::SchemaStorageInitialized);
        Ok(report)
    }

    /// Write the catalog rows, prune stale ones, apply seed batches and
    /// create missing single-record rows.
    #[instrument(skip(self, modules, tx), fields(modules = modules.len()))]
    pub fn initialize_schema_entity_records(
        &self,
        modules: &[Module],
        tx: &Transaction<'_>,
    ) -> Result<()> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entities = self.registry.all();

        let entity_catalog = self.catalog_entity(catalog::ENTITY)?;
        let mut kept_entities = Vec::with_capacity(entities.len());
        for entity in &entities {
            let record = self.entity_record(&entity_catalog, entity)?;
            let stored = self.persistence.create_or_update(&record, tx)?;
            let id = stored_id(&stored)?;
            entity.set_id_value(id);
            kept_entities.push(id);
        }
        self.persistence_schema
            .delete_unnecessary_entities(&kept_entities, tx)?;

        for entity in &entities {
            let entity_id = stored_id_of(entity)?;
            let kept_fields = self.write_field_records(entity, tx)?;
            self.persistence_schema
                .delete_unnecessary_fields(entity_id, &kept_fields, tx)?;
        }
        debug!(entities = entities.len(), "catalog records written");

        self.seed_records(modules, tx)?;

        for entity in entities.iter().filter(|e| e.is_one_record()) {
            self.ensure_default_record(entity, tx)?;
        }

        self.state.transition(State::SchemaRecordsInitialized);
        Ok(())
    }

    /// Synchronize storage with the registry as it is now.
    pub fn sync_storage(&self, tx: &Transaction<'_>) -> Result<SyncReport> {
        self.persistence_schema.sync(&self.registry.all(), tx)
    }

    /// Look up an entity by name.
    pub fn get_entity(&self, name: &str) -> Result<Arc<Entity>> {
        self.registry
            .get(name)
            .ok_or_else(|| Error::EntityNotFound {
                entity: name.to_uppercase(),
            })
    }

    /// All entities, sorted by name.
    pub fn all_entities(&self) -> Vec<Arc<Entity>> {
        self.registry.all()
    }

    /// Fields of any entity that may point at `target`.
    pub fn entity_reference_fields(&self, target: &str) -> Vec<(Arc<Entity>, EntityField)> {
        self.registry.reference_fields_to(target)
    }

    /// Entity whose ENTITY catalog row has identity `id`.
    pub fn entity_by_id(&self, id: i64) -> Option<Arc<Entity>> {
        self.registry.entity_by_id(id)
    }

    /// Look up a loaded module.
    pub fn module(&self, name: &str) -> Option<ModuleInfo> {
        self.registry.module(name)
    }

    /// Loaded modules in load order.
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.registry.modules()
    }

    /// Create the storage of an entity described by an ENTITY record.
    ///
    /// The entity is returned unpublished; callers publish it once their
    /// transaction commits.
    pub(crate) fn new_runtime_entity(
        &self,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<Entity> {
        let name = required_text(record, fields::NAME)?.to_uppercase();
        validate_name(&name)?;
        if self.registry.contains(&name) {
            return Err(Error::EntityFound { entity: name });
        }

        let module_name = text_of(record, fields::MODULE)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| RUNTIME_MODULE.to_string());
        let module = self.editable_module(&module_name)?;

        let embedable = bool_of(record, fields::EMBEDABLE);
        let one_record = bool_of(record, fields::ONE_RECORD);
        if embedable && one_record {
            return Err(Error::InvalidSchema {
                entity: name,
                reason: "a single record entity cannot be embedable".to_string(),
            });
        }

        let mut entity = Entity::new(&name, module.name)
            .with_embedable(embedable)
            .with_one_record(one_record);
        for meta in self.catalog_entity(catalog::ENTITY)?.meta_fields() {
            entity = entity.with_field(meta.reowned(name.clone()));
        }

        let entity_arc = Arc::new(entity.clone());
        self.persistence_schema
            .sync(std::slice::from_ref(&entity_arc), tx)?;
        if entity.is_one_record() {
            self.ensure_default_record(&entity_arc, tx)?;
        }
        info!(entity = %name, module = %entity.module(), "runtime entity created");
        Ok(entity)
    }

    /// Add the storage of a field described by a FIELD record.
    ///
    /// Returns the owning entity with the field added, unpublished.
    pub(crate) fn new_runtime_field(
        &self,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<(Entity, EntityField)> {
        let entity = self.owning_entity(record)?;
        self.editable_module(entity.module())?;

        let name = required_text(record, fields::NAME)?;
        validate_name(&name)?;
        if entity.field(&name).is_some() {
            return Err(Error::FieldFound {
                entity: entity.name().to_string(),
                field: name,
            });
        }

        let type_text = required_text(record, fields::TYPE)?;
        let ref_target = record
            .value(fields::REF_ENTITY)
            .and_then(|value| self.referenced_entity(&value));
        let type_name = declared_type_name(&type_text, ref_target.as_ref().map(|e| e.name()));

        let registry = &self.registry;
        let lookup = |candidate: &str| {
            registry.get(candidate).map(|e| TargetInfo {
                embedable: e.is_embedable(),
                logical_key: e.logical_key().to_vec(),
            })
        };
        let (kind, target) = resolve_field_type(entity.name(), &name, &type_name, &lookup)?;

        let mut field = EntityField::new(
            entity.name(),
            name.clone(),
            kind,
            FieldScope::Data,
            RUNTIME_MODULE,
        );
        if let Some(target) = target {
            field = field.with_target(target);
        }
        if bool_of(record, fields::IS_LOGICAL_KEY) {
            if !kind.can_be_logical_key() {
                return Err(Error::InvalidSchema {
                    entity: entity.name().to_string(),
                    reason: format!("field {name} of type {kind} cannot be part of the logical key"),
                });
            }
            let order = record
                .value(fields::LK_ORDER)
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            field = field.with_logical_key(order);
        }

        self.persistence_schema
            .add_field_storage(&entity, &field, tx)?;
        info!(entity = %entity.name(), field = %name, kind = %kind, "runtime field created");
        Ok((entity.with_added_field(field.clone()), field))
    }

    /// Check that an entity described by an ENTITY record can be removed and
    /// delete the catalog rows of its fields.
    ///
    /// The ENTITY row and the table are left for the caller to delete.
    pub(crate) fn remove_runtime_entity(
        &self,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<Arc<Entity>> {
        let name = required_text(record, fields::NAME)?;
        let entity = self.get_entity(&name)?;
        self.editable_module(entity.module())?;

        if let Some((referencing, field)) = self
            .registry
            .reference_fields_to(entity.name())
            .into_iter()
            .find(|(e, f)| {
                f.field_type() != FieldType::GenericEntityRef && e.name() != entity.name()
            })
        {
            return Err(Error::InvalidSchema {
                entity: entity.name().to_string(),
                reason: format!(
                    "still referenced by {}.{}",
                    referencing.name(),
                    field.name()
                ),
            });
        }

        for field in entity.fields() {
            if let Some(id) = field.id_value() {
                self.delete_resolution_rows(id, tx)?;
                self.delete_catalog_row(catalog::FIELD, id, tx)?;
            }
        }
        Ok(entity)
    }

    /// Check that a field described by a FIELD record can be removed and
    /// delete its resolution rows.
    ///
    /// Returns the owning entity without the field, unpublished, and the
    /// removed field. The FIELD row and the columns are left for the caller.
    pub(crate) fn remove_runtime_field(
        &self,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<(Entity, EntityField)> {
        let entity = self.owning_entity(record)?;
        self.editable_module(entity.module())?;

        let name = required_text(record, fields::NAME)?;
        let field = entity
            .data_fields()
            .iter()
            .find(|f| f.name().eq_ignore_ascii_case(&name))
            .ok_or_else(|| Error::FieldNotFound {
                entity: entity.name().to_string(),
                field: name.clone(),
            })?;
        self.editable_module(&field.provenance().module)?;
        if field.is_logical_key() {
            return Err(Error::InvalidSchema {
                entity: entity.name().to_string(),
                reason: format!("logical key field {name} cannot be removed"),
            });
        }

        if let Some(id) = field.id_value() {
            self.delete_resolution_rows(id, tx)?;
        }
        Ok((entity.without_field(&name), field.clone()))
    }

    /// Write one FIELD row per field of `entity` and store their identities.
    pub(crate) fn write_field_records(
        &self,
        entity: &Entity,
        tx: &Transaction<'_>,
    ) -> Result<Vec<i64>> {
        let field_catalog = self.catalog_entity(catalog::FIELD)?;
        let entity_id = stored_id_of(entity)?;
        let mut ids = Vec::new();
        for field in entity.fields() {
            let record = self.field_record(&field_catalog, entity_id, field)?;
            let stored = self.persistence.create_or_update(&record, tx)?;
            let id = stored_id(&stored)?;
            field.set_id_value(id);
            ids.push(id);
        }
        Ok(ids)
    }

    /// Drop the table of a removed entity.
    pub(crate) fn drop_entity_storage(&self, entity: &Entity, tx: &Transaction<'_>) -> Result<()> {
        tx.execute_ddl(&format!(
            "DROP TABLE IF EXISTS {}",
            quote(&entity.table_name())
        ))?;
        info!(entity = %entity.name(), "runtime entity dropped");
        Ok(())
    }

    /// Drop the columns of a removed field.
    pub(crate) fn drop_field_storage(
        &self,
        entity: &Entity,
        field: &EntityField,
        tx: &Transaction<'_>,
    ) -> Result<()> {
        for column in field.columns() {
            tx.execute_ddl(&format!(
                "ALTER TABLE {} DROP COLUMN {}",
                quote(&entity.table_name()),
                quote(&column)
            ))?;
        }
        info!(entity = %entity.name(), field = %field.name(), "runtime field dropped");
        Ok(())
    }

    /// Insert the default row of a single-record entity when it has none.
    pub(crate) fn ensure_default_record(
        &self,
        entity: &Arc<Entity>,
        tx: &Transaction<'_>,
    ) -> Result<()> {
        match self.persistence.get_one_record(entity, tx) {
            Ok(_) => Ok(()),
            Err(Error::OneRecordMissing { .. }) => {
                let record = match entity.default_record() {
                    Some(template) => from_flat_map(Arc::clone(entity), template, &self.registry)?,
                    None => EntityRecord::new(Arc::clone(entity)),
                };
                self.persistence.create_new_record(&record, tx)?;
                info!(entity = %entity.name(), "default record created");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn build_and_sync(&self, modules: Vec<Module>, tx: &Transaction<'_>) -> Result<SyncReport> {
        let built = SchemaBuilder::new().with_modules(modules).build()?;
        self.registry.load(built.entities, built.modules);
        self.sync_storage(tx)
    }

    /// Declarations of entities and fields created at runtime, read from the
    /// catalog. Only entities of editable modules are considered.
    fn runtime_declarations(&self, modules: &[Module], tx: &Transaction<'_>) -> Result<RawSchema> {
        let entity_catalog = self.catalog_entity(catalog::ENTITY)?;
        let field_catalog = self.catalog_entity(catalog::FIELD)?;
        let editable: HashSet<String> = modules
            .iter()
            .filter(|m| m.editable)
            .map(|m| m.name.to_uppercase())
            .chain(std::iter::once(RUNTIME_MODULE.to_string()))
            .collect();

        let mut schema = RawSchema::default();
        let rows = self
            .persistence
            .get_entity_records_matching(&entity_catalog, &FilterContext::new(), tx)?;
        for row in rows {
            let (Some(id), Some(name)) = (row.id(), text_of(&row, fields::NAME)) else {
                continue;
            };
            let module = text_of(&row, fields::MODULE).unwrap_or_default().to_uppercase();
            if !editable.contains(&module) {
                continue;
            }

            let declared = declared_field_names(modules, &name);
            let field_rows = self.persistence.get_entity_records_matching_values(
                &field_catalog,
                &[(
                    fields::ENTITY,
                    FieldValue::Reference(EntityReferenceRecord::by_id(catalog::ENTITY, id)),
                )],
                tx,
            )?;
            let mut entries = Vec::new();
            for field_row in field_rows {
                let (Some(field_name), Some(type_text)) = (
                    text_of(&field_row, fields::NAME),
                    text_of(&field_row, fields::TYPE),
                ) else {
                    continue;
                };
                if text_of(&field_row, fields::SCOPE).as_deref() != Some(FieldScope::Data.name())
                    || declared.contains(&field_name.to_lowercase())
                {
                    continue;
                }
                let target = field_row
                    .value(fields::REF_ENTITY)
                    .and_then(|v| reference_name(&v));
                let mut entry = RawEntry::new(
                    declared_type_name(&type_text, target.as_deref()),
                    field_name,
                );
                if bool_of(&field_row, fields::IS_LOGICAL_KEY) {
                    entry.is_logical_key = true;
                    entry.lk_order = field_row
                        .value(fields::LK_ORDER)
                        .and_then(|v| v.as_i64())
                        .unwrap_or(0);
                }
                entries.push(entry);
            }

            let statically_declared = modules.iter().any(|m| {
                m.schema
                    .entities
                    .iter()
                    .any(|e| e.name.eq_ignore_ascii_case(&name))
            });
            if statically_declared && entries.is_empty() {
                continue;
            }
            debug!(entity = %name, fields = entries.len(), "runtime declaration found");
            schema.entities.push(RawEntity {
                name,
                embedable: bool_of(&row, fields::EMBEDABLE),
                one_record: bool_of(&row, fields::ONE_RECORD),
                entries,
                ..RawEntity::default()
            });
        }
        Ok(schema)
    }

    fn seed_records(&self, modules: &[Module], tx: &Transaction<'_>) -> Result<()> {
        let init_records = self.catalog_entity(catalog::INIT_RECORD)?;
        let mut ordered: Vec<&Module> = modules.iter().collect();
        ordered.sort_by_key(|m| m.order);

        for module in ordered {
            for batch in &module.records.entities {
                let Some(entity) = self.registry.get(&batch.entity) else {
                    warn!(
                        module = %module.name,
                        entity = %batch.entity,
                        "records for unknown entity ignored"
                    );
                    continue;
                };
                let mut versions: Vec<_> = batch.versions.iter().collect();
                versions.sort_by_key(|v| v.number);

                for version in versions {
                    let marker = LogicalKeyValue::new()
                        .with(fields::ENTITY, entity.name())
                        .with(fields::VERSION_NAME, version.name.as_str())
                        .with(fields::VERSION_NUMBER, version.number);
                    if self
                        .persistence
                        .get_entity_record_by_logical_key(&init_records, &marker, tx)?
                        .is_some()
                    {
                        debug!(entity = %entity.name(), version = %version.name, "seed batch already applied");
                        continue;
                    }

                    for map in &version.records {
                        let record = from_flat_map(Arc::clone(&entity), map, &self.registry)?;
                        self.persistence.create_or_update(&record, tx)?;
                    }
                    let mut applied = EntityRecord::new(Arc::clone(&init_records));
                    applied.set(fields::ENTITY, entity.name())?;
                    applied.set(fields::VERSION_NAME, version.name.as_str())?;
                    applied.set(fields::VERSION_NUMBER, version.number)?;
                    self.persistence.create_new_record(&applied, tx)?;
                    info!(
                        module = %module.name,
                        entity = %entity.name(),
                        version = %version.name,
                        number = version.number,
                        records = version.records.len(),
                        "seed batch applied"
                    );
                }
            }
        }
        Ok(())
    }

    fn entity_record(&self, catalog_entity: &Arc<Entity>, entity: &Entity) -> Result<EntityRecord> {
        EntityRecord::new(Arc::clone(catalog_entity))
            .with(fields::NAME, entity.name())?
            .with(fields::MODULE, entity.module())?
            .with(fields::EMBEDABLE, entity.is_embedable())?
            .with(fields::ONE_RECORD, entity.is_one_record())
    }

    fn field_record(
        &self,
        catalog_entity: &Arc<Entity>,
        entity_id: i64,
        field: &EntityField,
    ) -> Result<EntityRecord> {
        let ref_entity = field
            .target_entity()
            .and_then(|target| self.registry.get(target))
            .and_then(|target| target.id_value())
            .map(|id| EntityReferenceRecord::by_id(catalog::ENTITY, id))
            .unwrap_or(EntityReferenceRecord::NO_REFERENCE);

        EntityRecord::new(Arc::clone(catalog_entity))
            .with(
                fields::ENTITY,
                EntityReferenceRecord::by_id(catalog::ENTITY, entity_id),
            )?
            .with(fields::NAME, field.name())?
            .with(fields::TYPE, field.field_type().name())?
            .with(fields::SCOPE, field.scope().name())?
            .with(fields::IS_LOGICAL_KEY, field.is_logical_key())?
            .with(fields::LK_ORDER, field.lk_order())?
            .with(fields::REF_ENTITY, ref_entity)
    }

    fn catalog_entity(&self, name: &str) -> Result<Arc<Entity>> {
        self.registry.get(name).ok_or_else(|| {
            Error::Inconsistent(format!("catalog entity {name} missing from module {CORE_MODULE}"))
        })
    }

    fn editable_module(&self, name: &str) -> Result<ModuleInfo> {
        let module = self
            .registry
            .module(name)
            .ok_or_else(|| Error::ModuleNotFound {
                module: name.to_uppercase(),
            })?;
        if !module.editable {
            return Err(Error::ModuleNotEditable {
                module: module.name,
            });
        }
        Ok(module)
    }

    fn owning_entity(&self, record: &EntityRecord) -> Result<Arc<Entity>> {
        let value = record.value(fields::ENTITY).unwrap_or(FieldValue::Null);
        self.referenced_entity(&value)
            .ok_or_else(|| Error::EntityNotFound {
                entity: value.to_string(),
            })
    }

    /// Entity named by a reference to an ENTITY row.
    fn referenced_entity(&self, value: &FieldValue) -> Option<Arc<Entity>> {
        if let Some(name) = reference_name(value) {
            return self.registry.get(&name);
        }
        value
            .as_reference()
            .and_then(|r| r.primary_key())
            .and_then(|id| self.registry.entity_by_id(id))
    }

    fn delete_resolution_rows(&self, field_id: i64, tx: &Transaction<'_>) -> Result<usize> {
        let resolutions = self.catalog_entity(catalog::FIELD_RESOLUTION)?;
        let stmt = SqlStatement::new(format!(
            "DELETE FROM {} WHERE {} = :field",
            quote(&resolutions.table_name()),
            quote(&fields::FIELD.to_lowercase())
        ))
        .bind("field", field_id);
        tx.execute_update(&stmt)
    }

    fn delete_catalog_row(&self, entity: &str, id: i64, tx: &Transaction<'_>) -> Result<usize> {
        let entity = self.catalog_entity(entity)?;
        let stmt = SqlStatement::new(format!(
            "DELETE FROM {} WHERE {} = :id",
            quote(&entity.table_name()),
            quote(ID_FIELD)
        ))
        .bind("id", id);
        tx.execute_update(&stmt)
    }
}

/// Type name a builder resolves back to `kind`, given the target entity of
/// reference kinds.
pub fn declared_type_name(kind: &str, target: Option<&str>) -> String {
    match (FieldType::from_name(kind), target) {
        (Some(FieldType::EntityRef | FieldType::EntityEmbedded), Some(target)) => {
            target.to_string()
        }
        (Some(FieldType::EntityRefArray), Some(target)) => format!("[{target}]"),
        _ => kind.to_string(),
    }
}

/// Lowercase names of the fields modules declare for `entity`, including
/// those of its interfaces.
fn declared_field_names(modules: &[Module], entity: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut interfaces = HashSet::new();
    for raw in modules
        .iter()
        .flat_map(|m| &m.schema.entities)
        .filter(|raw| raw.name.eq_ignore_ascii_case(entity))
    {
        names.extend(raw.entries.iter().map(|e| e.name.to_lowercase()));
        interfaces.extend(raw.implements.iter().map(|i| i.to_uppercase()));
    }
    for raw in modules
        .iter()
        .flat_map(|m| &m.schema.interfaces)
        .filter(|raw| interfaces.contains(&raw.name.to_uppercase()))
    {
        names.extend(raw.entries.iter().map(|e| e.name.to_lowercase()));
    }
    names
}

fn with_runtime_schema(modules: &[Module], runtime: RawSchema) -> Vec<Module> {
    let mut modules = modules.to_vec();
    match modules
        .iter_mut()
        .find(|m| m.name.eq_ignore_ascii_case(RUNTIME_MODULE))
    {
        Some(module) => module.schema.entities.extend(runtime.entities),
        None => modules.push(catalog::runtime_module().with_schema(runtime)),
    }
    modules
}

fn reference_name(value: &FieldValue) -> Option<String> {
    value
        .as_reference()
        .filter(|r| !r.is_no_reference())
        .and_then(|r| r.logical_key())
        .and_then(|key| key.get(fields::NAME))
        .and_then(|name| name.as_text())
        .map(str::to_string)
}

fn text_of(record: &EntityRecord, field: &str) -> Option<String> {
    record
        .value(field)
        .and_then(|v| v.as_text().map(str::to_string))
        .filter(|s| !s.is_empty())
}

fn required_text(record: &EntityRecord, field: &str) -> Result<String> {
    text_of(record, field).ok_or_else(|| Error::InvalidFieldValue {
        entity: record.entity().name().to_string(),
        field: field.to_string(),
        value: "null".to_string(),
    })
}

fn bool_of(record: &EntityRecord, field: &str) -> bool {
    record
        .value(field)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn stored_id(record: &EntityRecord) -> Result<i64> {
    record.id().ok_or_else(|| {
        Error::Inconsistent(format!(
            "stored {} record has no identity",
            record.entity().name()
        ))
    })
}

fn stored_id_of(entity: &Entity) -> Result<i64> {
    entity.id_value().ok_or_else(|| {
        Error::Inconsistent(format!("entity {} has no catalog row", entity.name()))
    })
}
