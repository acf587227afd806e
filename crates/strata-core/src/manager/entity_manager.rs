//! Public record operations.
//!
//! Each operation runs in its own transaction, committed on success and
//! rolled back when an error propagates. The `_within` variants run inside
//! a caller-supplied transaction instead.
//!
//! Writes to the ENTITY and FIELD catalog entities change the schema:
//! storage is altered in the same transaction and the registry is updated
//! once it commits.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::resolution::{ResolutionExecutor, ResolutionResult};
use super::schema_manager::SchemaManager;
use super::state::{State, StateManager};
use crate::error::{Error, Result};
use crate::filter::FilterContext;
use crate::persistence::{PersistenceEntityManager, Transaction, TransactionManager};
use crate::record::{from_flat_map, EntityRecord, EntityReferenceRecord, FieldValue, LogicalKeyValue};
use crate::schema::catalog::{self, fields};
use crate::schema::Entity;

/// Record CRUD over every entity of the schema.
#[derive(Debug)]
pub struct EntityManager {
    transactions: Arc<TransactionManager>,
    state: Arc<StateManager>,
    schema: Arc<SchemaManager>,
    persistence: Arc<PersistenceEntityManager>,
    resolution: ResolutionExecutor,
}

impl EntityManager {
    /// Create the façade. `max_cascade_depth` bounds cascading deletes.
    pub fn new(
        transactions: Arc<TransactionManager>,
        state: Arc<StateManager>,
        schema: Arc<SchemaManager>,
        persistence: Arc<PersistenceEntityManager>,
        max_cascade_depth: usize,
    ) -> Self {
        let resolution = ResolutionExecutor::new(
            Arc::clone(schema.registry()),
            Arc::clone(&persistence),
            max_cascade_depth,
        );
        Self {
            transactions,
            state,
            schema,
            persistence,
            resolution,
        }
    }

    /// An empty record of `entity`.
    pub fn new_record(&self, entity: &str) -> Result<EntityRecord> {
        Ok(EntityRecord::new(self.schema.get_entity(entity)?))
    }

    /// A record of `entity` built from a flat map.
    pub fn record_from_flat_map(&self, entity: &str, map: &Map<String, Value>) -> Result<EntityRecord> {
        from_flat_map(self.schema.get_entity(entity)?, map, self.schema.registry())
    }

    /// Insert a record whose logical key is not taken.
    pub fn put_if_absent(&self, record: &EntityRecord) -> Result<EntityRecord> {
        self.in_transaction(|tx| self.put_if_absent_within(record, tx))
    }

    /// [`put_if_absent`](Self::put_if_absent) inside `tx`.
    pub fn put_if_absent_within(
        &self,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entity = Arc::clone(record.entity());
        let stored = match entity.name() {
            catalog::ENTITY => self.put_runtime_entity(record, tx)?,
            catalog::FIELD => self.put_runtime_field(record, tx)?,
            _ => {
                if entity.has_logical_key() {
                    let key = record.logical_key_value();
                    if self
                        .persistence
                        .get_entity_record_by_logical_key(&entity, &key, tx)?
                        .is_some()
                    {
                        return Err(Error::MultipleLogicalKeyFound {
                            entity: entity.name().to_string(),
                            key: key.to_string(),
                        });
                    }
                }
                self.persistence.create_new_record(record, tx)?
            }
        };
        debug!(entity = %entity.name(), id = ?stored.id(), "record created");
        Ok(stored)
    }

    /// Insert the record, or update the record with the same logical key.
    pub fn put_or_update(&self, record: &EntityRecord) -> Result<EntityRecord> {
        self.in_transaction(|tx| self.put_or_update_within(record, tx))
    }

    /// [`put_or_update`](Self::put_or_update) inside `tx`.
    pub fn put_or_update_within(
        &self,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entity = record.entity();
        if catalog::is_catalog_entity(entity.name())
            && self
                .persistence
                .get_entity_record_by_logical_key(entity, &record.logical_key_value(), tx)?
                .is_none()
        {
            return self.put_if_absent_within(record, tx);
        }
        self.persistence.create_or_update(record, tx)
    }

    /// Update the record stored under `key` with the fields `record` sets.
    pub fn update(&self, record: &EntityRecord, key: &LogicalKeyValue) -> Result<EntityRecord> {
        self.in_transaction(|tx| self.update_within(record, key, tx))
    }

    /// [`update`](Self::update) inside `tx`.
    pub fn update_within(
        &self,
        record: &EntityRecord,
        key: &LogicalKeyValue,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entity = record.entity();
        let persisted = self
            .persistence
            .get_entity_record_by_logical_key(entity, key, tx)?
            .ok_or_else(|| Error::LogicalKeyNotFound {
                entity: entity.name().to_string(),
                key: key.to_string(),
            })?;
        self.apply_update(persisted, record, tx)
    }

    /// Update the record with external identifier `uuid`.
    pub fn update_by_uuid(&self, record: &EntityRecord, uuid: &str) -> Result<EntityRecord> {
        self.in_transaction(|tx| self.update_by_uuid_within(record, uuid, tx))
    }

    /// [`update_by_uuid`](Self::update_by_uuid) inside `tx`.
    pub fn update_by_uuid_within(
        &self,
        record: &EntityRecord,
        uuid: &str,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entity = record.entity();
        let persisted = self
            .persistence
            .get_entity_record_by_uuid(entity, uuid, tx)?
            .ok_or_else(|| Error::IdNotFound {
                entity: entity.name().to_string(),
                id: uuid.to_string(),
            })?;
        self.apply_update(persisted, record, tx)
    }

    /// Delete the record stored under `key`, resolving references to it.
    pub fn delete(&self, entity: &str, key: &LogicalKeyValue) -> Result<ResolutionResult> {
        self.in_transaction(|tx| self.delete_within(entity, key, tx))
    }

    /// [`delete`](Self::delete) inside `tx`.
    pub fn delete_within(
        &self,
        entity: &str,
        key: &LogicalKeyValue,
        tx: &Transaction<'_>,
    ) -> Result<ResolutionResult> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entity = self.schema.get_entity(entity)?;
        let persisted = self
            .persistence
            .get_entity_record_by_logical_key(&entity, key, tx)?
            .ok_or_else(|| Error::LogicalKeyNotFound {
                entity: entity.name().to_string(),
                key: key.to_string(),
            })?;
        self.delete_record(&persisted, tx)
    }

    /// Delete the record with external identifier `uuid`.
    pub fn delete_by_uuid(&self, entity: &str, uuid: &str) -> Result<ResolutionResult> {
        self.in_transaction(|tx| self.delete_by_uuid_within(entity, uuid, tx))
    }

    /// [`delete_by_uuid`](Self::delete_by_uuid) inside `tx`.
    pub fn delete_by_uuid_within(
        &self,
        entity: &str,
        uuid: &str,
        tx: &Transaction<'_>,
    ) -> Result<ResolutionResult> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entity = self.schema.get_entity(entity)?;
        let persisted = self
            .persistence
            .get_entity_record_by_uuid(&entity, uuid, tx)?
            .ok_or_else(|| Error::IdNotFound {
                entity: entity.name().to_string(),
                id: uuid.to_string(),
            })?;
        self.delete_record(&persisted, tx)
    }

    /// The record stored under `key`.
    pub fn get(&self, entity: &str, key: &LogicalKeyValue) -> Result<EntityRecord> {
        self.in_transaction(|tx| self.get_within(entity, key, tx))
    }

    /// [`get`](Self::get) inside `tx`.
    pub fn get_within(
        &self,
        entity: &str,
        key: &LogicalKeyValue,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entity = self.schema.get_entity(entity)?;
        self.persistence
            .get_entity_record_by_logical_key(&entity, key, tx)?
            .ok_or_else(|| Error::LogicalKeyNotFound {
                entity: entity.name().to_string(),
                key: key.to_string(),
            })
    }

    /// The record with external identifier `uuid`.
    pub fn get_by_uuid(&self, entity: &str, uuid: &str) -> Result<EntityRecord> {
        self.in_transaction(|tx| self.get_by_uuid_within(entity, uuid, tx))
    }

    /// [`get_by_uuid`](Self::get_by_uuid) inside `tx`.
    pub fn get_by_uuid_within(
        &self,
        entity: &str,
        uuid: &str,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entity = self.schema.get_entity(entity)?;
        self.persistence
            .get_entity_record_by_uuid(&entity, uuid, tx)?
            .ok_or_else(|| Error::IdNotFound {
                entity: entity.name().to_string(),
                id: uuid.to_string(),
            })
    }

    /// The record of a single-record entity.
    pub fn get_one_record(&self, entity: &str) -> Result<EntityRecord> {
        self.in_transaction(|tx| self.get_one_record_within(entity, tx))
    }

    /// [`get_one_record`](Self::get_one_record) inside `tx`.
    pub fn get_one_record_within(&self, entity: &str, tx: &Transaction<'_>) -> Result<EntityRecord> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entity = self.one_record_entity(entity)?;
        self.persistence.get_one_record(&entity, tx)
    }

    /// Update the record of a single-record entity.
    pub fn update_one_record(&self, record: &EntityRecord) -> Result<EntityRecord> {
        self.in_transaction(|tx| self.update_one_record_within(record, tx))
    }

    /// [`update_one_record`](Self::update_one_record) inside `tx`.
    pub fn update_one_record_within(
        &self,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entity = self.one_record_entity(record.entity().name())?;
        let persisted = self.persistence.get_one_record(&entity, tx)?;
        self.persistence.merge_into(persisted, record, tx)
    }

    /// Records selected by a filter context. Empty when nothing matches.
    pub fn get_records_matching(
        &self,
        entity: &str,
        context: &FilterContext,
    ) -> Result<Vec<EntityRecord>> {
        self.in_transaction(|tx| self.get_records_matching_within(entity, context, tx))
    }

    /// [`get_records_matching`](Self::get_records_matching) inside `tx`.
    pub fn get_records_matching_within(
        &self,
        entity: &str,
        context: &FilterContext,
        tx: &Transaction<'_>,
    ) -> Result<Vec<EntityRecord>> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entity = self.schema.get_entity(entity)?;
        self.persistence
            .get_entity_records_matching(&entity, context, tx)
    }

    /// Records whose fields equal all of `values`. Empty when nothing matches.
    pub fn get_records_matching_values(
        &self,
        entity: &str,
        values: &[(&str, FieldValue)],
    ) -> Result<Vec<EntityRecord>> {
        self.in_transaction(|tx| self.get_records_matching_values_within(entity, values, tx))
    }

    /// [`get_records_matching_values`](Self::get_records_matching_values) inside `tx`.
    pub fn get_records_matching_values_within(
        &self,
        entity: &str,
        values: &[(&str, FieldValue)],
        tx: &Transaction<'_>,
    ) -> Result<Vec<EntityRecord>> {
        self.state.require(State::SchemaStorageInitialized)?;
        let entity = self.schema.get_entity(entity)?;
        self.persistence
            .get_entity_records_matching_values(&entity, values, tx)
    }

    fn in_transaction<T>(&self, op: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        self.state.require(State::SchemaStorageInitialized)?;
        let tx = self.transactions.open_transaction()?;
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Merge `record` into `persisted`, refusing logical-key changes.
    fn apply_update(
        &self,
        persisted: EntityRecord,
        record: &EntityRecord,
        tx: &Transaction<'_>,
    ) -> Result<EntityRecord> {
        let entity = Arc::clone(persisted.entity());
        let mut key_probe = EntityRecord::new(Arc::clone(&entity));
        for field in entity.logical_key_fields() {
            if let Some(value) = record.get(field.name()).filter(|_| record.is_modified(field.name())) {
                key_probe.set(field.name(), value.clone())?;
            }
        }
        if !self.persistence.same_as(&persisted, &key_probe, tx)? {
            let mut merged = persisted.clone();
            merged.update(&key_probe)?;
            return Err(Error::LogicalKeyChanged {
                entity: entity.name().to_string(),
                from: persisted.logical_key_value().to_string(),
                to: merged.logical_key_value().to_string(),
            });
        }
        self.persistence.merge_into(persisted, record, tx)
    }

    fn delete_record(&self, persisted: &EntityRecord, tx: &Transaction<'_>) -> Result<ResolutionResult> {
        let entity = Arc::clone(persisted.entity());
        let result = match entity.name() {
            catalog::ENTITY => {
                let removed = self.schema.remove_runtime_entity(persisted, tx)?;
                let result = self.resolution.delete(persisted, tx)?;
                self.schema.drop_entity_storage(&removed, tx)?;
                let registry = Arc::clone(self.schema.registry());
                tx.after_commit(move || {
                    registry.remove(removed.name());
                });
                result
            }
            catalog::FIELD => {
                let (updated, field) = self.schema.remove_runtime_field(persisted, tx)?;
                let result = self.resolution.delete(persisted, tx)?;
                self.schema.drop_field_storage(&updated, &field, tx)?;
                self.publish_after_commit(updated, tx);
                result
            }
            _ => self.resolution.delete(persisted, tx)?,
        };
        info!(
            entity = %entity.name(),
            deleted = result.deleted_records.len(),
            nullified = result.nullified_fields.len(),
            "record deleted"
        );
        Ok(result)
    }

    /// Create a runtime entity from an ENTITY record.
    fn put_runtime_entity(&self, record: &EntityRecord, tx: &Transaction<'_>) -> Result<EntityRecord> {
        let created = self.schema.new_runtime_entity(record, tx)?;
        let mut record = record.clone();
        record.set(fields::NAME, created.name())?;
        record.set(fields::MODULE, created.module())?;

        let stored = self.persistence.create_new_record(&record, tx)?;
        let id = stored.id().ok_or_else(|| {
            Error::Inconsistent(format!("ENTITY row of {} has no identity", created.name()))
        })?;
        created.set_id_value(id);
        self.schema.write_field_records(&created, tx)?;
        self.publish_after_commit(created, tx);
        Ok(stored)
    }

    /// Add a runtime field from a FIELD record.
    fn put_runtime_field(&self, record: &EntityRecord, tx: &Transaction<'_>) -> Result<EntityRecord> {
        let (updated, field) = self.schema.new_runtime_field(record, tx)?;
        let ref_entity = field
            .target_entity()
            .and_then(|target| self.schema.registry().get(target))
            .and_then(|target| target.id_value())
            .map(|id| EntityReferenceRecord::by_id(catalog::ENTITY, id))
            .unwrap_or(EntityReferenceRecord::NO_REFERENCE);

        let mut record = record.clone();
        record.set(fields::NAME, field.name())?;
        record.set(fields::TYPE, field.field_type().name())?;
        record.set(fields::SCOPE, field.scope().name())?;
        record.set(fields::REF_ENTITY, ref_entity)?;

        let stored = self.persistence.create_new_record(&record, tx)?;
        if let (Some(id), Some(added)) = (stored.id(), updated.field(field.name())) {
            added.set_id_value(id);
        }
        self.publish_after_commit(updated, tx);
        Ok(stored)
    }

    fn publish_after_commit(&self, entity: Entity, tx: &Transaction<'_>) {
        let registry = Arc::clone(self.schema.registry());
        tx.after_commit(move || {
            registry.publish(entity);
        });
    }

    fn one_record_entity(&self, name: &str) -> Result<Arc<Entity>> {
        let entity = self.schema.get_entity(name)?;
        if !entity.is_one_record() {
            return Err(Error::InvalidSchema {
                entity: entity.name().to_string(),
                reason: "not a single record entity".to_string(),
            });
        }
        Ok(entity)
    }
}
