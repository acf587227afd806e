//! Core error types.

use thiserror::Error;

use crate::manager::State;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors.
///
/// Schema-build and storage-sync errors abort start-up; record errors are
/// returned to the caller; `Inconsistent` signals a programming defect or
/// corrupted storage.
#[derive(Debug, Error)]
pub enum Error {
    // -- schema build --
    /// A declared field type is neither a known kind, an alias, nor an entity.
    #[error("field type '{type_name}' not known for {entity}.{field}")]
    FieldTypeNotKnown {
        /// Entity declaring the field.
        entity: String,
        /// Field name.
        field: String,
        /// Declared type name.
        type_name: String,
    },

    /// A required interface was not declared by any module.
    #[error("interface {interface} not found")]
    MissingInterface {
        /// Interface name.
        interface: String,
    },

    /// An entity or field name does not satisfy the naming rules.
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Rule that was violated.
        reason: String,
    },

    /// Structural schema error (bad flags, embedding cycles, key kinds).
    #[error("invalid schema for {entity}: {reason}")]
    InvalidSchema {
        /// Entity involved.
        entity: String,
        /// Description of the problem.
        reason: String,
    },

    // -- storage sync --
    /// A column exists with a type that does not match the field kind.
    #[error("Field '{entity}.{field}' cannot be added - Column already exists with a wrong type ({found}) - PLEASE CHECK DATABASE AND SCHEMA")]
    IncompatibleColumn {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
        /// Declared type found in storage.
        found: String,
    },

    /// Only one of the two columns backing a generic reference exists, or
    /// one of them is unsuitable.
    #[error("generic reference {entity}.{field} is inconsistent in storage: {reason}")]
    GenericColumnMismatch {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
        /// What was found.
        reason: String,
    },

    /// A single-record entity holds more than one row.
    #[error("single record entity {entity} holds {count} records")]
    SingleRecordEntity {
        /// Entity name.
        entity: String,
        /// Rows found.
        count: i64,
    },

    // -- records --
    /// No record matches the logical key.
    #[error("logical key not found for {entity}: {key}")]
    LogicalKeyNotFound {
        /// Entity name.
        entity: String,
        /// Rendered logical key.
        key: String,
    },

    /// A record with the logical key already exists, or a reference
    /// resolved to more than one record.
    #[error("multiple logical key found for {entity}: {key}")]
    MultipleLogicalKeyFound {
        /// Entity name.
        entity: String,
        /// Rendered logical key.
        key: String,
    },

    /// No record with the given identity.
    #[error("record {entity} with id {id} not found")]
    IdNotFound {
        /// Entity name.
        entity: String,
        /// Row identity or external identifier.
        id: String,
    },

    /// The operation needs the record's storage identity.
    #[error("id field required for {operation} on {entity}")]
    IdFieldRequired {
        /// Operation name.
        operation: &'static str,
        /// Entity name.
        entity: String,
    },

    /// The entity has no such field.
    #[error("field {field} not found on entity {entity}")]
    FieldNotFound {
        /// Entity name.
        entity: String,
        /// Requested field.
        field: String,
    },

    /// A value cannot be converted to the field's kind.
    #[error("invalid value for {entity}.{field}: {value}")]
    InvalidFieldValue {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
        /// Rendered value.
        value: String,
    },

    /// An update addressed by a logical key tried to change that key.
    #[error("update of {entity} would change logical key from {from} to {to}")]
    LogicalKeyChanged {
        /// Entity name.
        entity: String,
        /// Key used for the lookup.
        from: String,
        /// Key after merging the update.
        to: String,
    },

    /// The entity is not part of the schema.
    #[error("entity {entity} not found")]
    EntityNotFound {
        /// Entity name.
        entity: String,
    },

    /// A runtime entity registration named an existing entity.
    #[error("entity {entity} already exists")]
    EntityFound {
        /// Entity name.
        entity: String,
    },

    /// A runtime field registration named an existing field.
    #[error("field {entity}.{field} already exists")]
    FieldFound {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
    },

    /// The module is not loaded.
    #[error("module {module} not found")]
    ModuleNotFound {
        /// Module name.
        module: String,
    },

    /// The module does not accept runtime schema changes.
    #[error("module {module} is not editable")]
    ModuleNotEditable {
        /// Module name.
        module: String,
    },

    /// Delete rejected because other records still reference the target.
    #[error("cannot delete {entity}: referenced by {count} {referencing_entity}.{field} record(s)")]
    ResolutionRestricted {
        /// Entity being deleted.
        entity: String,
        /// Entity holding the reference.
        referencing_entity: String,
        /// Referencing field.
        field: String,
        /// Number of referencing records.
        count: usize,
    },

    /// Cascading delete went deeper than the configured limit.
    #[error("resolution depth {depth} exceeded")]
    ResolutionDepthExceeded {
        /// Depth reached.
        depth: usize,
    },

    /// Filter is syntactically valid but cannot be applied to the entity.
    #[error("invalid filter on {entity}: {reason}")]
    InvalidFilter {
        /// Entity name.
        entity: String,
        /// Description of the problem.
        reason: String,
    },

    /// A list request parameter could not be interpreted.
    #[error("invalid parameter {name}: {value}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Offending value.
        value: String,
    },

    /// The row of a single-record entity is missing.
    #[error("single record entity {entity} has no record")]
    OneRecordMissing {
        /// Entity name.
        entity: String,
    },

    // -- consistency --
    /// Storage or engine state violates an invariant.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    // -- infrastructure --
    /// Operation invoked before the engine reached the required state.
    #[error("invalid state: required at least {required:?}, actual {actual:?}")]
    InvalidState {
        /// Minimum state required.
        required: State,
        /// Current state.
        actual: State,
    },

    /// Filter parse error.
    #[error("filter parse error: {0}")]
    Filter(#[from] strata_lang::ParseError),

    /// SQLite error.
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check whether the error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::LogicalKeyNotFound { .. } | Error::IdNotFound { .. }
        )
    }
}
