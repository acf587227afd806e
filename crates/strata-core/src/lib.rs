//! STRATA Core - schema model, relational persistence and entity manager.
//!
//! Modules declare entities; the engine builds them into a schema, keeps a
//! SQLite database in line with it, and exposes logical-key based record
//! operations over every entity.
//!
//! ```rust
//! use strata_core::{Engine, EngineConfig, LogicalKeyValue};
//!
//! let engine = Engine::start(EngineConfig::in_memory(), Vec::new()).unwrap();
//! let entity = engine
//!     .entity_manager()
//!     .get("ENTITY", &LogicalKeyValue::single("name", "FIELD"))
//!     .unwrap();
//! assert_eq!(entity.value("module").unwrap().as_text(), Some("CORE"));
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod manager;
pub mod persistence;
pub mod record;
pub mod schema;

pub use config::{DatabaseLocation, EngineConfig};
pub use error::{Error, Result};
pub use filter::{FilterContext, FilterContextBuilder};
pub use manager::{
    Engine, EntityManager, ResolutionPolicy, ResolutionResult, SchemaManager, State,
};
pub use persistence::SyncReport;
pub use record::{
    from_flat_map, logical_key_from_json, to_flat_map, to_flat_map_with_meta, EntityRecord,
    EntityReferenceRecord, FieldValue, LogicalKeyValue,
};
pub use schema::{
    Entity, EntityField, FieldType, Module, RawEntity, RawEntityBuilder, RawEntityRecords,
    RawEntry, RawRecordVersion, RawRecords, RawSchema,
};
