//! Schema model: field kinds, fields, entities and the builder that
//! resolves them from module declarations.

pub mod builder;
pub mod catalog;
pub mod entity;
pub mod field;
pub mod field_type;
pub mod raw;
pub mod registry;

pub use builder::{resolve_field_type, BuiltSchema, SchemaBuilder, TargetInfo};
pub use entity::Entity;
pub use field::{EntityField, FieldScope, FieldTarget, Provenance};
pub use field_type::FieldType;
pub use raw::{
    Module, RawEntity, RawEntityBuilder, RawEntityRecords, RawEntry, RawRecordVersion, RawRecords,
    RawSchema,
};
pub use registry::{ModuleInfo, SchemaRegistry};
