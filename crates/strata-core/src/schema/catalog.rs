//! The built-in CORE module and its self-describing catalog entities.

use super::raw::{Module, RawEntity, RawEntry, RawSchema};

/// Built-in module name.
pub const CORE_MODULE: &str = "CORE";

/// Editable module receiving runtime entities.
pub const RUNTIME_MODULE: &str = "RUNTIME";

/// Load order of the runtime module.
pub const RUNTIME_MODULE_ORDER: i32 = i32::MAX;

/// Mandatory interface injected into every entity as meta fields.
pub const CORE_META: &str = "COREMETA";

/// Catalog entity describing entities.
pub const ENTITY: &str = "ENTITY";

/// Catalog entity describing fields.
pub const FIELD: &str = "FIELD";

/// Catalog entity tracking applied seed batches.
pub const INIT_RECORD: &str = "INITRECORD";

/// Catalog entity holding per-field resolution policies.
pub const FIELD_RESOLUTION: &str = "FIELDRESOLUTION";

/// Meta field stamped on insert.
pub const CREATED: &str = "created";

/// Meta field stamped on insert and update.
pub const MODIFIED: &str = "modified";

/// ENTITY and FIELD record field names.
pub mod fields {
    pub const NAME: &str = "name";
    pub const MODULE: &str = "module";
    pub const EMBEDABLE: &str = "embedable";
    pub const ONE_RECORD: &str = "oneRecord";
    pub const DISPLAY_NAME: &str = "displayName";
    pub const ENTITY: &str = "entity";
    pub const TYPE: &str = "type";
    pub const SCOPE: &str = "scope";
    pub const IS_LOGICAL_KEY: &str = "isLogicalKey";
    pub const LK_ORDER: &str = "lkOrder";
    pub const REF_ENTITY: &str = "refEntity";
    pub const VERSION_NAME: &str = "versionName";
    pub const VERSION_NUMBER: &str = "versionNumber";
    pub const FIELD: &str = "field";
    pub const CODE: &str = "code";
    pub const VALUE: &str = "value";
}

/// FIELDRESOLUTION code selecting the delete policy.
pub const RESOLUTION_DELETE_CODE: &str = "DELETE";

/// The CORE module.
pub fn core_module() -> Module {
    Module {
        name: CORE_MODULE.to_string(),
        dependencies: Vec::new(),
        editable: false,
        order: 0,
        schema: core_schema(),
        records: Default::default(),
    }
}

/// An empty RUNTIME module.
pub fn runtime_module() -> Module {
    Module::new(RUNTIME_MODULE, RUNTIME_MODULE_ORDER)
        .editable()
        .depends_on(CORE_MODULE)
}

fn core_schema() -> RawSchema {
    RawSchema::default()
        .with_interface(raw(
            CORE_META,
            vec![
                RawEntry::new("DATETIME", CREATED),
                RawEntry::new("DATETIME", MODIFIED),
            ],
        ))
        .with_entity(raw(
            ENTITY,
            vec![
                RawEntry::logical_key("TEXT", fields::NAME, 0),
                RawEntry::new("TEXT", fields::MODULE),
                RawEntry::new("BOOL", fields::EMBEDABLE),
                RawEntry::new("BOOL", fields::ONE_RECORD),
                RawEntry::new("TEXT", fields::DISPLAY_NAME),
            ],
        ))
        .with_entity(raw(
            FIELD,
            vec![
                RawEntry::logical_key(ENTITY, fields::ENTITY, 0),
                RawEntry::logical_key("TEXT", fields::NAME, 1),
                RawEntry::new("TEXT", fields::TYPE),
                RawEntry::new("TEXT", fields::SCOPE),
                RawEntry::new("BOOL", fields::IS_LOGICAL_KEY),
                RawEntry::new("LONG", fields::LK_ORDER),
                RawEntry::new(ENTITY, fields::REF_ENTITY),
            ],
        ))
        .with_entity(raw(
            INIT_RECORD,
            vec![
                RawEntry::logical_key("TEXT", fields::ENTITY, 0),
                RawEntry::logical_key("TEXT", fields::VERSION_NAME, 1),
                RawEntry::logical_key("LONG", fields::VERSION_NUMBER, 2),
            ],
        ))
        .with_entity(raw(
            FIELD_RESOLUTION,
            vec![
                RawEntry::logical_key(FIELD, fields::FIELD, 0),
                RawEntry::logical_key("TEXT", fields::CODE, 1),
                RawEntry::new("TEXT", fields::VALUE),
            ],
        ))
}

fn raw(name: &str, entries: Vec<RawEntry>) -> RawEntity {
    RawEntity {
        name: name.to_string(),
        entries,
        ..RawEntity::default()
    }
}

/// Whether `entity` is one of the catalog entities.
pub fn is_catalog_entity(entity: &str) -> bool {
    [ENTITY, FIELD, INIT_RECORD, FIELD_RESOLUTION]
        .iter()
        .any(|e| e.eq_ignore_ascii_case(entity))
}
