//! Shared fixture for the engine integration tests.

#![allow(dead_code)]

use std::path::Path;

use serde_json::{json, Map, Value};
use strata_core::{
    Engine, EngineConfig, EntityManager, EntityRecord, LogicalKeyValue, Module, RawEntityBuilder,
    RawEntityRecords, RawRecordVersion, RawRecords, RawSchema,
};

pub struct TestContext {
    pub engine: Engine,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::in_memory())
    }

    pub fn on_disk(path: &Path) -> Self {
        Self::with_config(EngineConfig::in_memory().with_database_path(path))
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let engine = Engine::start(config, vec![app_module()]).unwrap();
        Self { engine }
    }

    pub fn em(&self) -> &EntityManager {
        self.engine.entity_manager()
    }

    pub fn record(&self, entity: &str, value: Value) -> EntityRecord {
        self.em().record_from_flat_map(entity, &object(value)).unwrap()
    }

    pub fn put(&self, entity: &str, value: Value) -> EntityRecord {
        let record = self.record(entity, value);
        self.em().put_if_absent(&record).unwrap()
    }

    pub fn person(&self, name: &str, age: i64, city: &str) -> EntityRecord {
        self.put("PERSON", json!({"name": name, "age": age, "city": city}))
    }

    pub fn get(&self, entity: &str, name: &str) -> EntityRecord {
        self.em().get(entity, &LogicalKeyValue::single("name", name)).unwrap()
    }

    pub fn set_policy(&self, entity: &str, field: &str, policy: &str) {
        let record = self.record(
            "FIELDRESOLUTION",
            json!({"field": {"entity": entity, "name": field}, "code": "DELETE", "value": policy}),
        );
        self.em().put_or_update(&record).unwrap();
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// PERSON and PET with references, an embedded ADDRESS, a single-record
/// SETTINGS entity, ITEM for paging, PAIR with a two-column key, TAG with a
/// generic reference, SAMPLE with one field of every other kind and a
/// seeded COLOR table.
pub fn app_module() -> Module {
    let schema = RawSchema::default()
        .with_entity(
            RawEntityBuilder::new("PERSON")
                .lk_entry("TEXT", "name")
                .entry("LONG", "age")
                .entry("TEXT", "city")
                .build()
                .unwrap(),
        )
        .with_entity(
            RawEntityBuilder::new("ADDRESS")
                .embedable()
                .entry("TEXT", "street")
                .entry("TEXT", "town")
                .build()
                .unwrap(),
        )
        .with_entity(
            RawEntityBuilder::new("PET")
                .lk_entry("TEXT", "name")
                .entry("PERSON", "owner")
                .entry("[PERSON]", "friends")
                .entry("ADDRESS", "address")
                .entry("LONG", "legs")
                .build()
                .unwrap(),
        )
        .with_entity(
            RawEntityBuilder::new("SETTINGS")
                .one_record()
                .entry("TEXT", "theme")
                .entry("LONG", "pageSize")
                .build()
                .unwrap(),
        )
        .with_entity(
            RawEntityBuilder::new("ITEM")
                .lk_entry("LONG", "code")
                .entry("TEXT", "label")
                .build()
                .unwrap(),
        )
        .with_entity(
            RawEntityBuilder::new("PAIR")
                .lk_entry("TEXT", "aaa")
                .lk_entry("TEXT", "bbb")
                .build()
                .unwrap(),
        )
        .with_entity(
            RawEntityBuilder::new("TAG")
                .lk_entry("TEXT", "name")
                .entry("GENERIC_ENTITY_REF", "target")
                .build()
                .unwrap(),
        )
        .with_entity(
            RawEntityBuilder::new("SAMPLE")
                .lk_entry("TEXT", "name")
                .entry("TRANSL_TEXT", "title")
                .entry("NUMBER", "amount")
                .entry("DOUBLE", "ratio")
                .entry("BOOL", "active")
                .entry("DATE", "day")
                .entry("TIME", "clock")
                .entry("DATETIME", "stamp")
                .entry("[TEXT]", "tags")
                .entry("RECORD", "extra")
                .entry("PASSWORD", "secret")
                .entry("GENERIC_ENTITY_REF", "subject")
                .build()
                .unwrap(),
        )
        .with_entity(
            RawEntityBuilder::new("COLOR")
                .lk_entry("TEXT", "name")
                .entry("TEXT", "hex")
                .build()
                .unwrap(),
        );

    let records = RawRecords::default()
        .with_entity(
            RawEntityRecords::new("SETTINGS")
                .with_default_record(object(json!({"theme": "dark", "pageSize": 20}))),
        )
        .with_entity(RawEntityRecords::new("COLOR").with_version(RawRecordVersion::new(
            "base",
            1,
            vec![
                object(json!({"name": "red", "hex": "#ff0000"})),
                object(json!({"name": "green", "hex": "#00ff00"})),
            ],
        )));

    Module::new("app", 10)
        .editable()
        .with_schema(schema)
        .with_records(records)
}
