//! Command execution against a started engine.

use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use strata_core::{logical_key_from_json, to_flat_map_with_meta, Engine, LogicalKeyValue, Module};
use tracing::{debug, info};

use crate::config::Command;
use crate::error::{Error, Result};

/// Load the module list of a schema file.
///
/// The file holds either a JSON array of modules or a single module.
pub fn load_modules(path: &Path) -> Result<Vec<Module>> {
    let text = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)?;
    let modules = match value {
        Value::Array(_) => serde_json::from_value(value)?,
        Value::Object(_) => vec![serde_json::from_value(value)?],
        _ => {
            return Err(Error::Config(format!(
                "{} must hold a module or a list of modules",
                path.display()
            )))
        }
    };
    debug!(path = %path.display(), "modules loaded");
    Ok(modules)
}

/// Run `command` and return its JSON output.
pub fn execute(engine: &Engine, command: &Command) -> Result<Value> {
    let em = engine.entity_manager();
    match command {
        Command::Sync => {
            let report = engine.sync_storage()?;
            info!(ddl = report.ddl_count(), "storage synchronized");
            Ok(json!({
                "tablesCreated": report.tables_created,
                "columnsAdded": report.columns_added,
                "domainsCreated": report.domains_created,
            }))
        }
        Command::Get { entity, key } => {
            let key = parse_key(engine, entity, key)?;
            let record = em.get(entity, &key)?;
            Ok(Value::Object(to_flat_map_with_meta(&record)))
        }
        Command::List {
            entity,
            search,
            order_by,
            limit,
            start,
        } => {
            let limit = limit.map(|l| l.to_string());
            let start = start.map(|s| s.to_string());
            let params = [
                ("search", search.as_deref()),
                ("orderBy", order_by.as_deref()),
                ("limit", limit.as_deref()),
                ("start", start.as_deref()),
            ];
            let context = engine.filter_context_builder().from_params(
                params
                    .iter()
                    .filter_map(|(name, value)| value.map(|v| (*name, v))),
            )?;
            let records = em.get_records_matching(entity, &context)?;
            Ok(Value::Array(
                records
                    .iter()
                    .map(|r| Value::Object(to_flat_map_with_meta(r)))
                    .collect(),
            ))
        }
        Command::Put {
            entity,
            record,
            insert,
        } => {
            let Value::Object(map) = serde_json::from_str::<Value>(record)? else {
                return Err(Error::Config(format!("record for {entity} must be a JSON object")));
            };
            let record = em.record_from_flat_map(entity, &map)?;
            let stored = if *insert {
                em.put_if_absent(&record)?
            } else {
                em.put_or_update(&record)?
            };
            Ok(Value::Object(to_flat_map_with_meta(&stored)))
        }
        Command::Delete { entity, key } => {
            let key = parse_key(engine, entity, key)?;
            let result = em.delete(entity, &key)?;
            Ok(json!({
                "deleted": result
                    .deleted_records
                    .iter()
                    .map(|r| json!({"entity": r.entity, "id": r.id}))
                    .collect::<Vec<_>>(),
                "nullified": result
                    .nullified_fields
                    .iter()
                    .map(|f| json!({"entity": f.entity, "field": f.field, "id": f.record_id}))
                    .collect::<Vec<_>>(),
            }))
        }
    }
}

/// A logical key given as JSON, or as a bare string for single-column keys.
fn parse_key(engine: &Engine, entity: &str, text: &str) -> Result<LogicalKeyValue> {
    let entity = engine.schema_manager().get_entity(entity)?;
    let json = serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()));
    Ok(logical_key_from_json(&entity, &json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::EngineConfig;

    const MODULES: &str = r#"[
        {
            "name": "APP",
            "order": 10,
            "schema": {
                "entities": [
                    {
                        "name": "PERSON",
                        "entries": [
                            {"type": "TEXT", "name": "name", "isLogicalKey": true},
                            {"type": "LONG", "name": "age"}
                        ]
                    }
                ]
            }
        }
    ]"#;

    fn engine() -> Engine {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules.json");
        fs::write(&path, MODULES).unwrap();
        let modules = load_modules(&path).unwrap();
        Engine::start(EngineConfig::in_memory(), modules).unwrap()
    }

    fn put(engine: &Engine, record: &str) -> Value {
        let command = Command::Put {
            entity: "PERSON".to_string(),
            record: record.to_string(),
            insert: false,
        };
        execute(engine, &command).unwrap()
    }

    #[test]
    fn test_load_modules() {
        let engine = engine();
        assert!(engine.schema_manager().get_entity("PERSON").is_ok());
    }

    #[test]
    fn test_put_get_list_delete() {
        let engine = engine();
        put(&engine, r#"{"name": "alice", "age": 30}"#);
        put(&engine, r#"{"name": "bob", "age": 40}"#);
        put(&engine, r#"{"name": "alice", "age": 31}"#);

        let get = Command::Get {
            entity: "PERSON".to_string(),
            key: "alice".to_string(),
        };
        assert_eq!(execute(&engine, &get).unwrap()["age"], json!(31));

        let list = Command::List {
            entity: "PERSON".to_string(),
            search: Some("age > 35".to_string()),
            order_by: None,
            limit: None,
            start: None,
        };
        let listed = execute(&engine, &list).unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["name"], json!("bob"));

        let delete = Command::Delete {
            entity: "PERSON".to_string(),
            key: r#"{"name": "bob"}"#.to_string(),
        };
        let deleted = execute(&engine, &delete).unwrap();
        assert_eq!(deleted["deleted"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_insert_rejects_existing_key() {
        let engine = engine();
        put(&engine, r#"{"name": "alice"}"#);
        let command = Command::Put {
            entity: "PERSON".to_string(),
            record: r#"{"name": "alice"}"#.to_string(),
            insert: true,
        };
        let err = execute(&engine, &command).unwrap_err();
        assert!(matches!(
            err,
            Error::Engine(strata_core::Error::MultipleLogicalKeyFound { .. })
        ));
    }

    #[test]
    fn test_sync_reports_nothing_after_start() {
        let engine = engine();
        let report = execute(&engine, &Command::Sync).unwrap();
        assert_eq!(report["tablesCreated"], json!(0));
    }

    #[test]
    fn test_non_object_record_rejected() {
        let engine = engine();
        let command = Command::Put {
            entity: "PERSON".to_string(),
            record: "[1, 2]".to_string(),
            insert: false,
        };
        assert!(matches!(execute(&engine, &command), Err(Error::Config(_))));
    }
}
