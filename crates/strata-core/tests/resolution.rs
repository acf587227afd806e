//! Integration tests for reference resolution on delete.

mod common;

use common::TestContext;
use serde_json::json;
use strata_core::{to_flat_map, Error, LogicalKeyValue};

fn alice() -> LogicalKeyValue {
    LogicalKeyValue::single("name", "alice")
}

fn setup_pets(ctx: &TestContext) {
    ctx.person("alice", 30, "Oslo");
    ctx.person("bob", 40, "Bergen");
    ctx.put("PET", json!({"name": "rex", "owner": "alice", "friends": ["alice", "bob"]}));
    ctx.put("PET", json!({"name": "tom", "owner": "bob"}));
}

#[test]
fn test_delete_unreferenced_record() {
    let ctx = TestContext::new();
    ctx.person("carol", 50, "Oslo");

    let result = ctx
        .em()
        .delete("PERSON", &LogicalKeyValue::single("name", "carol"))
        .unwrap();
    assert_eq!(result.deleted_records.len(), 1);
    assert!(result.nullified_fields.is_empty());

    let err = ctx
        .em()
        .get("PERSON", &LogicalKeyValue::single("name", "carol"))
        .unwrap_err();
    assert!(matches!(err, Error::LogicalKeyNotFound { .. }));
}

#[test]
fn test_delete_missing_record() {
    let ctx = TestContext::new();
    let err = ctx.em().delete("PERSON", &alice()).unwrap_err();
    assert!(matches!(err, Error::LogicalKeyNotFound { .. }));
}

#[test]
fn test_default_policy_clears_references() {
    let ctx = TestContext::new();
    setup_pets(&ctx);

    let result = ctx.em().delete("PERSON", &alice()).unwrap();
    assert_eq!(result.deleted_records.len(), 1);
    assert_eq!(result.deleted_records[0].entity, "PERSON");
    assert_eq!(result.nullified_fields.len(), 2);

    let rex = ctx.get("PET", "rex");
    assert!(rex.value("owner").unwrap().as_reference().unwrap().is_no_reference());
    let map = to_flat_map(&rex);
    assert_eq!(map["owner"], json!({}));
    assert_eq!(map["friends"], json!(["bob"]));

    // Unrelated records are untouched.
    let tom = to_flat_map(&ctx.get("PET", "tom"));
    assert_eq!(tom["owner"], json!("bob"));
}

#[test]
fn test_restrict_policy_rejects_delete() {
    let ctx = TestContext::new();
    setup_pets(&ctx);
    ctx.set_policy("PET", "owner", "RESTRICT");

    let err = ctx.em().delete("PERSON", &alice()).unwrap_err();
    assert!(matches!(err, Error::ResolutionRestricted { .. }));

    // The failed delete leaves every record in place.
    assert_eq!(ctx.get("PERSON", "alice").value("age").unwrap().as_i64(), Some(30));
    let rex = to_flat_map(&ctx.get("PET", "rex"));
    assert_eq!(rex["owner"], json!("alice"));
    assert_eq!(rex["friends"], json!(["alice", "bob"]));
}

#[test]
fn test_delete_policy_cascades() {
    let ctx = TestContext::new();
    setup_pets(&ctx);
    ctx.set_policy("PET", "owner", "DELETE");

    let result = ctx.em().delete("PERSON", &alice()).unwrap();
    let deleted: Vec<_> = result
        .deleted_records
        .iter()
        .map(|r| r.entity.as_str())
        .collect();
    assert_eq!(deleted, vec!["PET", "PERSON"]);

    assert!(ctx
        .em()
        .get("PET", &LogicalKeyValue::single("name", "rex"))
        .is_err());
    assert!(ctx
        .em()
        .get("PET", &LogicalKeyValue::single("name", "tom"))
        .is_ok());
}

#[test]
fn test_policy_codes_ignore_case() {
    let ctx = TestContext::new();
    setup_pets(&ctx);
    ctx.set_policy("PET", "owner", "restrict");

    let err = ctx.em().delete("PERSON", &alice()).unwrap_err();
    assert!(matches!(err, Error::ResolutionRestricted { .. }));
}

#[test]
fn test_delete_by_uuid() {
    let ctx = TestContext::new();
    let stored = ctx.person("alice", 30, "Oslo");
    let uuid = stored.uuid().unwrap().to_string();

    let result = ctx.em().delete_by_uuid("PERSON", &uuid).unwrap();
    assert_eq!(result.affected_count(), 1);

    let err = ctx.em().delete_by_uuid("PERSON", &uuid).unwrap_err();
    assert!(matches!(err, Error::IdNotFound { .. }));
}

#[test]
fn test_deleting_embedding_record_removes_embedded() {
    let ctx = TestContext::new();
    ctx.put(
        "PET",
        json!({"name": "rex", "address": {"street": "Main 1", "town": "Oslo"}}),
    );

    let result = ctx
        .em()
        .delete("PET", &LogicalKeyValue::single("name", "rex"))
        .unwrap();
    assert_eq!(result.deleted_records.len(), 1);

    let addresses = ctx
        .em()
        .get_records_matching("ADDRESS", &strata_core::FilterContext::new())
        .unwrap();
    assert!(addresses.is_empty());
}

#[test]
fn test_generic_reference_is_cleared_on_delete() {
    let ctx = TestContext::new();
    ctx.person("alice", 30, "Oslo");
    ctx.person("bob", 40, "Bergen");
    ctx.put("TAG", json!({"name": "fav", "target": {"entity": "PERSON", "ref": "alice"}}));
    ctx.put("TAG", json!({"name": "other", "target": {"entity": "PERSON", "ref": "bob"}}));

    let read = to_flat_map(&ctx.get("TAG", "fav"));
    assert_eq!(read["target"], json!({"entity": "PERSON", "ref": "alice"}));
    let reference = ctx.get("TAG", "fav").value("target").unwrap();
    assert_eq!(reference.as_reference().unwrap().entity(), "PERSON");

    let result = ctx.em().delete("PERSON", &alice()).unwrap();
    assert_eq!(result.deleted_records.len(), 1);
    assert_eq!(result.nullified_fields.len(), 1);
    assert_eq!(result.nullified_fields[0].entity, "TAG");
    assert_eq!(result.nullified_fields[0].field, "target");

    let fav = ctx.get("TAG", "fav");
    assert!(fav.value("target").unwrap().as_reference().unwrap().is_no_reference());
    assert_eq!(to_flat_map(&fav)["target"], json!({}));
    assert_eq!(
        to_flat_map(&ctx.get("TAG", "other"))["target"],
        json!({"entity": "PERSON", "ref": "bob"})
    );
}
