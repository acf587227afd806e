//! Integration tests for record operations over a started engine.

mod common;

use common::{object, TestContext};
use serde_json::json;
use strata_core::{
    to_flat_map, to_flat_map_with_meta, Error, FieldValue, FilterContext, LogicalKeyValue, State,
};

#[test]
fn test_engine_starts_initialized() {
    let ctx = TestContext::new();
    assert_eq!(ctx.engine.state(), State::Initialized);

    let pet = ctx.engine.schema_manager().get_entity("pet").unwrap();
    assert_eq!(pet.module(), "APP");
    assert!(pet.field("created").is_some());
    assert!(pet.field("modified").is_some());
}

#[test]
fn test_sync_is_idempotent() {
    let ctx = TestContext::new();
    assert!(ctx.engine.sync_storage().unwrap().is_empty());
    assert!(ctx.engine.sync_storage().unwrap().is_empty());
}

#[test]
fn test_catalog_describes_user_entities() {
    let ctx = TestContext::new();
    let entity = ctx.get("ENTITY", "PET");
    assert_eq!(entity.value("module").unwrap().as_text(), Some("APP"));

    let owner = ctx
        .em()
        .get_records_matching("FIELD", &FilterContext::new().with_search("name == owner"))
        .unwrap();
    assert_eq!(owner.len(), 1);
    assert_eq!(owner[0].value("type").unwrap().as_text(), Some("ENTITY_REF"));
}

#[test]
fn test_put_if_absent_rejects_duplicate_key() {
    let ctx = TestContext::new();
    ctx.person("alice", 30, "Oslo");

    let again = ctx.record("PERSON", json!({"name": "alice", "age": 31}));
    let err = ctx.em().put_if_absent(&again).unwrap_err();
    assert!(matches!(err, Error::MultipleLogicalKeyFound { .. }));
    assert_eq!(ctx.get("PERSON", "alice").value("age").unwrap().as_i64(), Some(30));
}

#[test]
fn test_stored_record_has_identity_and_stamps() {
    let ctx = TestContext::new();
    let stored = ctx.person("alice", 30, "Oslo");
    assert!(stored.id().is_some());
    assert!(stored.uuid().is_some());

    let read = ctx.get("PERSON", "alice");
    assert_eq!(read.id(), stored.id());
    assert!(matches!(read.value("created"), Some(FieldValue::DateTime(_))));
}

#[test]
fn test_update_keeps_untouched_fields() {
    let ctx = TestContext::new();
    ctx.person("alice", 30, "Oslo");

    let change = ctx.em().new_record("PERSON").unwrap().with("age", 31).unwrap();
    let key = LogicalKeyValue::single("name", "alice");
    ctx.em().update(&change, &key).unwrap();

    let read = ctx.get("PERSON", "alice");
    assert_eq!(read.value("age").unwrap().as_i64(), Some(31));
    assert_eq!(read.value("city").unwrap().as_text(), Some("Oslo"));
}

#[test]
fn test_update_rejects_logical_key_change() {
    let ctx = TestContext::new();
    ctx.person("alice", 30, "Oslo");

    let change = ctx.record("PERSON", json!({"name": "alicia"}));
    let err = ctx
        .em()
        .update(&change, &LogicalKeyValue::single("name", "alice"))
        .unwrap_err();
    assert!(matches!(err, Error::LogicalKeyChanged { .. }));

    // Restating the current key is not a change.
    let same = ctx.record("PERSON", json!({"name": "alice", "city": "Bergen"}));
    ctx.em()
        .update(&same, &LogicalKeyValue::single("name", "alice"))
        .unwrap();
    assert_eq!(ctx.get("PERSON", "alice").value("city").unwrap().as_text(), Some("Bergen"));
}

#[test]
fn test_update_missing_key() {
    let ctx = TestContext::new();
    let change = ctx.record("PERSON", json!({"age": 1}));
    let err = ctx
        .em()
        .update(&change, &LogicalKeyValue::single("name", "nobody"))
        .unwrap_err();
    assert!(matches!(err, Error::LogicalKeyNotFound { .. }));
}

#[test]
fn test_update_by_uuid() {
    let ctx = TestContext::new();
    let stored = ctx.person("alice", 30, "Oslo");
    let uuid = stored.uuid().unwrap().to_string();

    let change = ctx.record("PERSON", json!({"city": "Tromsø"}));
    ctx.em().update_by_uuid(&change, &uuid).unwrap();
    let read = ctx.em().get_by_uuid("PERSON", &uuid).unwrap();
    assert_eq!(read.value("city").unwrap().as_text(), Some("Tromsø"));

    let err = ctx.em().update_by_uuid(&change, "missing").unwrap_err();
    assert!(matches!(err, Error::IdNotFound { .. }));
}

#[test]
fn test_put_or_update_is_idempotent() {
    let ctx = TestContext::new();
    let record = ctx.record("PERSON", json!({"name": "alice", "age": 30}));
    let first = ctx.em().put_or_update(&record).unwrap();
    let second = ctx.em().put_or_update(&record).unwrap();
    assert_eq!(first.id(), second.id());
    assert_eq!(first.value("modified"), second.value("modified"));
    assert_eq!(to_flat_map_with_meta(&first), to_flat_map_with_meta(&second));

    let stored = ctx.get("PERSON", "alice");
    assert_eq!(to_flat_map_with_meta(&stored), to_flat_map_with_meta(&first));

    let all = ctx
        .em()
        .get_records_matching("PERSON", &FilterContext::new())
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn test_flat_map_round_trip() {
    let ctx = TestContext::new();
    ctx.person("alice", 30, "Oslo");
    ctx.person("bob", 40, "Bergen");
    ctx.put(
        "PET",
        json!({
            "name": "rex",
            "owner": "alice",
            "friends": ["bob", "alice"],
            "address": {"street": "Main 1", "town": "Oslo"},
            "legs": 4,
            "unknown": "ignored"
        }),
    );

    let map = to_flat_map(&ctx.get("PET", "rex"));
    assert_eq!(map["name"], json!("rex"));
    assert_eq!(map["owner"], json!("alice"));
    assert_eq!(map["friends"], json!(["bob", "alice"]));
    assert_eq!(map["address"]["street"], json!("Main 1"));
    assert_eq!(map["legs"], json!(4));
    assert!(!map.contains_key("unknown"));
}

#[test]
fn test_flat_map_round_trip_of_every_kind() {
    let ctx = TestContext::new();
    ctx.person("alice", 30, "Oslo");
    let input = json!({
        "name": "full",
        "title": "Titel",
        "amount": 12.75,
        "ratio": 0.5,
        "active": true,
        "day": "2024-05-01",
        "clock": "10:30:00",
        "stamp": "2024-05-01T10:30:00",
        "tags": ["red", "blue"],
        "extra": {"size": 3, "note": "x"},
        "subject": {"entity": "PERSON", "ref": "alice"}
    });
    let mut with_secret = input.clone();
    with_secret["secret"] = json!("hunter22");
    ctx.put("SAMPLE", with_secret);

    let map = to_flat_map(&ctx.get("SAMPLE", "full"));
    assert_eq!(serde_json::Value::Object(map.clone()), input);
    assert!(!map.contains_key("secret"));
    assert!(!to_flat_map_with_meta(&ctx.get("SAMPLE", "full")).contains_key("secret"));
}

#[test]
fn test_key_parts_containing_separator_stay_distinct() {
    let ctx = TestContext::new();
    let first = ctx.put("PAIR", json!({"aaa": "x|", "bbb": "y"}));
    let second = ctx.put("PAIR", json!({"aaa": "x", "bbb": "|y"}));
    assert_ne!(first.id(), second.id());
    assert_ne!(first.uuid(), second.uuid());

    let all = ctx
        .em()
        .get_records_matching("PAIR", &FilterContext::new())
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn test_missing_reference_is_rejected() {
    let ctx = TestContext::new();
    let pet = ctx.record("PET", json!({"name": "rex", "owner": "ghost"}));
    let err = ctx.em().put_if_absent(&pet).unwrap_err();
    assert!(matches!(err, Error::LogicalKeyNotFound { .. }));
    assert!(ctx
        .em()
        .get("PET", &LogicalKeyValue::single("name", "rex"))
        .is_err());
}

#[test]
fn test_unset_fields_read_as_defaults() {
    let ctx = TestContext::new();
    ctx.put("PET", json!({"name": "rex"}));

    let rex = ctx.get("PET", "rex");
    assert_eq!(rex.value("legs").unwrap().as_i64(), Some(0));
    assert!(rex.value("owner").unwrap().as_reference().unwrap().is_no_reference());
    assert!(rex.value("address").unwrap().is_null());
    assert_eq!(to_flat_map(&rex)["owner"], json!({}));
}

#[test]
fn test_filter_search() {
    let ctx = TestContext::new();
    ctx.person("alice", 30, "Oslo");
    ctx.person("bob", 40, "Oslo");
    ctx.person("carol", 50, "Bergen");

    let count = |search: &str| {
        ctx.em()
            .get_records_matching("PERSON", &FilterContext::new().with_search(search))
            .unwrap()
            .len()
    };
    assert_eq!(count("city == Oslo"), 2);
    assert_eq!(count("city != Oslo"), 1);
    assert_eq!(count("city == Oslo;age == 40"), 1);
    assert_eq!(count("city == Oslo and age == 40"), 1);
    assert_eq!(count("city == Bergen,age == 30"), 2);
    assert_eq!(count("name=in=(alice, carol)"), 2);
    assert_eq!(count("name == nobody"), 0);
}

#[test]
fn test_filter_on_reference_and_unknown_field() {
    let ctx = TestContext::new();
    ctx.person("alice", 30, "Oslo");
    ctx.put("PET", json!({"name": "rex", "owner": "alice"}));
    ctx.put("PET", json!({"name": "tom"}));

    let owned = ctx
        .em()
        .get_records_matching("PET", &FilterContext::new().with_search("owner == alice"))
        .unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].value("name").unwrap().as_text(), Some("rex"));

    let err = ctx
        .em()
        .get_records_matching("PET", &FilterContext::new().with_search("color == red"))
        .unwrap_err();
    assert!(matches!(err, Error::FieldNotFound { .. }));
}

#[test]
fn test_matching_values() {
    let ctx = TestContext::new();
    ctx.person("alice", 30, "Oslo");
    ctx.person("bob", 40, "Oslo");

    let found = ctx
        .em()
        .get_records_matching_values(
            "PERSON",
            &[("city", FieldValue::from("Oslo")), ("age", FieldValue::from(40))],
        )
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].value("name").unwrap().as_text(), Some("bob"));
}

#[test]
fn test_order_by() {
    let ctx = TestContext::new();
    ctx.person("bob", 40, "Oslo");
    ctx.person("alice", 30, "Oslo");
    ctx.person("carol", 50, "Bergen");

    let names = |order: &str| -> Vec<String> {
        ctx.em()
            .get_records_matching("PERSON", &FilterContext::new().with_order_by([order]))
            .unwrap()
            .iter()
            .map(|r| r.value("name").unwrap().as_text().unwrap().to_string())
            .collect()
    };
    assert_eq!(names("name"), vec!["alice", "bob", "carol"]);
    assert_eq!(names("-age"), vec!["carol", "bob", "alice"]);
}

#[test]
fn test_pagination() {
    let ctx = TestContext::new();
    // 97 is coprime with 160, so this visits every code out of order.
    for step in 0..160i64 {
        let code = step * 97 % 160 + 1;
        ctx.put("ITEM", json!({"code": code, "label": format!("item {code}")}));
    }

    let page = |limit: u64, start: u64| {
        ctx.em()
            .get_records_matching(
                "ITEM",
                &FilterContext::new().with_limit(limit).with_start(start),
            )
            .unwrap()
    };
    let codes = |records: &[strata_core::EntityRecord]| -> Vec<i64> {
        records
            .iter()
            .map(|r| r.value("code").unwrap().as_i64().unwrap())
            .collect()
    };
    let first = page(50, 0);
    assert_eq!(codes(&first), (1..=50).collect::<Vec<_>>());
    assert_eq!(codes(&page(50, 150)), (151..=160).collect::<Vec<_>>());
    assert_eq!(page(0, 0).len(), 160);
    assert!(page(50, 200).is_empty());
}

#[test]
fn test_filter_context_from_params() {
    let ctx = TestContext::new();
    for code in 1..=5i64 {
        ctx.put("ITEM", json!({"code": code}));
    }
    let context = ctx
        .engine
        .filter_context_builder()
        .from_params([("search", "code > 2"), ("orderBy", "-code"), ("limit", "2")])
        .unwrap();
    let items = ctx.em().get_records_matching("ITEM", &context).unwrap();
    let codes: Vec<_> = items.iter().map(|r| r.value("code").unwrap().as_i64()).collect();
    assert_eq!(codes, vec![Some(5), Some(4)]);
}

#[test]
fn test_one_record_entity() {
    let ctx = TestContext::new();
    let settings = ctx.em().get_one_record("SETTINGS").unwrap();
    assert_eq!(settings.value("theme").unwrap().as_text(), Some("dark"));

    let change = ctx.record("SETTINGS", json!({"theme": "light"}));
    ctx.em().update_one_record(&change).unwrap();
    let settings = ctx.em().get_one_record("SETTINGS").unwrap();
    assert_eq!(settings.value("theme").unwrap().as_text(), Some("light"));
    assert_eq!(settings.value("pageSize").unwrap().as_i64(), Some(20));

    let err = ctx.em().get_one_record("PERSON").unwrap_err();
    assert!(matches!(err, Error::InvalidSchema { .. }));
}

#[test]
fn test_seed_records_applied() {
    let ctx = TestContext::new();
    assert_eq!(ctx.get("COLOR", "red").value("hex").unwrap().as_text(), Some("#ff0000"));

    let applied = ctx
        .em()
        .get_records_matching("INITRECORD", &FilterContext::new().with_search("entity == COLOR"))
        .unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].value("versionName").unwrap().as_text(), Some("base"));
}

#[test]
fn test_seed_records_applied_once_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strata.db");
    {
        let ctx = TestContext::on_disk(&path);
        let change = ctx.record("COLOR", json!({"hex": "#aa0000"}));
        ctx.em()
            .update(&change, &LogicalKeyValue::single("name", "red"))
            .unwrap();
        ctx.em().delete("COLOR", &LogicalKeyValue::single("name", "green")).unwrap();
    }

    let ctx = TestContext::on_disk(&path);
    assert_eq!(ctx.get("COLOR", "red").value("hex").unwrap().as_text(), Some("#aa0000"));
    assert!(ctx
        .em()
        .get("COLOR", &LogicalKeyValue::single("name", "green"))
        .is_err());
    assert!(ctx.engine.sync_storage().unwrap().is_empty());
}

#[test]
fn test_record_from_flat_map_rejects_bad_value() {
    let ctx = TestContext::new();
    let err = ctx
        .em()
        .record_from_flat_map("PERSON", &object(json!({"name": "alice", "age": "old"})))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidFieldValue { .. }));
}
