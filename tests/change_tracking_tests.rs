/// Change tracking across nested instances
///
/// Run with: cargo test --test change_tracking_tests

use memodoc::{Change, EntityDefinition, Instance, PropertyDefinition, SchemaRegistry};
use serde_json::json;
use std::sync::Arc;

fn registry() -> Arc<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            EntityDefinition::structure("Address")
                .property(PropertyDefinition::string("street"))
                .property(PropertyDefinition::string("city")),
        )
        .unwrap();
    registry
        .register(
            EntityDefinition::structure("Phone")
                .property(PropertyDefinition::string("kind"))
                .property(PropertyDefinition::string("number")),
        )
        .unwrap();
    registry
        .register(
            EntityDefinition::document("Contact")
                .property(PropertyDefinition::string("name"))
                .property(PropertyDefinition::locale_string("title"))
                .property(PropertyDefinition::structure("home", "Address"))
                .property(PropertyDefinition::structure("phones", "Phone").array())
                .property(PropertyDefinition::string("tags").array()),
        )
        .unwrap();
    Arc::new(registry)
}

fn contact(registry: &Arc<SchemaRegistry>) -> Instance {
    Instance::new(
        registry,
        "Contact",
        json!({
            "_id": "c1",
            "name": "Ann",
            "home": {"_mg": "H", "street": "Main", "city": "Oslo"},
            "phones": [{"_mg": "X", "kind": "work"}, {"_mg": "Y", "kind": "home"}],
            "tags": ["a", "b"]
        }),
    )
    .unwrap()
}

#[test]
fn test_fresh_instance_has_no_changes() {
    let registry = registry();
    let c = contact(&registry);
    assert!(c.changes().is_empty());
    assert!(c.delta().is_empty());
}

#[test]
fn test_scalar_set_and_unset_recorded() {
    let registry = registry();
    let c = contact(&registry);

    c.set("name", "Bea").unwrap();
    assert!(c.has_changed("name"));
    c.unset("tags").unwrap();

    assert_eq!(
        c.delta().to_json(),
        json!({
            "name": {"cmd": "set", "val": "Bea"},
            "tags": {"cmd": "unset"}
        })
    );
}

#[test]
fn test_unknown_property_is_ignored() {
    let registry = registry();
    let c = contact(&registry);
    c.set("nickname", "A").unwrap();
    assert!(c.get("nickname").is_none());
    assert!(c.delta().is_empty());
}

#[test]
fn test_child_edit_propagates_as_sub() {
    let registry = registry();
    let c = contact(&registry);
    c.child("home").unwrap().set("city", "Bergen").unwrap();

    assert!(c.has_changed("home"));
    assert_eq!(
        c.delta().to_json(),
        json!({"home": {"cmd": "sub", "val": {"city": {"cmd": "set", "val": "Bergen"}}}})
    );
}

#[test]
fn test_array_push_then_remove_cancels_out() {
    let registry = registry();
    let c = contact(&registry);

    c.push("phones", json!({"_mg": "Z", "kind": "fax"})).unwrap();
    c.pull_identity("phones", &json!("Z")).unwrap();
    c.push("tags", "c").unwrap();
    c.pull_identity("tags", &json!("c")).unwrap();

    assert!(c.delta().is_empty());
}

#[test]
fn test_array_identity_correctness() {
    let registry = registry();
    let c = Instance::new(&registry, "Contact", json!({"phones": [{"_mg": "A"}, {"_mg": "B"}]})).unwrap();

    c.pull_identity("phones", &json!("B")).unwrap();
    c.push("phones", json!({"_mg": "C"})).unwrap();

    assert_eq!(
        c.delta().to_json(),
        json!({"phones": {
            "cmd": "array",
            "push": [{"_mg": "C"}],
            "pull": [{"identity": "_mg", "val": "B"}],
            "sub": {}
        }})
    );
}

#[test]
fn test_element_edit_and_membership_change_together() {
    let registry = registry();
    let c = contact(&registry);

    c.element("phones", &json!("X")).unwrap().set("number", "555").unwrap();
    c.pull_where("tags", |v| v.as_str() == Some("a")).unwrap();

    let delta = c.delta().to_json();
    assert_eq!(
        delta["phones"]["sub"],
        json!({"X": {"number": {"cmd": "set", "val": "555"}}})
    );
    assert_eq!(delta["tags"]["pull"], json!([{"identity": "", "val": "a"}]));
    assert_eq!(delta["tags"]["push"], json!([]));
}

#[test]
fn test_whole_array_set_wins_over_reconciliation() {
    let registry = registry();
    let c = contact(&registry);

    c.set("tags", json!(["z"])).unwrap();
    c.push("tags", "y").unwrap();

    match c.delta().get("tags") {
        Some(Change::Set(value)) => assert_eq!(value.to_json(), json!(["z", "y"])),
        other => panic!("expected set, got {:?}", other),
    }
}

#[test]
fn test_reset_starts_a_new_window() {
    let registry = registry();
    let c = contact(&registry);

    c.set("name", "Bea").unwrap();
    c.child("home").unwrap().set("street", "Side").unwrap();
    c.push("tags", "c").unwrap();
    c.reset();
    assert!(c.delta().is_empty());

    c.pull_identity("tags", &json!("c")).unwrap();
    assert_eq!(c.delta().to_json()["tags"]["pull"], json!([{"identity": "", "val": "c"}]));
}

#[test]
fn test_locale_value_edits_current_locale() {
    let registry = registry();
    let c = Instance::new(&registry, "Contact", json!({"title": "Doctor"})).unwrap();
    assert_eq!(c.get_localized("title").as_deref(), Some("Doctor"));

    c.set_locale("fr").unwrap();
    c.set("title", "Docteur").unwrap();

    assert_eq!(c.get_localized("title").as_deref(), Some("Docteur"));
    assert_eq!(c.to_json()["title"], json!({"en": "Doctor", "fr": "Docteur"}));
    assert!(c.set_locale("xx").is_err());
}

#[test]
fn test_deep_clone_is_detached() {
    let registry = registry();
    let c = contact(&registry);
    let copy = c.deep_clone().unwrap();

    copy.child("home").unwrap().set("city", "Rome").unwrap();
    assert_eq!(c.child("home").unwrap().get_str("city").as_deref(), Some("Oslo"));
    assert!(c.delta().is_empty());
    assert!(!copy.delta().is_empty());
}
