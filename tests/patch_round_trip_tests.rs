/// delta -> query_from_update_set -> store, checked against the live instance
///
/// Run with: cargo test --test patch_round_trip_tests

use memodoc::{
    Action, ChangeSet, EntityDefinition, EntityType, FindOptions, Instance, MemoryStore,
    PropertyDefinition, SchemaRegistry, SecurityContext, StoreDriver,
};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

fn registry() -> Arc<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            EntityDefinition::structure("Line")
                .property(PropertyDefinition::string("sku"))
                .property(PropertyDefinition::number("qty"))
                .property(PropertyDefinition::number("price").secure(Action::Update, &["Admin"])),
        )
        .unwrap();
    registry
        .register(EntityDefinition::structure("Address").property(PropertyDefinition::string("city")))
        .unwrap();
    registry
        .register(
            EntityDefinition::document("Order")
                .property(PropertyDefinition::string("status"))
                .property(PropertyDefinition::string("note"))
                .property(PropertyDefinition::string("approved_by").secure(Action::Update, &["Admin"]))
                .property(PropertyDefinition::structure("ship_to", "Address"))
                .property(PropertyDefinition::structure("lines", "Line").array())
                .property(PropertyDefinition::string("tags").array()),
        )
        .unwrap();
    Arc::new(registry)
}

fn stored_order() -> JsonValue {
    json!({
        "_id": "o1",
        "status": "open",
        "note": "leave at door",
        "approved_by": "nobody",
        "ship_to": {"_mg": "S", "city": "Oslo"},
        "lines": [
            {"_mg": "A", "sku": "apple", "qty": 1, "price": 3},
            {"_mg": "B", "sku": "pear", "qty": 2, "price": 4}
        ],
        "tags": ["new", "web"]
    })
}

async fn seeded() -> (Arc<SchemaRegistry>, EntityType, MemoryStore) {
    let registry = registry();
    let orders = registry.entity_type("Order").unwrap();
    let store = MemoryStore::new();
    store.insert("Order", stored_order()).await.unwrap();
    (registry, orders, store)
}

async fn commit(orders: &EntityType, store: &MemoryStore, instance: &Instance) -> JsonValue {
    let delta = orders.delta(instance).unwrap();
    let ops = orders.query_from_update_set(&delta, None).unwrap();
    store
        .find_one_and_update("Order", &json!({"_id": "o1"}), &ops, &FindOptions::new())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_round_trip_reproduces_instance() {
    let (_registry, orders, store) = seeded().await;
    let order = orders.instantiate(stored_order()).unwrap();

    order.set("status", "shipped").unwrap();
    order.unset("note").unwrap();
    order.child("ship_to").unwrap().set("city", "Bergen").unwrap();
    order.element("lines", &json!("A")).unwrap().set("qty", 5i64).unwrap();
    order.pull_identity("lines", &json!("B")).unwrap();
    order.push("lines", json!({"_mg": "C", "sku": "plum", "qty": 1})).unwrap();
    order.pull_identity("tags", &json!("new")).unwrap();
    order.push("tags", "gift").unwrap();

    let stored = commit(&orders, &store, &order).await;
    assert_eq!(stored, order.to_json());
}

#[tokio::test]
async fn test_round_trip_of_empty_delta_is_a_no_op() {
    let (_registry, orders, store) = seeded().await;
    let order = orders.instantiate(stored_order()).unwrap();
    order.push("tags", "tmp").unwrap();
    order.pull_identity("tags", &json!("tmp")).unwrap();

    let delta = orders.delta(&order).unwrap();
    assert!(delta.is_empty());
    assert!(orders.query_from_update_set(&delta, None).unwrap().is_empty());

    let stored = store
        .find_one("Order", &json!({"_id": "o1"}), &FindOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, stored_order());
}

#[tokio::test]
async fn test_client_update_set_applied_with_field_security() {
    let (_registry, orders, store) = seeded().await;

    // Client side: edits made on its own copy, shipped as an UpdateSet.
    let client = orders.instantiate(stored_order()).unwrap();
    client.set("status", "paid").unwrap();
    client.set("approved_by", "mallory").unwrap();
    client.element("lines", &json!("A")).unwrap().set("qty", 9i64).unwrap();
    client.element("lines", &json!("A")).unwrap().set("price", 0i64).unwrap();
    let wire = serde_json::to_string(&client.delta()).unwrap();

    // Server side: a fresh instance from the store, patched as a plain user.
    let update: ChangeSet = serde_json::from_str(&wire).unwrap();
    let server = orders.instantiate(stored_order()).unwrap();
    orders
        .patch(&SecurityContext::for_user("u1", &["User"]), &server, &update, None)
        .unwrap();
    let stored = commit(&orders, &store, &server).await;

    assert_eq!(stored["status"], json!("paid"));
    assert_eq!(stored["approved_by"], json!("nobody"));
    assert_eq!(stored["lines"][0]["qty"], json!(9));
    assert_eq!(stored["lines"][0]["price"], json!(3));
    assert_eq!(stored["lines"][1], stored_order()["lines"][1]);
    assert_eq!(stored, server.to_json());
}

#[tokio::test]
async fn test_second_window_after_reset() {
    let (_registry, orders, store) = seeded().await;
    let order = orders.instantiate(stored_order()).unwrap();

    order.set("status", "packed").unwrap();
    commit(&orders, &store, &order).await;
    order.reset();

    order.push("tags", "late").unwrap();
    let delta = orders.delta(&order).unwrap();
    assert_eq!(delta.names().collect::<Vec<_>>(), vec!["tags"]);

    let stored = commit(&orders, &store, &order).await;
    assert_eq!(stored, order.to_json());
    assert_eq!(stored["status"], json!("packed"));
}
