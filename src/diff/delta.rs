use crate::core::{FieldValue, IdentityRule};
use crate::model::{ArrayChange, Change, ChangeSet, Instance, PullEntry};
use std::collections::BTreeSet;

/// Key used to compare array elements; elements without an identity
/// fall back to their serialized form.
fn element_key(rule: IdentityRule, value: &FieldValue) -> String {
    rule.identity_key(value)
        .unwrap_or_else(|| value.to_json().to_string())
}

impl Instance {
    /// Finalizes and returns the pending changes.
    ///
    /// Arrays not replaced wholesale are reconciled against the last
    /// snapshot by identity, nested aggregates are visited even when the
    /// intermediate level was never assigned, and `set` entries pick up
    /// the current value.
    pub fn delta(&self) -> ChangeSet {
        let entity = self.entity().clone();
        let mut changes = self.changes();

        for property in entity.properties() {
            let name = property.name();
            if changes.get(name).is_some_and(Change::is_wholesale) {
                continue;
            }

            if property.is_array() {
                let registered: Vec<String> = match changes.get(name) {
                    Some(Change::Array(array)) => array.sub.keys().cloned().collect(),
                    _ => Vec::new(),
                };
                let current = self.elements(name);
                let snapshot = self
                    .state()
                    .array_snapshot
                    .get(name)
                    .cloned()
                    .unwrap_or_default();

                let array = reconcile(property.identity_rule(), &current, &snapshot, &registered);
                if array.is_empty() {
                    changes.remove(name);
                } else {
                    changes.insert(name, Change::Array(array));
                }
            } else if property.is_sub_document() {
                match self.child(name).map(|child| child.delta()) {
                    Some(sub) if !sub.is_empty() => {
                        changes.insert(name, Change::Sub(sub));
                    }
                    _ => {
                        changes.remove(name);
                    }
                }
            }
        }

        let wholesale: Vec<String> = changes
            .iter()
            .filter(|(_, change)| matches!(change, Change::Set(_)))
            .map(|(name, _)| name.clone())
            .collect();
        for name in wholesale {
            match self.get(&name) {
                Some(value) => changes.insert(name, Change::Set(value)),
                None => changes.insert(name, Change::Unset),
            };
        }

        self.state_mut().changes = changes.clone();
        changes
    }
}

fn reconcile(
    rule: IdentityRule,
    current: &[FieldValue],
    snapshot: &[FieldValue],
    registered: &[String],
) -> ArrayChange {
    let before: BTreeSet<String> = snapshot.iter().map(|v| element_key(rule, v)).collect();
    let after: BTreeSet<String> = current.iter().map(|v| element_key(rule, v)).collect();
    let mut array = ArrayChange::default();

    for value in current {
        if !before.contains(&element_key(rule, value)) {
            array.push.push(value.clone());
        }
    }

    for value in snapshot {
        if after.contains(&element_key(rule, value)) {
            continue;
        }
        if let Some(val) = rule.identity_of(value) {
            array.pull.push(PullEntry {
                identity: rule.path().to_string(),
                val,
            });
        }
    }

    for key in registered {
        if !before.contains(key) {
            continue;
        }
        let element = current
            .iter()
            .find(|v| rule.identity_key(v).as_deref() == Some(key.as_str()))
            .and_then(FieldValue::as_instance);
        if let Some(element) = element {
            let sub = element.delta();
            if !sub.is_empty() {
                array.sub.insert(key.clone(), sub);
            }
        }
    }

    array
}

#[cfg(test)]
mod tests {
    use crate::model::{Change, Instance};
    use crate::schema::{EntityDefinition, PropertyDefinition, SchemaRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> Arc<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        registry
            .register(EntityDefinition::structure("Item").property(PropertyDefinition::number("qty")))
            .unwrap();
        registry
            .register(
                EntityDefinition::document("Cart")
                    .property(PropertyDefinition::structure("items", "Item").array())
                    .property(PropertyDefinition::string("labels").array())
                    .property(PropertyDefinition::reference("owners", "User").array())
                    .property(PropertyDefinition::structure("main", "Item")),
            )
            .unwrap();
        registry.register(EntityDefinition::document("User")).unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_push_then_pull_cancels_out() {
        let registry = registry();
        let cart = Instance::new(&registry, "Cart", json!({"items": [{"_mg": "X"}, {"_mg": "Y"}]})).unwrap();
        cart.push("items", json!({"_mg": "Z"})).unwrap();
        cart.pull_identity("items", &json!("Z")).unwrap();
        assert!(cart.delta().is_empty());
    }

    #[test]
    fn test_identity_push_and_pull() {
        let registry = registry();
        let cart = Instance::new(&registry, "Cart", json!({"items": [{"_mg": "A"}, {"_mg": "B"}]})).unwrap();
        cart.pull_identity("items", &json!("B")).unwrap();
        cart.push("items", json!({"_mg": "C"})).unwrap();

        assert_eq!(
            cart.delta().to_json(),
            json!({"items": {
                "cmd": "array",
                "push": [{"_mg": "C"}],
                "pull": [{"identity": "_mg", "val": "B"}],
                "sub": {}
            }})
        );
    }

    #[test]
    fn test_primitive_and_reference_arrays() {
        let registry = registry();
        let cart = Instance::new(
            &registry,
            "Cart",
            json!({"labels": ["a", "b"], "owners": [{"$ref": "User", "$id": "u1"}]}),
        )
        .unwrap();
        cart.pull_identity("labels", &json!("a")).unwrap();
        cart.push("owners", json!("u2")).unwrap();
        cart.pull_identity("owners", &json!("u1")).unwrap();

        let delta = cart.delta().to_json();
        assert_eq!(delta["labels"]["pull"], json!([{"identity": "", "val": "a"}]));
        assert_eq!(delta["owners"]["push"], json!([{"$ref": "User", "$id": "u2"}]));
        assert_eq!(delta["owners"]["pull"], json!([{"identity": "$id", "val": "u1"}]));
    }

    #[test]
    fn test_element_edit_becomes_sub() {
        let registry = registry();
        let cart = Instance::new(&registry, "Cart", json!({"items": [{"_mg": "A", "qty": 1}]})).unwrap();
        cart.element("items", &json!("A")).unwrap().set("qty", 3i64).unwrap();

        assert_eq!(
            cart.delta().to_json()["items"]["sub"],
            json!({"A": {"qty": {"cmd": "set", "val": 3}}})
        );
    }

    #[test]
    fn test_set_folds_later_child_edits() {
        let registry = registry();
        let cart = Instance::new(&registry, "Cart", json!({})).unwrap();
        cart.set("main", json!({"_mg": "M", "qty": 1})).unwrap();
        cart.child("main").unwrap().set("qty", 9i64).unwrap();

        match cart.delta().get("main") {
            Some(Change::Set(value)) => assert_eq!(value.to_json(), json!({"_mg": "M", "qty": 9})),
            other => panic!("expected set, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_sub_without_marker() {
        let registry = registry();
        let cart = Instance::new(&registry, "Cart", json!({"main": {"_mg": "M", "qty": 1}})).unwrap();
        let main = cart.child("main").unwrap();
        main.set("qty", 2i64).unwrap();
        cart.state_mut().changes.clear();

        assert_eq!(
            cart.delta().to_json(),
            json!({"main": {"cmd": "sub", "val": {"qty": {"cmd": "set", "val": 2}}}})
        );
    }

    #[test]
    fn test_reset_clears_delta() {
        let registry = registry();
        let cart = Instance::new(&registry, "Cart", json!({"labels": ["a"]})).unwrap();
        cart.push("labels", "b").unwrap();
        cart.reset();
        assert!(cart.delta().is_empty());
    }
}
