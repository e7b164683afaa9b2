use crate::core::{FieldValue, Result};
use crate::model::{Change, ChangeSet};
use crate::schema::{EntityDefinition, SchemaRegistry};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};

/// Update operators for the backing store.
///
/// `document` holds `$set`, `$unset`, `$pullAll` and `$addToSet`;
/// `array_filters` carries the identity filters referenced by `$[eN]`
/// placeholders when a nested array element is addressed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateOperators {
    pub document: Map<String, JsonValue>,
    #[serde(rename = "arrayFilters", skip_serializing_if = "Vec::is_empty")]
    pub array_filters: Vec<JsonValue>,
}

impl UpdateOperators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }

    pub fn operator(&self, op: &str) -> Option<&Map<String, JsonValue>> {
        self.document.get(op).and_then(JsonValue::as_object)
    }

    /// The operator document alone.
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.document.clone())
    }

    fn put(&mut self, op: &str, path: String, value: JsonValue) {
        let entry = self
            .document
            .entry(op.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if let JsonValue::Object(map) = entry {
            map.insert(path, value);
        }
    }

    fn append(&mut self, op: &str, path: String, values: impl IntoIterator<Item = JsonValue>) {
        let entry = self
            .document
            .entry(op.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if let JsonValue::Object(map) = entry {
            let slot = map.entry(path).or_insert_with(|| JsonValue::Array(Vec::new()));
            if let JsonValue::Array(items) = slot {
                items.extend(values);
            }
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Lowers an update set into store update operators.
///
/// Pure: applying the result to the committed copy of a document yields
/// the document with `update` applied.
pub fn query_from_update_set(
    registry: &SchemaRegistry,
    def: &EntityDefinition,
    update: &ChangeSet,
    prefix: &str,
) -> Result<UpdateOperators> {
    let mut ops = UpdateOperators::new();
    let mut filters = 0usize;
    lower(registry, def, update, prefix, &mut ops, &mut filters)?;
    Ok(ops)
}

fn lower(
    registry: &SchemaRegistry,
    def: &EntityDefinition,
    update: &ChangeSet,
    prefix: &str,
    ops: &mut UpdateOperators,
    filters: &mut usize,
) -> Result<()> {
    for (name, change) in update.iter() {
        let Some(property) = def.get_property(name) else {
            tracing::debug!(entity = %def.name(), property = %name, "lowering skipped unknown property");
            continue;
        };
        let path = join(prefix, name);

        match change {
            Change::Unset => ops.put("$unset", path, JsonValue::String(String::new())),
            Change::Set(value) => ops.put("$set", path, value.to_json()),
            Change::Sub(sub) => {
                let Some(target) = property.target_entity() else {
                    continue;
                };
                let target = registry.entity(target)?;
                lower(registry, &target, sub, &path, ops, filters)?;
            }
            Change::Array(array) => {
                let rule = property.identity_rule();

                if let Some(target) = property.target_entity().filter(|_| property.is_sub_document()) {
                    let target = registry.entity(target)?;
                    for (key, sub) in &array.sub {
                        let placeholder = format!("e{}", *filters);
                        *filters += 1;
                        let mut filter = Map::new();
                        filter.insert(
                            format!("{}.{}", placeholder, rule.path()),
                            rule.identity_from_key(key),
                        );
                        ops.array_filters.push(JsonValue::Object(filter));
                        let element_path = format!("{}.$[{}]", path, placeholder);
                        lower(registry, &target, sub, &element_path, ops, filters)?;
                    }
                }

                for entry in &array.pull {
                    let pull_path = if entry.identity.is_empty() {
                        path.clone()
                    } else {
                        join(&path, &entry.identity)
                    };
                    ops.append("$pullAll", pull_path, [entry.val.clone()]);
                }

                if !array.push.is_empty() {
                    let each: Vec<JsonValue> = array.push.iter().map(FieldValue::to_json).collect();
                    ops.put("$addToSet", path, json!({ "$each": each }));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArrayChange, PullEntry};
    use crate::schema::PropertyDefinition;
    use std::sync::Arc;

    fn registry() -> Arc<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                EntityDefinition::structure("Item")
                    .property(PropertyDefinition::number("qty"))
                    .property(PropertyDefinition::string("notes").array()),
            )
            .unwrap();
        registry
            .register(
                EntityDefinition::structure("Address").property(PropertyDefinition::string("city")),
            )
            .unwrap();
        registry
            .register(
                EntityDefinition::document("Order")
                    .property(PropertyDefinition::string("name"))
                    .property(PropertyDefinition::structure("ship_to", "Address"))
                    .property(PropertyDefinition::structure("items", "Item").array())
                    .property(PropertyDefinition::string("tags").array()),
            )
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_set_unset_and_sub_paths() {
        let registry = registry();
        let def = registry.entity("Order").unwrap();
        let update = ChangeSet::new()
            .set("name", "A")
            .unset("tags")
            .sub("ship_to", ChangeSet::new().set("city", "Oslo"));

        let ops = query_from_update_set(&registry, &def, &update, "").unwrap();
        assert_eq!(
            ops.to_json(),
            json!({
                "$set": {"name": "A", "ship_to.city": "Oslo"},
                "$unset": {"tags": ""}
            })
        );
        assert!(ops.array_filters.is_empty());
    }

    #[test]
    fn test_array_lowering() {
        let registry = registry();
        let def = registry.entity("Order").unwrap();

        let mut items = ArrayChange::default();
        items.push.push(FieldValue::from_json(json!({"_mg": "C"})));
        items.pull.push(PullEntry { identity: "_mg".into(), val: json!("B") });
        items.sub.insert("A".into(), ChangeSet::new().set("qty", 2i64));

        let mut tags = ArrayChange::default();
        tags.pull.push(PullEntry { identity: String::new(), val: json!("old") });

        let update = ChangeSet::new().array("items", items).array("tags", tags);
        let ops = query_from_update_set(&registry, &def, &update, "").unwrap();

        assert_eq!(
            ops.to_json(),
            json!({
                "$set": {"items.$[e0].qty": 2},
                "$pullAll": {"items._mg": ["B"], "tags": ["old"]},
                "$addToSet": {"items": {"$each": [{"_mg": "C"}]}}
            })
        );
        assert_eq!(ops.array_filters, vec![json!({"e0._mg": "A"})]);
    }

    #[test]
    fn test_prefix_and_unknown_properties() {
        let registry = registry();
        let def = registry.entity("Address").unwrap();
        let update = ChangeSet::new().set("city", "Rome").set("planet", "Mars");
        let ops = query_from_update_set(&registry, &def, &update, "ship_to").unwrap();
        assert_eq!(ops.to_json(), json!({"$set": {"ship_to.city": "Rome"}}));
    }
}
