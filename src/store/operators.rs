//! Query matching, projection and update application over JSON documents.

use crate::core::{DocError, Result};
use crate::diff::UpdateOperators;
use crate::security::FieldMask;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// Values reachable at a dotted path. Arrays along the way fan out, and
/// an array at the end contributes itself and each of its elements.
pub fn values_at<'a>(doc: &'a JsonValue, path: &str) -> Vec<&'a JsonValue> {
    let segments: Vec<&str> = if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    };
    let mut out = Vec::new();
    collect(doc, &segments, &mut out);
    out
}

fn collect<'a>(node: &'a JsonValue, segments: &[&str], out: &mut Vec<&'a JsonValue>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(node);
        if let JsonValue::Array(items) = node {
            out.extend(items.iter());
        }
        return;
    };

    match node {
        JsonValue::Object(map) => {
            if let Some(child) = map.get(*head) {
                collect(child, rest, out);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                collect(item, segments, out);
            }
        }
        _ => {}
    }
}

/// Value at a path without array fan-out.
fn lookup<'a>(doc: &'a JsonValue, segments: &[&str]) -> Option<&'a JsonValue> {
    segments
        .iter()
        .try_fold(doc, |node, segment| node.as_object()?.get(*segment))
}

/// `{"a.b": 1, "c": {"$in": [..]}}` style matching, implicit AND.
pub fn matches(doc: &JsonValue, query: &JsonValue) -> bool {
    let Some(conditions) = query.as_object() else {
        return query.is_null();
    };

    conditions.iter().all(|(path, condition)| {
        match path.as_str() {
            "$and" => {
                return condition
                    .as_array()
                    .is_some_and(|all| all.iter().all(|q| matches(doc, q)));
            }
            "$or" => {
                return condition
                    .as_array()
                    .is_some_and(|any| any.iter().any(|q| matches(doc, q)));
            }
            _ => {}
        }

        let values = values_at(doc, path);
        match condition.as_object().filter(|c| c.keys().any(|k| k.starts_with('$'))) {
            Some(ops) => ops.iter().all(|(op, arg)| match op.as_str() {
                "$in" => arg
                    .as_array()
                    .is_some_and(|allowed| values.iter().any(|v| allowed.contains(v))),
                "$nin" => arg
                    .as_array()
                    .is_some_and(|denied| !values.iter().any(|v| denied.contains(v))),
                "$eq" => values.contains(&arg),
                "$ne" => !values.contains(&arg),
                "$exists" => arg.as_bool().unwrap_or(true) != values.is_empty(),
                _ => false,
            }),
            None => values.contains(&condition),
        }
    })
}

/// Keeps only the masked fields (and `_id`), descending into nested
/// objects and arrays of objects.
pub fn project(doc: &JsonValue, mask: &FieldMask) -> JsonValue {
    let mut tree = ProjectionNode::default();
    tree.insert("_id");
    for field in mask.iter() {
        tree.insert(field);
    }
    tree.apply(doc)
}

#[derive(Default)]
struct ProjectionNode {
    /// Field included with everything below it.
    whole: bool,
    children: HashMap<String, ProjectionNode>,
}

impl ProjectionNode {
    fn insert(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split('.') {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.whole = true;
    }

    fn apply(&self, value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::Object(map) => {
                let mut out = Map::new();
                for (key, child) in &self.children {
                    if let Some(v) = map.get(key) {
                        let projected = if child.whole { v.clone() } else { child.apply(v) };
                        out.insert(key.clone(), projected);
                    }
                }
                JsonValue::Object(out)
            }
            JsonValue::Array(items) => JsonValue::Array(items.iter().map(|i| self.apply(i)).collect()),
            other => other.clone(),
        }
    }
}

/// Identity filters for `$[name]` placeholders.
struct ArrayFilters(HashMap<String, Vec<(Vec<String>, JsonValue)>>);

impl ArrayFilters {
    fn parse(filters: &[JsonValue]) -> Result<Self> {
        let mut out: HashMap<String, Vec<(Vec<String>, JsonValue)>> = HashMap::new();
        for filter in filters {
            let map = filter
                .as_object()
                .ok_or_else(|| DocError::Store(format!("array filter must be an object: {}", filter)))?;
            for (key, value) in map {
                let mut parts = key.split('.');
                let name = parts.next().unwrap_or_default().to_string();
                let path = parts.map(str::to_string).collect();
                out.entry(name).or_default().push((path, value.clone()));
            }
        }
        Ok(Self(out))
    }

    fn placeholder(segment: &str) -> Option<&str> {
        segment.strip_prefix("$[").and_then(|s| s.strip_suffix(']'))
    }

    fn accepts(&self, name: &str, element: &JsonValue) -> Result<bool> {
        let conditions = self
            .0
            .get(name)
            .ok_or_else(|| DocError::Store(format!("no array filter for identifier '{}'", name)))?;
        Ok(conditions.iter().all(|(path, expected)| {
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            lookup(element, &path) == Some(expected)
        }))
    }
}

/// Navigates to the object holding the last segment and calls `leaf`
/// with it. `$[name]` segments visit every accepted array element.
fn visit_parent(
    node: &mut JsonValue,
    segments: &[&str],
    filters: &ArrayFilters,
    create: bool,
    leaf: &mut dyn FnMut(&mut Map<String, JsonValue>, &str),
) -> Result<()> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };

    if let Some(name) = ArrayFilters::placeholder(head) {
        if let JsonValue::Array(items) = node {
            for item in items.iter_mut() {
                if filters.accepts(name, item)? {
                    visit_parent(item, rest, filters, create, leaf)?;
                }
            }
        }
        return Ok(());
    }

    let JsonValue::Object(map) = node else {
        return Ok(());
    };

    if rest.is_empty() {
        leaf(map, *head);
        return Ok(());
    }

    if create && !map.contains_key(*head) {
        map.insert(head.to_string(), JsonValue::Object(Map::new()));
    }
    match map.get_mut(*head) {
        Some(child) => visit_parent(child, rest, filters, create, leaf),
        None => Ok(()),
    }
}

/// Removes array elements whose value (or value at the remaining path
/// inside the element) is listed.
fn pull_all(
    node: &mut JsonValue,
    segments: &[&str],
    values: &[JsonValue],
    filters: &ArrayFilters,
) -> Result<()> {
    match node {
        JsonValue::Array(items) => {
            if let Some(name) = segments.first().and_then(|s| ArrayFilters::placeholder(s)) {
                for item in items.iter_mut() {
                    if filters.accepts(name, item)? {
                        pull_all(item, &segments[1..], values, filters)?;
                    }
                }
            } else {
                items.retain(|item| !lookup(item, segments).is_some_and(|v| values.contains(v)));
            }
        }
        JsonValue::Object(map) => {
            if let Some((head, rest)) = segments.split_first() {
                if let Some(child) = map.get_mut(*head) {
                    pull_all(child, rest, values, filters)?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn operator_entries<'a>(update: &'a UpdateOperators, op: &str) -> impl Iterator<Item = (&'a String, &'a JsonValue)> {
    update.operator(op).into_iter().flat_map(|map| map.iter())
}

/// Applies `$set`, `$unset`, `$pullAll` and `$addToSet` in that order.
pub fn apply_update(doc: &mut JsonValue, update: &UpdateOperators) -> Result<()> {
    for op in update.document.keys() {
        if !matches!(op.as_str(), "$set" | "$unset" | "$pullAll" | "$addToSet") {
            return Err(DocError::Store(format!("unsupported update operator '{}'", op)));
        }
    }

    let filters = ArrayFilters::parse(&update.array_filters)?;

    for (path, value) in operator_entries(update, "$set") {
        let segments: Vec<&str> = path.split('.').collect();
        visit_parent(doc, &segments, &filters, true, &mut |map: &mut Map<String, JsonValue>, key: &str| {
            map.insert(key.to_string(), value.clone());
        })?;
    }

    for (path, _) in operator_entries(update, "$unset") {
        let segments: Vec<&str> = path.split('.').collect();
        visit_parent(doc, &segments, &filters, false, &mut |map: &mut Map<String, JsonValue>, key: &str| {
            map.remove(key);
        })?;
    }

    for (path, values) in operator_entries(update, "$pullAll") {
        let values = values
            .as_array()
            .ok_or_else(|| DocError::Store(format!("$pullAll for '{}' needs an array", path)))?;
        let segments: Vec<&str> = path.split('.').collect();
        pull_all(doc, &segments, values, &filters)?;
    }

    for (path, spec) in operator_entries(update, "$addToSet") {
        let each: Vec<JsonValue> = match spec.get("$each").and_then(JsonValue::as_array) {
            Some(items) => items.clone(),
            None => vec![spec.clone()],
        };
        let segments: Vec<&str> = path.split('.').collect();
        visit_parent(doc, &segments, &filters, true, &mut |map: &mut Map<String, JsonValue>, key: &str| {
            let slot = map
                .entry(key.to_string())
                .or_insert_with(|| JsonValue::Array(Vec::new()));
            if !slot.is_array() {
                *slot = JsonValue::Array(Vec::new());
            }
            if let JsonValue::Array(items) = slot {
                for value in &each {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
            }
        })?;
    }

    Ok(())
}
