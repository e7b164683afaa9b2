use super::context::SecurityContext;
use super::roles::{RoleSet, resolve_roles};
use crate::core::Result;
use crate::model::Instance;
use crate::schema::{Action, EntityDefinition, SchemaRegistry};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;

/// Set of readable field paths; nested fields appear as `parent.child`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMask(BTreeSet<String>);

impl FieldMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    pub fn insert(&mut self, field: &str) {
        self.0.insert(field.to_string());
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }

    /// True when `path` or one of its ancestors is in the mask.
    pub fn covers(&self, path: &str) -> bool {
        let mut current = path;
        loop {
            if self.0.contains(current) {
                return true;
            }
            match current.rfind('.') {
                Some(pos) => current = &current[..pos],
                None => return false,
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn union(&mut self, other: &FieldMask) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Narrows a requested selection to what this mask allows. A request
    /// for a parent keeps only the allowed children.
    pub fn restrict(&self, requested: &FieldMask) -> FieldMask {
        let mut out = FieldMask::new();
        for field in requested.iter() {
            if self.covers(field) {
                out.insert(field);
                continue;
            }
            let prefix = format!("{}.", field);
            for allowed in self.iter().filter(|a| a.starts_with(&prefix)) {
                out.insert(allowed);
            }
        }
        out
    }

    /// `{"field": 1, ...}` projection document for the store.
    pub fn to_projection(&self) -> JsonValue {
        let map: Map<String, JsonValue> = self
            .0
            .iter()
            .map(|f| (f.clone(), JsonValue::from(1)))
            .collect();
        JsonValue::Object(map)
    }

    /// Parses a projection document, keeping fields set to a truthy value.
    pub fn from_projection(value: &JsonValue) -> Self {
        let fields = value
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(_, v)| v.as_i64().map(|n| n != 0).or(v.as_bool()).unwrap_or(false))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        Self(fields)
    }
}

impl Serialize for FieldMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for field in &self.0 {
            map.serialize_entry(field, &1)?;
        }
        map.end()
    }
}

/// Read mask for `context`: the union of the cached per-role masks. When
/// `requested` is given the result is narrowed to it.
pub fn secure_read(
    registry: &SchemaRegistry,
    def: &EntityDefinition,
    context: &SecurityContext,
    requested: Option<&FieldMask>,
    target: Option<&Instance>,
) -> Result<FieldMask> {
    let roles = resolve_roles(def, context, target);
    let mut mask = FieldMask::new();

    for role in roles.iter() {
        let role_mask = registry.role_mask(def.name(), role)?;
        mask.union(&role_mask);
    }

    Ok(match requested {
        Some(requested) => mask.restrict(requested),
        None => mask,
    })
}

/// Removes, in place and without change tracking, every field `context`
/// may not perform `action` on. Embedded structures are checked with the
/// same roles; hydrated documents resolve roles against themselves.
pub fn secure_by_action(context: &SecurityContext, instance: &Instance, action: Action) {
    let def = instance.entity();
    let roles = resolve_roles(&def, context, Some(instance));
    strip_fields(context, instance, &roles, action);
}

fn strip_fields(context: &SecurityContext, instance: &Instance, roles: &RoleSet, action: Action) {
    let def = instance.entity();

    for property in def.properties() {
        if !property.can_action(roles, action) {
            if instance.strip(property.name()) {
                tracing::debug!(
                    entity = %def.name(),
                    property = property.name(),
                    action = %action,
                    "field stripped"
                );
            }
            continue;
        }

        if !property.is_sub_document() {
            continue;
        }

        let children = instance
            .get(property.name())
            .map(|value| value.instances())
            .unwrap_or_default();
        for child in children {
            if child.entity().is_document() {
                secure_by_action(context, &child, action);
            } else {
                strip_fields(context, &child, roles, action);
            }
        }
    }
}
