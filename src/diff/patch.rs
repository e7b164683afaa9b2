use crate::core::{DocError, FieldValue, Result};
use crate::model::{ArrayChange, Change, ChangeSet, Instance};
use crate::schema::{EntityDefinition, PropertyDefinition, SchemaRegistry};
use crate::security::{RoleSet, SecurityContext, resolve_roles};
use serde_json::{Value as JsonValue, json};

/// Applies an update set to `instance`, skipping every property the
/// actor may not update.
///
/// Roles are resolved once against `instance` (unless given) and reused
/// for every nested level. Applied changes are tracked like any other
/// mutation, so the result can itself be diffed.
pub fn patch(
    context: &SecurityContext,
    instance: &Instance,
    update: &ChangeSet,
    roles: Option<&RoleSet>,
) -> Result<()> {
    match roles {
        Some(roles) => apply(instance, update, roles),
        None => {
            let roles = resolve_roles(instance.entity(), context, Some(instance));
            apply(instance, update, &roles)
        }
    }
}

fn apply(instance: &Instance, update: &ChangeSet, roles: &RoleSet) -> Result<()> {
    let entity = instance.entity().clone();

    for (name, change) in update.iter() {
        let Some(property) = entity.get_property(name) else {
            tracing::debug!(entity = %entity.name(), property = %name, "patch skipped unknown property");
            continue;
        };

        if !property.can_update(roles) {
            tracing::debug!(
                entity = %entity.name(),
                property = %name,
                cmd = change.cmd(),
                "patch skipped property without update permission"
            );
            continue;
        }

        match change {
            Change::Unset => instance.unset(name)?,
            // Re-coerced from plain data so no instance is shared with the source.
            Change::Set(value) => {
                let mut value = value.to_json();
                if property.is_sub_document() {
                    let current = instance.get(name).map(|v| v.to_json());
                    value = guard_nested(instance.registry(), property, value, current.as_ref(), roles)?;
                }
                instance.set(name, FieldValue::from_json(value))?
            }
            Change::Sub(sub) => {
                if !property.is_sub_document() || property.is_array() {
                    return Err(DocError::InvalidUpdateSet(format!(
                        "'sub' is not applicable to {}.{}",
                        entity.name(),
                        name
                    )));
                }
                let child = match instance.child(name) {
                    Some(child) => child,
                    None => {
                        instance.set(name, json!({}))?;
                        instance.child(name).ok_or_else(|| {
                            DocError::InvalidUpdateSet(format!(
                                "cannot create {}.{}",
                                entity.name(),
                                name
                            ))
                        })?
                    }
                };
                apply(&child, sub, roles)?;
            }
            Change::Array(array) => {
                if !property.is_array() {
                    return Err(DocError::InvalidUpdateSet(format!(
                        "'array' is not applicable to {}.{}",
                        entity.name(),
                        name
                    )));
                }
                apply_array(instance, name, array, roles)?;
            }
        }
    }

    Ok(())
}

fn apply_array(instance: &Instance, name: &str, array: &ArrayChange, roles: &RoleSet) -> Result<()> {
    let Some(rule) = instance.identity_rule_of(name) else {
        return Ok(());
    };

    for (key, sub) in &array.sub {
        match instance.element(name, &rule.identity_from_key(key)) {
            Some(element) => apply(&element, sub, roles)?,
            None => {
                tracing::debug!(entity = %instance.entity_name(), property = name, key = %key, "patch target element not found");
            }
        }
    }

    let property = instance.entity().get_property(name).cloned();
    for value in &array.push {
        let mut value = value.to_json();
        if let Some(property) = property.as_deref().filter(|p| p.is_sub_document()) {
            value = guard_nested(instance.registry(), property, value, None, roles)?;
        }
        instance.push(name, FieldValue::from_json(value))?;
    }

    for entry in &array.pull {
        instance.pull_identity(name, &entry.val)?;
    }

    Ok(())
}

/// Rewrites a whole sub-aggregate value so nested fields `roles` may not
/// update keep their `current` values. Elements of arrays are paired with
/// their current counterpart by identity.
fn guard_nested(
    registry: &SchemaRegistry,
    property: &PropertyDefinition,
    incoming: JsonValue,
    current: Option<&JsonValue>,
    roles: &RoleSet,
) -> Result<JsonValue> {
    let Some(target) = property.target_entity() else {
        return Ok(incoming);
    };
    let def = registry.entity(target)?;
    if !property.is_array() {
        return guard_object(registry, &def, incoming, current, roles);
    }

    let identity = property.identity_rule().path();
    let counterpart = |item: &JsonValue| {
        let id = item.get(identity)?;
        current?.as_array()?.iter().find(|e| e.get(identity) == Some(id))
    };
    match incoming {
        JsonValue::Array(items) => items
            .into_iter()
            .map(|item| {
                let previous = counterpart(&item);
                guard_object(registry, &def, item, previous, roles)
            })
            .collect::<Result<Vec<_>>>()
            .map(JsonValue::Array),
        single => {
            let previous = counterpart(&single);
            guard_object(registry, &def, single, previous, roles)
        }
    }
}

fn guard_object(
    registry: &SchemaRegistry,
    def: &EntityDefinition,
    incoming: JsonValue,
    current: Option<&JsonValue>,
    roles: &RoleSet,
) -> Result<JsonValue> {
    let JsonValue::Object(mut map) = incoming else {
        return Ok(incoming);
    };
    let identity = if def.is_document() { "_id" } else { "_mg" };

    for property in def.properties() {
        let name = property.name();
        let previous = current.and_then(|c| c.get(name));

        if !property.can_update(roles) {
            match previous {
                Some(value) => {
                    map.insert(name.to_string(), value.clone());
                }
                // A new aggregate keeps the identity it was given.
                None if name == identity => {}
                None => {
                    if map.remove(name).is_some() {
                        tracing::debug!(entity = %def.name(), property = name, "patch dropped nested field without update permission");
                    }
                }
            }
            continue;
        }

        if property.is_sub_document() {
            if let Some(value) = map.remove(name) {
                let value = guard_nested(registry, property, value, previous, roles)?;
                map.insert(name.to_string(), value);
            }
        }
    }

    Ok(JsonValue::Object(map))
}
