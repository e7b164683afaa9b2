use super::change::{ArrayChange, Change, ChangeSet};
use crate::core::types::json_id_string;
use crate::core::{DocError, FieldValue, IdentityRule, LocaleString, Result, mini_guid};
use crate::schema::{EntityDefinition, PropertyDefinition, SchemaRegistry};
use crate::validation::{ValidationMethod, ValidationReport};
use serde_json::{Map, Value as JsonValue};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

pub(crate) struct ParentLink {
    parent: Weak<InstanceInner>,
    property: String,
}

pub(crate) struct InstanceState {
    pub(crate) data: BTreeMap<String, FieldValue>,
    pub(crate) parent: Option<ParentLink>,
    pub(crate) locale: String,
    pub(crate) changes: ChangeSet,
    /// Array contents as of the last reset, diffed against at `delta` time.
    pub(crate) array_snapshot: BTreeMap<String, Vec<FieldValue>>,
}

pub(crate) struct InstanceInner {
    entity: Arc<EntityDefinition>,
    registry: Arc<SchemaRegistry>,
    state: RefCell<InstanceState>,
}

/// A live object conforming to one entity definition.
///
/// `Instance` is a cheap handle; clones share the same object. Nested
/// structures and hydrated documents are instances themselves, holding a
/// weak back-link to their parent so mutations can be reported upward.
#[derive(Clone)]
pub struct Instance(Rc<InstanceInner>);

impl Instance {
    pub fn new(registry: &Arc<SchemaRegistry>, entity: &str, raw: JsonValue) -> Result<Self> {
        let locale = registry.config().default_locale.clone();
        Self::with_locale(registry, entity, raw, &locale)
    }

    /// Builds an instance from raw data. Values are coerced to their
    /// declared types; unknown keys are dropped. Nothing is tracked.
    pub fn with_locale(
        registry: &Arc<SchemaRegistry>,
        entity: &str,
        raw: JsonValue,
        locale: &str,
    ) -> Result<Self> {
        let def = registry.entity(entity)?;
        let map = match raw {
            JsonValue::Object(map) => map,
            JsonValue::Null => Map::new(),
            other => {
                return Err(DocError::TypeMismatch(format!(
                    "{} must be built from an object, got {}",
                    entity, other
                )));
            }
        };

        let instance = Instance(Rc::new(InstanceInner {
            entity: def.clone(),
            registry: registry.clone(),
            state: RefCell::new(InstanceState {
                data: BTreeMap::new(),
                parent: None,
                locale: locale.to_string(),
                changes: ChangeSet::new(),
                array_snapshot: BTreeMap::new(),
            }),
        }));

        for (key, value) in map {
            let Some(property) = def.get_property(&key) else {
                tracing::debug!(entity = %def.name(), property = %key, "unknown property dropped");
                continue;
            };

            let value = property.cast(registry, FieldValue::from_json(value), locale)?;
            if value.is_absent() {
                continue;
            }
            instance.adopt(&key, &value);
            instance.state_mut().data.insert(key, value);
        }

        if def.is_structure() && instance.mini_guid().is_none() {
            let mg = mini_guid(registry.config().mini_guid_length);
            instance
                .state_mut()
                .data
                .insert("_mg".to_string(), FieldValue::Primitive(JsonValue::String(mg)));
        }

        instance.snapshot_arrays();
        Ok(instance)
    }

    pub(crate) fn state(&self) -> Ref<'_, InstanceState> {
        self.0.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, InstanceState> {
        self.0.state.borrow_mut()
    }

    pub fn entity(&self) -> &Arc<EntityDefinition> {
        &self.0.entity
    }

    pub fn entity_name(&self) -> &str {
        self.0.entity.name()
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.0.registry
    }

    /// True when both handles point at the same object.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn locale(&self) -> String {
        self.state().locale.clone()
    }

    /// Changes the locale used by locale-sensitive values, here and in
    /// every nested instance.
    pub fn set_locale(&self, locale: &str) -> Result<()> {
        if !self.registry().config().is_supported_locale(locale) {
            return Err(DocError::TypeMismatch(format!(
                "locale '{}' is not supported",
                locale
            )));
        }
        self.state_mut().locale = locale.to_string();
        for child in self.children() {
            child.set_locale(locale)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<FieldValue> {
        self.state().data.get(name).cloned()
    }

    pub fn get_str(&self, name: &str) -> Option<String> {
        self.state()
            .data
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Text of a locale-sensitive value in the instance locale.
    pub fn get_localized(&self, name: &str) -> Option<String> {
        let state = self.state();
        state
            .data
            .get(name)
            .and_then(|v| v.as_locale())
            .and_then(|ls| ls.get(&state.locale))
            .map(str::to_string)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state().data.contains_key(name)
    }

    /// Non-array sub-document stored under `name`.
    pub fn child(&self, name: &str) -> Option<Instance> {
        self.state()
            .data
            .get(name)
            .and_then(|v| v.as_instance())
            .cloned()
    }

    pub fn elements(&self, name: &str) -> Vec<FieldValue> {
        self.state()
            .data
            .get(name)
            .and_then(|v| v.as_array())
            .map(<[FieldValue]>::to_vec)
            .unwrap_or_default()
    }

    pub fn array_len(&self, name: &str) -> usize {
        self.state()
            .data
            .get(name)
            .and_then(|v| v.as_array())
            .map_or(0, <[FieldValue]>::len)
    }

    /// Array element of `name` whose identity equals `identity`.
    pub fn element(&self, name: &str, identity: &JsonValue) -> Option<Instance> {
        let rule = self.entity().get_property(name)?.identity_rule();
        self.elements(name)
            .into_iter()
            .find(|v| rule.identity_of(v).as_ref() == Some(identity))
            .and_then(|v| v.as_instance().cloned())
    }

    /// Every nested instance directly held by this one.
    pub fn children(&self) -> Vec<Instance> {
        self.state()
            .data
            .values()
            .flat_map(FieldValue::instances)
            .collect()
    }

    pub fn id(&self) -> Option<String> {
        self.state().data.get("_id").and_then(|v| json_id_string(&v.to_json()))
    }

    pub fn mini_guid(&self) -> Option<String> {
        self.get_str("_mg")
    }

    pub fn owner(&self) -> Option<String> {
        self.state()
            .data
            .get("_owner")
            .and_then(|v| json_id_string(&v.to_json()))
    }

    pub fn groups(&self) -> Vec<String> {
        self.elements("_groups")
            .iter()
            .filter_map(|v| json_id_string(&v.to_json()))
            .collect()
    }

    /// Identity used to match this instance inside arrays: `_mg` for
    /// structures, `_id` for documents.
    pub fn identity(&self) -> Option<String> {
        if self.entity().is_structure() {
            self.mini_guid()
        } else {
            self.id()
        }
    }

    fn property(&self, name: &str) -> Option<Arc<PropertyDefinition>> {
        let property = self.entity().get_property(name).cloned();
        if property.is_none() {
            tracing::debug!(entity = %self.entity_name(), property = name, "unknown property ignored");
        }
        property
    }

    fn array_property(&self, name: &str) -> Result<Arc<PropertyDefinition>> {
        match self.entity().get_property(name) {
            Some(p) if p.is_array() => Ok(p.clone()),
            Some(_) => Err(DocError::TypeMismatch(format!(
                "{}.{} is not an array",
                self.entity_name(),
                name
            ))),
            None => Err(DocError::TypeMismatch(format!(
                "{} has no property '{}'",
                self.entity_name(),
                name
            ))),
        }
    }

    /// Assigns a value. Null unsets. Unknown property names are ignored.
    pub fn set(&self, name: &str, value: impl Into<FieldValue>) -> Result<()> {
        let Some(property) = self.property(name) else {
            return Ok(());
        };
        let value = value.into();
        let locale = self.locale();

        // A bare string on an existing locale value only replaces the current locale's text.
        if property.is_locale_sensitive() && !property.is_array() {
            if let FieldValue::Primitive(JsonValue::String(text)) = &value {
                let updated = match self.state_mut().data.get_mut(name) {
                    Some(FieldValue::Locale(ls)) => {
                        ls.set(&locale, text.clone());
                        Some(FieldValue::Locale(ls.clone()))
                    }
                    _ => None,
                };
                if let Some(current) = updated {
                    self.record(name, Change::Set(current));
                    self.notify_parent();
                    return Ok(());
                }
            }
        }

        let value = property.cast(self.registry(), value, &locale)?;
        let change = if value.is_absent() {
            Change::Unset
        } else {
            Change::Set(value.clone())
        };
        self.replace(name, value);
        self.record(name, change);
        self.notify_parent();
        Ok(())
    }

    pub fn unset(&self, name: &str) -> Result<()> {
        self.set(name, FieldValue::Null)
    }

    /// Sets the text of a locale-sensitive value for one locale.
    pub fn set_localized(&self, name: &str, locale: &str, text: &str) -> Result<()> {
        let Some(property) = self.property(name) else {
            return Ok(());
        };
        if !property.is_locale_sensitive() {
            return Err(DocError::TypeMismatch(format!(
                "{}.{} is not locale sensitive",
                self.entity_name(),
                name
            )));
        }

        let current = {
            let mut state = self.state_mut();
            let slot = state
                .data
                .entry(name.to_string())
                .or_insert_with(|| FieldValue::Locale(LocaleString::new()));
            match slot {
                FieldValue::Locale(ls) => ls.set(locale, text),
                _ => *slot = FieldValue::Locale(LocaleString::with_value(locale, text)),
            }
            slot.clone()
        };
        self.record(name, Change::Set(current));
        self.notify_parent();
        Ok(())
    }

    /// Appends an element unless one with the same identity is already
    /// present. Returns whether it was added.
    pub fn push(&self, name: &str, value: impl Into<FieldValue>) -> Result<bool> {
        let property = self.array_property(name)?;
        let locale = self.locale();
        let element = property.cast_element(self.registry(), value.into(), &locale)?;
        if element.is_absent() {
            return Ok(false);
        }

        let rule = property.identity_rule();
        let key = rule.identity_key(&element);
        {
            let mut state = self.state_mut();
            let slot = state
                .data
                .entry(name.to_string())
                .or_insert_with(|| FieldValue::Array(Vec::new()));
            if !matches!(slot, FieldValue::Array(_)) {
                *slot = FieldValue::Array(Vec::new());
            }
            if let FieldValue::Array(items) = slot {
                if key.is_some() && items.iter().any(|i| rule.identity_key(i) == key) {
                    return Ok(false);
                }
                items.push(element.clone());
            }
        }

        self.adopt(name, &element);
        self.mark_array(name);
        self.notify_parent();
        Ok(true)
    }

    /// Removes every element of `name` matching `predicate`. Returns how
    /// many were removed.
    pub fn pull_where(&self, name: &str, predicate: impl Fn(&FieldValue) -> bool) -> Result<usize> {
        self.array_property(name)?;

        let removed: Vec<FieldValue> = {
            let mut state = self.state_mut();
            match state.data.get_mut(name) {
                Some(FieldValue::Array(items)) => {
                    let (gone, kept): (Vec<_>, Vec<_>) =
                        std::mem::take(items).into_iter().partition(|v| predicate(v));
                    *items = kept;
                    gone
                }
                _ => Vec::new(),
            }
        };

        if removed.is_empty() {
            return Ok(0);
        }

        for value in &removed {
            for child in value.instances() {
                child.detach();
            }
        }
        self.mark_array(name);
        self.notify_parent();
        Ok(removed.len())
    }

    /// Removes the element(s) of `name` with the given identity.
    pub fn pull_identity(&self, name: &str, identity: &JsonValue) -> Result<usize> {
        let rule = self.array_property(name)?.identity_rule();
        self.pull_where(name, |v| rule.identity_of(v).as_ref() == Some(identity))
    }

    /// Raw recorded changes, before array reconciliation. See `delta`.
    pub fn changes(&self) -> ChangeSet {
        self.state().changes.clone()
    }

    pub fn has_changed(&self, name: &str) -> bool {
        self.state().changes.contains(name)
    }

    /// Marks the current state as committed: clears changes and
    /// re-snapshots arrays, recursively.
    pub fn reset(&self) {
        self.state_mut().changes.clear();
        self.snapshot_arrays();
        for child in self.children() {
            child.reset();
        }
    }

    pub fn validate(&self, method: ValidationMethod) -> Result<ValidationReport> {
        crate::validation::validate(self, method)
    }

    /// Detached copy with the same data and no pending changes.
    pub fn deep_clone(&self) -> Result<Instance> {
        Instance::with_locale(self.registry(), self.entity_name(), self.to_json(), &self.locale())
    }

    /// Plain data in declaration order, nested instances included.
    pub fn to_json(&self) -> JsonValue {
        let state = self.state();
        let mut map = Map::new();
        for property in self.entity().properties() {
            if let Some(value) = state.data.get(property.name()) {
                map.insert(property.name().to_string(), value.to_json());
            }
        }
        JsonValue::Object(map)
    }

    /// Removes a field without recording a change.
    pub(crate) fn strip(&self, name: &str) -> bool {
        let removed = {
            let mut state = self.state_mut();
            state.changes.remove(name);
            state.array_snapshot.remove(name);
            state.data.remove(name)
        };
        match removed {
            Some(value) => {
                for child in value.instances() {
                    child.detach();
                }
                true
            }
            None => false,
        }
    }

    fn replace(&self, name: &str, value: FieldValue) {
        let old = {
            let mut state = self.state_mut();
            if value.is_absent() {
                state.data.remove(name)
            } else {
                state.data.insert(name.to_string(), value.clone())
            }
        };

        let incoming = value.instances();
        if let Some(old) = old {
            for child in old.instances() {
                if !incoming.iter().any(|i| i.ptr_eq(&child)) {
                    child.detach();
                }
            }
        }
        self.adopt(name, &value);
    }

    fn adopt(&self, name: &str, value: &FieldValue) {
        for child in value.instances() {
            child.state_mut().parent = Some(ParentLink {
                parent: Rc::downgrade(&self.0),
                property: name.to_string(),
            });
        }
    }

    fn detach(&self) {
        self.state_mut().parent = None;
    }

    pub(crate) fn snapshot_arrays(&self) {
        let entity = self.entity().clone();
        let mut state = self.state_mut();
        state.array_snapshot.clear();
        for property in entity.properties().filter(|p| p.is_array()) {
            let items = state
                .data
                .get(property.name())
                .and_then(|v| v.as_array())
                .map(<[FieldValue]>::to_vec)
                .unwrap_or_default();
            state
                .array_snapshot
                .insert(property.name().to_string(), items);
        }
    }

    /// Records a wholesale change. Set values are refreshed from current
    /// data when the delta is taken.
    fn record(&self, name: &str, change: Change) {
        self.state_mut().changes.insert(name, change);
    }

    fn mark_array(&self, name: &str) {
        let mut state = self.state_mut();
        if !state.changes.contains(name) {
            state
                .changes
                .insert(name, Change::Array(ArrayChange::default()));
        }
    }

    pub(crate) fn notify_parent(&self) {
        let link = self.state().parent.as_ref().and_then(|link| {
            link.parent
                .upgrade()
                .map(|parent| (Instance(parent), link.property.clone()))
        });

        if let Some((parent, property)) = link {
            parent.child_changed(&property, self);
        }
    }

    /// Called by a nested instance after it changed. Registers a `sub`
    /// (or array `sub`) entry and keeps propagating until an ancestor
    /// already had one.
    pub(crate) fn child_changed(&self, property: &str, child: &Instance) {
        let Some(definition) = self.entity().get_property(property).cloned() else {
            return;
        };

        let created = {
            let mut state = self.state_mut();
            match state.changes.get_mut(property) {
                None => {
                    let change = if definition.is_array() {
                        let mut array = ArrayChange::default();
                        if let Some(key) = child.identity() {
                            array.sub.insert(key, ChangeSet::new());
                        }
                        Change::Array(array)
                    } else {
                        Change::Sub(ChangeSet::new())
                    };
                    state.changes.insert(property, change);
                    true
                }
                Some(Change::Array(array)) => {
                    if let Some(key) = child.identity() {
                        array.sub.entry(key).or_default();
                    }
                    false
                }
                Some(_) => false,
            }
        };

        tracing::trace!(
            entity = %self.entity_name(),
            property,
            child = %child.entity_name(),
            created,
            "child changed"
        );

        if created {
            self.notify_parent();
        }
    }

    pub(crate) fn identity_rule_of(&self, name: &str) -> Option<IdentityRule> {
        self.entity().get_property(name).map(|p| p.identity_rule())
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("entity", &self.entity_name())
            .field("data", &self.to_json())
            .field("changes", &self.state().changes)
            .finish()
    }
}
