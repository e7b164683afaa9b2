use super::entity::{EntityDefinition, EntityKind};
use super::property::PropertyDefinition;
use super::rules::Action;
use crate::config::EngineConfig;
use crate::core::{DocError, PrimitiveType, Result};
use crate::model::EntityType;
use crate::security::{FieldMask, RoleSet};
use crate::validation::{ValidatorFn, ValidatorRegistry};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Property names user definitions may not declare: system-managed
/// fields and instance operations.
pub const RESERVED_WORDS: &[&str] = &[
    "_id",
    "_mg",
    "_type",
    "_created",
    "_createdBy",
    "_updated",
    "_updatedBy",
    "_owner",
    "_groups",
    "save",
    "remove",
    "validate",
    "refresh",
    "clone",
    "delta",
    "patch",
    "reset",
];

pub const ROLE_SYSTEM: &str = "System";
pub const ROLE_OWNER: &str = "Owner";

/// Registry of resolved entity definitions.
///
/// Definitions are looked up by name; instances carry an `Arc` to the
/// registry so nested values can be coerced to their declared types.
/// Read masks are cached per (entity, role) since they depend on nothing else.
pub struct SchemaRegistry {
    config: EngineConfig,
    entities: HashMap<String, Arc<EntityDefinition>>,
    validators: ValidatorRegistry,
    read_masks: Mutex<HashMap<(String, String), Arc<FieldMask>>>,
    mask_builds: AtomicUsize,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            entities: HashMap::new(),
            validators: ValidatorRegistry::builtin(),
            read_masks: Mutex::new(HashMap::new()),
            mask_builds: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn validators(&self) -> &ValidatorRegistry {
        &self.validators
    }

    /// Adds or replaces a named validator usable from property declarations.
    pub fn register_validator(&mut self, name: &str, validator: ValidatorFn) {
        self.validators.register(name, validator);
    }

    /// Registers a definition, resolving `extend` against already
    /// registered definitions. Returns the resolved form.
    pub fn register(&mut self, def: EntityDefinition) -> Result<Arc<EntityDefinition>> {
        if self.entities.contains_key(&def.name) {
            return Err(DocError::Schema(format!(
                "'{}' is already registered",
                def.name
            )));
        }

        for property in &def.properties {
            if RESERVED_WORDS.contains(&property.name()) {
                return Err(DocError::Schema(format!(
                    "Cannot use a reserved word as a property : {}",
                    property.name()
                )));
            }
        }

        let mut resolved = match &def.extend {
            Some(parent_name) => {
                let parent = self.entities.get(parent_name).ok_or_else(|| {
                    DocError::Schema(format!(
                        "'{}' extends unknown definition '{}'",
                        def.name, parent_name
                    ))
                })?;

                if parent.kind != def.kind {
                    return Err(DocError::Schema(format!(
                        "'{}' ({}) cannot extend '{}' ({})",
                        def.name,
                        def.kind.as_str(),
                        parent.name,
                        parent.kind.as_str()
                    )));
                }

                let mut base = EntityDefinition::clone(parent);
                base.name = def.name.clone();
                base.extend = def.extend.clone();
                base.description = def.description.clone().or(base.description);
                base.owner_security |= def.owner_security;
                base.group_security |= def.group_security;
                base.security.merge_over(&def.security);
                base.indexes.extend(def.indexes.iter().cloned());
                if def.hooks.is_some() {
                    base.hooks = def.hooks.clone();
                }
                for property in &def.properties {
                    base.upsert_property(property.clone());
                }
                base
            }
            None => {
                let mut base = def.clone();
                base.properties = system_properties(def.kind)
                    .into_iter()
                    .map(Arc::new)
                    .collect();
                for property in &def.properties {
                    base.upsert_property(property.clone());
                }
                base
            }
        };

        if resolved.owner_security && resolved.get_property("_owner").is_none() {
            resolved.upsert_property(Arc::new(
                PropertyDefinition::object_id("_owner")
                    .secure(Action::Update, &[ROLE_SYSTEM, ROLE_OWNER]),
            ));
        }

        if resolved.group_security && resolved.get_property("_groups").is_none() {
            resolved.upsert_property(Arc::new(
                PropertyDefinition::object_id("_groups")
                    .array()
                    .secure(Action::Update, &[ROLE_SYSTEM]),
            ));
        }

        let resolved = Arc::new(resolved);
        tracing::debug!(
            entity = %resolved.name,
            kind = resolved.kind.as_str(),
            properties = resolved.properties.len(),
            "registered definition"
        );
        self.entities
            .insert(resolved.name.clone(), resolved.clone());
        Ok(resolved)
    }

    pub fn entity(&self, name: &str) -> Result<Arc<EntityDefinition>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| DocError::UnknownEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.keys().cloned().collect();
        names.sort();
        names
    }

    /// Typed handle exposing the engine operations for one entity.
    pub fn entity_type(self: &Arc<Self>, name: &str) -> Result<EntityType> {
        Ok(EntityType::new(self.clone(), self.entity(name)?))
    }

    /// True when `name` is `ancestor` or extends it, directly or not.
    pub fn is_kind_of(&self, name: &str, ancestor: &str) -> bool {
        let mut current = Some(name.to_string());
        while let Some(entity) = current {
            if entity == ancestor {
                return true;
            }
            current = self
                .entities
                .get(&entity)
                .and_then(|def| def.extend.clone());
        }
        false
    }

    /// Every structure/document type a property points at must be registered.
    pub fn check_references(&self) -> Result<()> {
        for def in self.entities.values() {
            for property in def.properties() {
                if let Some(target) = property.target_entity() {
                    if !self.entities.contains_key(target) {
                        return Err(DocError::Schema(format!(
                            "{}.{} refers to unknown type '{}'",
                            def.name,
                            property.name(),
                            target
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Registers definitions from JSON: one definition, an array of them,
    /// or `{"definitions": [...]}`. Parents are registered before children
    /// regardless of order in the input.
    pub fn load_json(&mut self, value: &JsonValue) -> Result<Vec<String>> {
        let items: Vec<&JsonValue> = match value {
            JsonValue::Array(items) => items.iter().collect(),
            JsonValue::Object(map) => match map.get("definitions").and_then(|d| d.as_array()) {
                Some(items) => items.iter().collect(),
                None => vec![value],
            },
            _ => {
                return Err(DocError::Schema(
                    "schema must be an object or an array of definitions".into(),
                ));
            }
        };

        let mut pending = items
            .into_iter()
            .map(EntityDefinition::from_json)
            .collect::<Result<Vec<_>>>()?;
        let mut registered = Vec::new();

        while !pending.is_empty() {
            let before = pending.len();
            let mut waiting = Vec::new();

            for def in pending {
                let ready = def
                    .extend
                    .as_ref()
                    .is_none_or(|parent| self.entities.contains_key(parent));
                if ready {
                    registered.push(self.register(def)?.name.clone());
                } else {
                    waiting.push(def);
                }
            }

            if waiting.len() == before {
                let names: Vec<&str> = waiting.iter().map(|d| d.name.as_str()).collect();
                return Err(DocError::Schema(format!(
                    "unresolvable extend for: {}",
                    names.join(", ")
                )));
            }
            pending = waiting;
        }

        self.check_references()?;
        Ok(registered)
    }

    pub fn load_json_file(&mut self, path: &Path) -> Result<Vec<String>> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DocError::Schema(format!("cannot read schema '{}': {}", path.display(), e))
        })?;
        let value: JsonValue = serde_json::from_str(&text)?;
        self.load_json(&value)
    }

    /// Field mask of everything `role` may read on `entity`, nested
    /// structures and hydrated documents expanded as `parent.child`.
    ///
    /// Cached per `(entity, role)`. Nested expansion never reads the cache,
    /// so a mask is the same whichever entity was asked for first.
    pub fn role_mask(&self, entity: &str, role: &str) -> Result<Arc<FieldMask>> {
        let key = (entity.to_string(), role.to_string());
        if let Some(mask) = self.read_masks.lock()?.get(&key) {
            return Ok(mask.clone());
        }

        let mask = Arc::new(self.expand_mask(entity, role, &mut Vec::new())?);
        self.mask_builds.fetch_add(1, Ordering::Relaxed);
        self.read_masks.lock()?.insert(key, mask.clone());
        Ok(mask)
    }

    fn expand_mask(&self, entity: &str, role: &str, visiting: &mut Vec<String>) -> Result<FieldMask> {
        let def = self.entity(entity)?;
        let roles = RoleSet::from_roles([role]);
        let mut mask = FieldMask::new();

        visiting.push(entity.to_string());
        for property in def.properties() {
            if !property.can_read(&roles) {
                continue;
            }

            let Some(target) = property.target_entity().filter(|_| property.is_sub_document()) else {
                mask.insert(property.name());
                continue;
            };

            // A repeated type contributes only its own plain readable fields.
            let nested = if visiting.iter().any(|v| v == target) {
                self.plain_fields(target, &roles)?
            } else {
                self.expand_mask(target, role, visiting)?
            };
            for field in nested.iter() {
                mask.insert(&format!("{}.{}", property.name(), field));
            }
        }
        visiting.pop();

        Ok(mask)
    }

    fn plain_fields(&self, entity: &str, roles: &RoleSet) -> Result<FieldMask> {
        let def = self.entity(entity)?;
        Ok(FieldMask::from_fields(
            def.properties()
                .filter(|p| !p.is_sub_document() && p.can_read(roles))
                .map(|p| p.name()),
        ))
    }

    /// Number of read masks computed (not served from cache) so far.
    pub fn mask_builds(&self) -> usize {
        self.mask_builds.load(Ordering::Relaxed)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn system_properties(kind: EntityKind) -> Vec<PropertyDefinition> {
    match kind {
        EntityKind::Structure => vec![
            PropertyDefinition::new("_mg", super::ValueKind::Primitive(PrimitiveType::MiniGuid))
                .secure(Action::Update, &[]),
        ],
        EntityKind::Document => vec![
            PropertyDefinition::object_id("_id").secure(Action::Update, &[ROLE_SYSTEM]),
            PropertyDefinition::date("_created").secure(Action::Update, &[ROLE_SYSTEM]),
            PropertyDefinition::object_id("_createdBy").secure(Action::Update, &[ROLE_SYSTEM]),
            PropertyDefinition::date("_updated").secure(Action::Update, &[ROLE_SYSTEM]),
            PropertyDefinition::object_id("_updatedBy").secure(Action::Update, &[ROLE_SYSTEM]),
        ],
    }
}
