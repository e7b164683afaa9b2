use super::property::PropertyDefinition;
use super::rules::{Action, SecurityRules};
use crate::core::{DocError, Result};
use crate::service::LifecycleHooks;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Persisted root aggregate with `_id`.
    Document,
    /// Embedded aggregate with `_mg`, never persisted on its own.
    Structure,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Document => "document",
            EntityKind::Structure => "structure",
        }
    }
}

/// Declaration of a Document or Structure type.
///
/// Definitions are plain values; the registry resolves `extend`, injects
/// system properties and hands out the resolved, immutable form.
#[derive(Clone)]
pub struct EntityDefinition {
    pub(crate) name: String,
    pub(crate) kind: EntityKind,
    pub(crate) description: Option<String>,
    pub(crate) properties: Vec<Arc<PropertyDefinition>>,
    pub(crate) extend: Option<String>,
    pub(crate) owner_security: bool,
    pub(crate) group_security: bool,
    pub(crate) security: SecurityRules,
    pub(crate) indexes: Vec<JsonValue>,
    pub(crate) hooks: Option<Arc<dyn LifecycleHooks>>,
}

impl EntityDefinition {
    fn new(name: &str, kind: EntityKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: None,
            properties: Vec::new(),
            extend: None,
            owner_security: false,
            group_security: false,
            security: SecurityRules::new(),
            indexes: Vec::new(),
            hooks: None,
        }
    }

    pub fn document(name: &str) -> Self {
        Self::new(name, EntityKind::Document)
    }

    pub fn structure(name: &str) -> Self {
        Self::new(name, EntityKind::Structure)
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Declared properties replace earlier ones with the same name.
    pub fn property(mut self, property: PropertyDefinition) -> Self {
        self.upsert_property(Arc::new(property));
        self
    }

    pub fn extend(mut self, parent: &str) -> Self {
        self.extend = Some(parent.to_string());
        self
    }

    pub fn owner_security(mut self) -> Self {
        self.owner_security = true;
        self
    }

    pub fn group_security(mut self) -> Self {
        self.group_security = true;
        self
    }

    pub fn secure(mut self, action: Action, roles: &[&str]) -> Self {
        self.security.set(action, roles);
        self
    }

    pub fn index(mut self, index: JsonValue) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub(crate) fn upsert_property(&mut self, property: Arc<PropertyDefinition>) {
        match self
            .properties
            .iter_mut()
            .find(|p| p.name() == property.name())
        {
            Some(slot) => *slot = property,
            None => self.properties.push(property),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn is_document(&self) -> bool {
        self.kind == EntityKind::Document
    }

    pub fn is_structure(&self) -> bool {
        self.kind == EntityKind::Structure
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn parent(&self) -> Option<&str> {
        self.extend.as_deref()
    }

    pub fn has_owner_security(&self) -> bool {
        self.owner_security
    }

    pub fn has_group_security(&self) -> bool {
        self.group_security
    }

    pub fn security(&self) -> &SecurityRules {
        &self.security
    }

    pub fn indexes(&self) -> &[JsonValue] {
        &self.indexes
    }

    pub fn lifecycle_hooks(&self) -> Option<&Arc<dyn LifecycleHooks>> {
        self.hooks.as_ref()
    }

    pub fn properties(&self) -> impl Iterator<Item = &Arc<PropertyDefinition>> {
        self.properties.iter()
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.properties.iter().map(|p| p.name()).collect()
    }

    pub fn get_property(&self, name: &str) -> Option<&Arc<PropertyDefinition>> {
        self.properties.iter().find(|p| p.name() == name)
    }

    /// Parses the declarative form used by schema files:
    /// `{"name", "kind", "extend", "ownerSecurity", "groupSecurity", "secure", "indexes", "properties"}`.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let name = value
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| DocError::Schema("definition is missing 'name'".into()))?;

        let mut def = match value.get("kind").and_then(|k| k.as_str()).unwrap_or("document") {
            "document" | "model" => Self::document(name),
            "structure" => Self::structure(name),
            other => {
                return Err(DocError::Schema(format!(
                    "unknown kind '{}' for '{}'",
                    other, name
                )));
            }
        };

        def.description = value
            .get("description")
            .and_then(|d| d.as_str())
            .map(str::to_string);
        def.extend = value.get("extend").and_then(|e| e.as_str()).map(str::to_string);
        def.owner_security = value
            .get("ownerSecurity")
            .and_then(|o| o.as_bool())
            .unwrap_or(false);
        def.group_security = value
            .get("groupSecurity")
            .and_then(|g| g.as_bool())
            .unwrap_or(false);

        if let Some(secure) = value.get("secure") {
            def.security = SecurityRules::from_json(secure)?;
        }

        if let Some(indexes) = value.get("indexes").and_then(|i| i.as_array()) {
            def.indexes = indexes.clone();
        }

        if let Some(properties) = value.get("properties").and_then(|p| p.as_object()) {
            for (prop_name, prop) in properties {
                def.upsert_property(Arc::new(PropertyDefinition::from_json(prop_name, prop)?));
            }
        }

        Ok(def)
    }
}

impl fmt::Debug for EntityDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("properties", &self.property_names())
            .field("extend", &self.extend)
            .field("owner_security", &self.owner_security)
            .field("group_security", &self.group_security)
            .field("security", &self.security)
            .field("has_hooks", &self.hooks.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_keeps_declaration_order() {
        let def = EntityDefinition::document("Car")
            .property(PropertyDefinition::string("make"))
            .property(PropertyDefinition::string("model"))
            .property(PropertyDefinition::number("year"));
        assert_eq!(def.property_names(), vec!["make", "model", "year"]);
    }

    #[test]
    fn test_redeclared_property_wins() {
        let def = EntityDefinition::document("Car")
            .property(PropertyDefinition::string("make"))
            .property(PropertyDefinition::number("make"));
        assert_eq!(def.property_names(), vec!["make"]);
        assert!(matches!(
            def.get_property("make").unwrap().kind(),
            crate::schema::ValueKind::Primitive(crate::core::PrimitiveType::Number)
        ));
    }

    #[test]
    fn test_from_json() {
        let def = EntityDefinition::from_json(&json!({
            "name": "Post",
            "ownerSecurity": true,
            "secure": {"update": ["Admin"]},
            "properties": {
                "title": {"type": "LocaleString"},
                "tags": {"type": "String", "array": true}
            }
        }))
        .unwrap();
        assert!(def.is_document());
        assert!(def.has_owner_security());
        assert!(def.security().get(Action::Update).is_some());
        assert!(def.get_property("tags").unwrap().is_array());

        assert!(EntityDefinition::from_json(&json!({"kind": "structure"})).is_err());
        assert!(EntityDefinition::from_json(&json!({"name": "X", "kind": "table"})).is_err());
    }
}
