use super::rules::{Action, SecurityRules};
use super::registry::SchemaRegistry;
use crate::core::{DocError, DocRef, FieldValue, IdentityRule, LocaleString, PrimitiveType, Result};
use crate::model::Instance;
use crate::security::RoleSet;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// Complex value types with their own representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexType {
    LocaleString,
}

/// What a property holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Primitive(PrimitiveType),
    /// Embedded structure, stored inline and matched on `_mg`.
    Structure(String),
    /// Another document: materialized inline when `hydrate`, otherwise held as a `DocRef`.
    Document { entity: String, hydrate: bool },
    Type(ComplexType),
}

pub type CustomValidator = Arc<dyn Fn(&FieldValue, &Instance) -> bool + Send + Sync>;

/// A declared validator: a named rule from the registry with its
/// parameter, or a closure given the value and the whole candidate.
#[derive(Clone)]
pub enum ValidatorSpec {
    Named(JsonValue),
    Custom(CustomValidator),
}

impl fmt::Debug for ValidatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatorSpec::Named(param) => write!(f, "Named({})", param),
            ValidatorSpec::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

pub const REQUIRED_RULE: &str = "Required";

#[derive(Debug, Clone)]
pub struct PropertyDefinition {
    name: String,
    kind: ValueKind,
    array: bool,
    validators: Vec<(String, ValidatorSpec)>,
    security: SecurityRules,
    description: Option<String>,
}

impl PropertyDefinition {
    pub fn new(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            array: false,
            validators: Vec::new(),
            security: SecurityRules::new(),
            description: None,
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, ValueKind::Primitive(PrimitiveType::String))
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, ValueKind::Primitive(PrimitiveType::Number))
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, ValueKind::Primitive(PrimitiveType::Boolean))
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, ValueKind::Primitive(PrimitiveType::Date))
    }

    pub fn object_id(name: &str) -> Self {
        Self::new(name, ValueKind::Primitive(PrimitiveType::ObjectId))
    }

    pub fn any(name: &str) -> Self {
        Self::new(name, ValueKind::Primitive(PrimitiveType::Any))
    }

    pub fn structure(name: &str, entity: &str) -> Self {
        Self::new(name, ValueKind::Structure(entity.to_string()))
    }

    pub fn hydrated(name: &str, entity: &str) -> Self {
        Self::new(
            name,
            ValueKind::Document {
                entity: entity.to_string(),
                hydrate: true,
            },
        )
    }

    pub fn reference(name: &str, entity: &str) -> Self {
        Self::new(
            name,
            ValueKind::Document {
                entity: entity.to_string(),
                hydrate: false,
            },
        )
    }

    pub fn locale_string(name: &str) -> Self {
        Self::new(name, ValueKind::Type(ComplexType::LocaleString))
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn validator(mut self, rule: &str, param: JsonValue) -> Self {
        self.validators.retain(|(name, _)| name != rule);
        self.validators
            .push((rule.to_string(), ValidatorSpec::Named(param)));
        self
    }

    pub fn required(self) -> Self {
        self.validator(REQUIRED_RULE, JsonValue::Bool(true))
    }

    pub fn custom_validator(
        mut self,
        rule: &str,
        f: impl Fn(&FieldValue, &Instance) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validators.retain(|(name, _)| name != rule);
        self.validators
            .push((rule.to_string(), ValidatorSpec::Custom(Arc::new(f))));
        self
    }

    pub fn secure(mut self, action: Action, roles: &[&str]) -> Self {
        self.security.set(action, roles);
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn validators(&self) -> &[(String, ValidatorSpec)] {
        &self.validators
    }

    pub fn security(&self) -> &SecurityRules {
        &self.security
    }

    pub fn is_array(&self) -> bool {
        self.array
    }

    /// Structures and hydrated documents: stored inline as live instances.
    pub fn is_sub_document(&self) -> bool {
        matches!(
            self.kind,
            ValueKind::Structure(_) | ValueKind::Document { hydrate: true, .. }
        )
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, ValueKind::Document { hydrate: false, .. })
    }

    pub fn is_type(&self) -> bool {
        matches!(self.kind, ValueKind::Type(_))
    }

    pub fn is_locale_sensitive(&self) -> bool {
        matches!(self.kind, ValueKind::Type(ComplexType::LocaleString))
    }

    pub fn has_validators(&self) -> bool {
        !self.validators.is_empty()
    }

    pub fn is_required(&self) -> bool {
        self.validators.iter().any(|(name, spec)| {
            name == REQUIRED_RULE
                && matches!(spec, ValidatorSpec::Named(param) if param.as_bool().unwrap_or(!param.is_null()))
        })
    }

    /// Entity named by structure/document properties.
    pub fn target_entity(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Structure(entity) | ValueKind::Document { entity, .. } => Some(entity),
            _ => None,
        }
    }

    pub fn identity_rule(&self) -> IdentityRule {
        match &self.kind {
            ValueKind::Structure(_) => IdentityRule::MiniGuid,
            ValueKind::Document { hydrate: true, .. } => IdentityRule::DocumentId,
            ValueKind::Document { hydrate: false, .. } => IdentityRule::ReferenceId,
            _ => IdentityRule::Value,
        }
    }

    pub fn can_action(&self, roles: &RoleSet, action: Action) -> bool {
        self.security.allows(roles, action)
    }

    pub fn can_read(&self, roles: &RoleSet) -> bool {
        self.can_action(roles, Action::Read)
    }

    pub fn can_update(&self, roles: &RoleSet) -> bool {
        self.can_action(roles, Action::Update)
    }

    /// Coerces a value being assigned to this property.
    pub fn cast(
        &self,
        registry: &Arc<SchemaRegistry>,
        value: FieldValue,
        locale: &str,
    ) -> Result<FieldValue> {
        if value.is_absent() {
            return Ok(FieldValue::Null);
        }

        if !self.array {
            return self.cast_element(registry, value, locale);
        }

        let items = match value {
            FieldValue::Array(items) => items,
            single => vec![single],
        };

        items
            .into_iter()
            .filter(|item| !item.is_absent())
            .map(|item| self.cast_element(registry, item, locale))
            .collect::<Result<Vec<_>>>()
            .map(FieldValue::Array)
    }

    /// Coerces one element (the value itself for non-array properties).
    pub fn cast_element(
        &self,
        registry: &Arc<SchemaRegistry>,
        value: FieldValue,
        locale: &str,
    ) -> Result<FieldValue> {
        match &self.kind {
            ValueKind::Primitive(_) => Ok(value),
            ValueKind::Structure(entity) | ValueKind::Document { entity, hydrate: true } => {
                match value {
                    FieldValue::Instance(inst) => {
                        if registry.is_kind_of(inst.entity_name(), entity) {
                            Ok(FieldValue::Instance(inst))
                        } else {
                            Err(DocError::TypeMismatch(format!(
                                "property '{}' expects {}, got {}",
                                self.name,
                                entity,
                                inst.entity_name()
                            )))
                        }
                    }
                    FieldValue::Primitive(raw @ JsonValue::Object(_)) => {
                        Instance::with_locale(registry, entity, raw, locale).map(FieldValue::Instance)
                    }
                    other => Err(self.mismatch(entity, &other)),
                }
            }
            ValueKind::Document {
                entity,
                hydrate: false,
            } => match value {
                FieldValue::Reference(r) => Ok(FieldValue::Reference(r)),
                FieldValue::Instance(inst) => inst
                    .id()
                    .map(|id| FieldValue::Reference(DocRef::new(entity.clone(), id)))
                    .ok_or_else(|| {
                        DocError::TypeMismatch(format!(
                            "property '{}' cannot reference an unsaved {}",
                            self.name, entity
                        ))
                    }),
                FieldValue::Primitive(raw) => DocRef::from_json(entity, &raw)
                    .map(FieldValue::Reference)
                    .ok_or_else(|| self.mismatch(entity, &FieldValue::Primitive(raw))),
                other => Err(self.mismatch(entity, &other)),
            },
            ValueKind::Type(ComplexType::LocaleString) => match value {
                FieldValue::Locale(ls) => Ok(FieldValue::Locale(ls)),
                FieldValue::Primitive(raw) => LocaleString::from_json(&raw, locale)
                    .map(FieldValue::Locale)
                    .ok_or_else(|| self.mismatch("LocaleString", &FieldValue::Primitive(raw))),
                other => Err(self.mismatch("LocaleString", &other)),
            },
        }
    }

    fn mismatch(&self, expected: &str, got: &FieldValue) -> DocError {
        DocError::TypeMismatch(format!(
            "property '{}' expects {}, got {}",
            self.name,
            expected,
            got.to_json()
        ))
    }

    /// Parses the declarative form:
    /// `{"type": "Structure.Address", "array": true, "validators": {...}, "secure": {...}}`.
    pub fn from_json(name: &str, value: &JsonValue) -> Result<Self> {
        let type_name = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| DocError::Schema(format!("Type is required for property '{}'", name)))?;
        let hydrate = value.get("hydrate").and_then(|h| h.as_bool()).unwrap_or(false);

        let kind = if let Some(entity) = type_name.strip_prefix("Structure.") {
            ValueKind::Structure(entity.to_string())
        } else if let Some(entity) = type_name.strip_prefix("Model.") {
            ValueKind::Document {
                entity: entity.to_string(),
                hydrate,
            }
        } else if type_name == "LocaleString" {
            ValueKind::Type(ComplexType::LocaleString)
        } else if let Some(primitive) = PrimitiveType::parse(type_name) {
            ValueKind::Primitive(primitive)
        } else {
            return Err(DocError::Schema(format!(
                "Unknown type '{}' for property '{}'",
                type_name, name
            )));
        };

        let mut property = Self::new(name, kind);
        property.array = value.get("array").and_then(|a| a.as_bool()).unwrap_or(false);
        property.description = value
            .get("description")
            .and_then(|d| d.as_str())
            .map(str::to_string);

        if let Some(validators) = value.get("validators").and_then(|v| v.as_object()) {
            for (rule, param) in validators {
                property = property.validator(rule, param.clone());
            }
        }

        if let Some(secure) = value.get("secure") {
            property.security = SecurityRules::from_json(secure)?;
        }

        Ok(property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predicates() {
        let s = PropertyDefinition::structure("address", "Address");
        assert!(s.is_sub_document());
        assert!(!s.is_reference());
        assert_eq!(s.identity_rule(), IdentityRule::MiniGuid);

        let h = PropertyDefinition::hydrated("manager", "User");
        assert!(h.is_sub_document());
        assert_eq!(h.identity_rule(), IdentityRule::DocumentId);

        let r = PropertyDefinition::reference("author", "User").array();
        assert!(r.is_reference());
        assert!(r.is_array());
        assert_eq!(r.identity_rule(), IdentityRule::ReferenceId);

        let l = PropertyDefinition::locale_string("title");
        assert!(l.is_type());
        assert!(l.is_locale_sensitive());
        assert_eq!(l.identity_rule(), IdentityRule::Value);
    }

    #[test]
    fn test_required_detection() {
        assert!(PropertyDefinition::string("name").required().is_required());
        assert!(
            !PropertyDefinition::string("name")
                .validator(REQUIRED_RULE, json!(false))
                .is_required()
        );
        assert!(!PropertyDefinition::string("name").is_required());
    }

    #[test]
    fn test_validator_redeclaration_replaces() {
        let p = PropertyDefinition::string("name")
            .validator("MinLength", json!(2))
            .validator("MinLength", json!(4));
        assert_eq!(p.validators().len(), 1);
    }

    #[test]
    fn test_can_action() {
        let p = PropertyDefinition::string("color").secure(Action::Update, &["Admin"]);
        assert!(!p.can_update(&RoleSet::from_roles(["User"])));
        assert!(p.can_update(&RoleSet::from_roles(["Admin"])));
        assert!(p.can_read(&RoleSet::from_roles(["User"])));
    }

    #[test]
    fn test_from_json() {
        let p = PropertyDefinition::from_json(
            "items",
            &json!({
                "type": "Structure.Item",
                "array": true,
                "validators": {"ArrayMinLength": 1},
                "secure": {"update": ["Admin"]}
            }),
        )
        .unwrap();
        assert_eq!(p.kind(), &ValueKind::Structure("Item".into()));
        assert!(p.is_array());
        assert!(p.has_validators());
        assert!(p.security().get(Action::Update).is_some());

        let m = PropertyDefinition::from_json("owner", &json!({"type": "Model.User", "hydrate": true})).unwrap();
        assert!(m.is_sub_document());

        assert!(PropertyDefinition::from_json("x", &json!({})).is_err());
        assert!(PropertyDefinition::from_json("x", &json!({"type": "Banana"})).is_err());
    }
}
