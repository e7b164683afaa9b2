use crate::core::{DocError, FieldValue, Result};
use crate::model::Instance;
use crate::schema::{PropertyDefinition, REQUIRED_RULE, ValidatorSpec};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Which write path the candidate is validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMethod {
    Create,
    Update,
    /// Partial update: absent values were simply not supplied.
    Patch,
}

impl ValidationMethod {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "patch" => Some(Self::Patch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Patch => "patch",
        }
    }
}

impl fmt::Display for ValidationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for one property: `true`, or the per-rule detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyResult {
    Valid,
    Invalid(BTreeMap<String, bool>),
}

impl PropertyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, PropertyResult::Valid)
    }
}

impl Serialize for PropertyResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PropertyResult::Valid => serializer.serialize_bool(true),
            PropertyResult::Invalid(rules) => rules.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub results: BTreeMap<String, PropertyResult>,
}

impl ValidationReport {
    pub fn failed_properties(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| !r.is_valid())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Checks one property of `instance`.
///
/// `Required` runs first: on create and update an absent value fails
/// without running other rules. An absent value is otherwise valid.
pub fn validate_property(
    instance: &Instance,
    property: &PropertyDefinition,
    method: ValidationMethod,
) -> PropertyResult {
    let registry = instance.registry().validators();
    let value = instance.get(property.name()).unwrap_or(FieldValue::Null);
    let mut rules = BTreeMap::new();

    if method != ValidationMethod::Patch && property.is_required() {
        let present = registry.check(REQUIRED_RULE, &value, &serde_json::Value::Bool(true));
        if !present {
            rules.insert(REQUIRED_RULE.to_string(), false);
            return PropertyResult::Invalid(rules);
        }
    }

    if value.is_absent() {
        return PropertyResult::Valid;
    }

    for (name, spec) in property.validators() {
        if name == REQUIRED_RULE {
            continue;
        }
        let passed = match spec {
            ValidatorSpec::Named(param) => registry.check(name, &value, param),
            ValidatorSpec::Custom(validator) => validator(&value, instance),
        };
        rules.insert(name.clone(), passed);
    }

    if rules.values().all(|passed| *passed) {
        PropertyResult::Valid
    } else {
        PropertyResult::Invalid(rules)
    }
}

/// Validates every property that declares validators. Fails with
/// `DocError::Validation` carrying the full report.
pub fn validate(instance: &Instance, method: ValidationMethod) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        valid: true,
        results: BTreeMap::new(),
    };

    for property in instance.entity().properties().filter(|p| p.has_validators()) {
        let result = validate_property(instance, property, method);
        report.valid &= result.is_valid();
        report.results.insert(property.name().to_string(), result);
    }

    if report.valid {
        Ok(report)
    } else {
        tracing::debug!(
            entity = %instance.entity_name(),
            method = %method,
            failed = ?report.failed_properties(),
            "validation failed"
        );
        Err(DocError::Validation(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityDefinition, SchemaRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> Arc<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                EntityDefinition::document("Person")
                    .property(
                        PropertyDefinition::string("name")
                            .required()
                            .validator("MinLength", json!(2))
                            .custom_validator("IsText", |value, _| value.as_str().is_some()),
                    )
                    .property(PropertyDefinition::number("age").validator("Min", json!(0)))
                    .property(
                        PropertyDefinition::string("nick")
                            .custom_validator("DiffersFromName", |value, person| {
                                value.as_str() != person.get_str("name").as_deref()
                            }),
                    ),
            )
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_required_short_circuits_on_create() {
        let registry = registry();
        let person = Instance::new(&registry, "Person", json!({})).unwrap();
        let name = person.entity().get_property("name").unwrap();

        // Only the Required rule appears: nothing else ran.
        let result = validate_property(&person, name, ValidationMethod::Create);
        assert_eq!(
            result,
            PropertyResult::Invalid(BTreeMap::from([("Required".to_string(), false)]))
        );
        assert!(validate_property(&person, name, ValidationMethod::Patch).is_valid());
    }

    #[test]
    fn test_absent_is_valid_on_patch() {
        let registry = registry();
        let person = Instance::new(&registry, "Person", json!({"age": 3})).unwrap();
        let report = validate(&person, ValidationMethod::Patch).unwrap();
        assert!(report.valid);
        assert_eq!(report.to_json()["results"]["name"], json!(true));
    }

    #[test]
    fn test_report_detail_and_error() {
        let registry = registry();
        let person = Instance::new(&registry, "Person", json!({"name": "A", "age": -1, "nick": "A"})).unwrap();
        let err = validate(&person, ValidationMethod::Update).unwrap_err();

        let DocError::Validation(report) = err else {
            panic!("expected validation error");
        };
        assert!(!report.valid);
        assert_eq!(report.failed_properties(), vec!["age", "name", "nick"]);
        assert_eq!(
            report.to_json()["results"]["name"],
            json!({"MinLength": false, "IsText": true})
        );
        assert_eq!(report.to_json()["results"]["nick"], json!({"DiffersFromName": false}));
    }
}
