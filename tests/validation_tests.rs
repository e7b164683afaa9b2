/// Property validation through the registry
///
/// Run with: cargo test --test validation_tests

use memodoc::validation::PropertyResult;
use memodoc::{
    DocError, EntityDefinition, FieldValue, Instance, PropertyDefinition, SchemaRegistry, ValidationMethod,
};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

fn registry() -> Arc<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry.register_validator(
        "Even",
        Arc::new(|value: &FieldValue, _: &JsonValue| value.as_f64().is_some_and(|n| n % 2.0 == 0.0)),
    );
    registry
        .register(
            EntityDefinition::document("Account")
                .property(
                    PropertyDefinition::string("name")
                        .required()
                        .validator("MaxLength", json!(10)),
                )
                .property(PropertyDefinition::string("email").validator("Email", json!(true)))
                .property(PropertyDefinition::number("seats").validator("Even", json!(true)))
                .property(
                    PropertyDefinition::string("roles")
                        .array()
                        .validator("NoReservedRoles", json!(true))
                        .validator("ArrayMaxLength", json!(2)),
                )
                .property(PropertyDefinition::string("plan").validator("In", json!(["free", "pro"])))
                .property(PropertyDefinition::string("code").validator("Unheard", json!(true))),
        )
        .unwrap();
    Arc::new(registry)
}

#[test]
fn test_required_short_circuits_on_create() {
    let registry = registry();
    let account = Instance::new(&registry, "Account", json!({})).unwrap();

    let err = account.validate(ValidationMethod::Create).unwrap_err();
    let DocError::Validation(report) = err else {
        panic!("expected validation error");
    };
    assert_eq!(report.failed_properties(), vec!["name"]);
    assert_eq!(report.to_json()["results"]["name"], json!({"Required": false}));
}

#[test]
fn test_absent_required_is_valid_on_patch() {
    let registry = registry();
    let account = Instance::new(&registry, "Account", json!({"seats": 4})).unwrap();
    let report = account.validate(ValidationMethod::Patch).unwrap();
    assert!(report.valid);
    assert_eq!(report.results.get("name"), Some(&PropertyResult::Valid));
}

#[test]
fn test_full_report_for_invalid_values() {
    let registry = registry();
    let account = Instance::new(
        &registry,
        "Account",
        json!({
            "name": "A very long name",
            "email": "not-an-email",
            "seats": 3,
            "roles": ["Admin", "Owner", "User"],
            "plan": "gold"
        }),
    )
    .unwrap();

    let DocError::Validation(report) = account.validate(ValidationMethod::Update).unwrap_err() else {
        panic!("expected validation error");
    };
    assert_eq!(
        report.failed_properties(),
        vec!["email", "name", "plan", "roles", "seats"]
    );
    assert_eq!(
        report.to_json()["results"]["roles"],
        json!({"ArrayMaxLength": false, "NoReservedRoles": false})
    );
    assert_eq!(report.to_json()["results"]["seats"], json!({"Even": false}));
}

#[test]
fn test_valid_document_passes() {
    let registry = registry();
    let account = Instance::new(
        &registry,
        "Account",
        json!({"name": "Ann", "email": "ann@example.com", "seats": 2, "roles": ["User"], "plan": "pro"}),
    )
    .unwrap();

    let report = account.validate(ValidationMethod::Create).unwrap();
    assert!(report.valid);
    assert!(report.failed_properties().is_empty());
}

#[test]
fn test_unknown_named_validator_fails_only_when_value_present() {
    let registry = registry();
    let without = Instance::new(&registry, "Account", json!({"name": "Ann"})).unwrap();
    assert!(without.validate(ValidationMethod::Create).is_ok());

    let with = Instance::new(&registry, "Account", json!({"name": "Ann", "code": "x"})).unwrap();
    let DocError::Validation(report) = with.validate(ValidationMethod::Create).unwrap_err() else {
        panic!("expected validation error");
    };
    assert_eq!(report.failed_properties(), vec!["code"]);
}

#[test]
fn test_validation_error_code_and_message() {
    let registry = registry();
    let account = Instance::new(&registry, "Account", json!({"plan": "gold"})).unwrap();
    let err = account.validate(ValidationMethod::Create).unwrap_err();
    assert_eq!(err.code(), 400);
    assert_eq!(err.to_string(), "Validation failed for: name, plan");
}
