/// Declarative schema files and registration rules
///
/// Run with: cargo test --test schema_loading_tests

use memodoc::{
    Action, DocError, EngineConfig, EntityDefinition, PropertyDefinition, SchemaRegistry,
};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn schema_file(value: serde_json::Value) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", value).unwrap();
    file
}

#[test]
fn test_load_schema_file() {
    let file = schema_file(json!({"definitions": [
        {"name": "Employee", "extend": "Person", "secure": {"update": ["HR"]},
         "properties": {"salary": {"type": "Number", "secure": {"read": ["HR"]}}}},
        {"name": "Person", "ownerSecurity": true, "properties": {
            "name": {"type": "String", "validators": {"Required": true, "MaxLength": 40}},
            "title": {"type": "LocaleString"},
            "home": {"type": "Structure.Address"},
            "manager": {"type": "Model.Person", "hydrate": false},
            "skills": {"type": "String", "array": true}
        }},
        {"name": "Address", "kind": "structure", "properties": {"city": {"type": "String"}}}
    ]}));

    let mut registry = SchemaRegistry::new();
    let names = registry.load_json_file(file.path()).unwrap();
    assert_eq!(names.len(), 3);

    let employee = registry.entity("Employee").unwrap();
    assert!(employee.has_owner_security());
    assert!(employee.get_property("_owner").is_some());
    assert!(employee.get_property("home").unwrap().is_sub_document());
    assert!(employee.get_property("manager").unwrap().is_reference());
    assert!(employee.get_property("title").unwrap().is_locale_sensitive());
    assert!(employee.get_property("skills").unwrap().is_array());
    assert!(employee.get_property("name").unwrap().is_required());
    assert_eq!(employee.security().get(Action::Update), Some(&["HR".to_string()][..]));
    assert!(registry.is_kind_of("Employee", "Person"));
    assert!(!registry.is_kind_of("Person", "Employee"));
}

#[test]
fn test_missing_file_and_bad_json() {
    let mut registry = SchemaRegistry::new();
    let err = registry
        .load_json_file(std::path::Path::new("/definitely/not/here.json"))
        .unwrap_err();
    assert!(matches!(err, DocError::Schema(_)));

    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    let err = registry.load_json_file(file.path()).unwrap_err();
    assert!(matches!(err, DocError::Serialization(_)));
}

#[test]
fn test_unresolvable_extend_rejected() {
    let mut registry = SchemaRegistry::new();
    let err = registry
        .load_json(&json!([{"name": "Child", "extend": "Ghost", "properties": {}}]))
        .unwrap_err();
    assert!(matches!(err, DocError::Schema(_)));
}

#[test]
fn test_unknown_property_type_rejected() {
    let mut registry = SchemaRegistry::new();
    let err = registry
        .load_json(&json!({"name": "Thing", "properties": {"x": {"type": "Complex"}}}))
        .unwrap_err();
    assert!(matches!(err, DocError::Schema(_)));
}

#[test]
fn test_reserved_words_rejected() {
    for word in ["_id", "_owner", "save", "delta", "patch"] {
        let mut registry = SchemaRegistry::new();
        let err = registry
            .register(EntityDefinition::document("Bad").property(PropertyDefinition::string(word)))
            .unwrap_err();
        assert!(matches!(err, DocError::Schema(_)), "{} should be reserved", word);
    }
}

#[test]
fn test_duplicate_registration_rejected() {
    let mut registry = SchemaRegistry::new();
    registry.register(EntityDefinition::document("Car")).unwrap();
    assert!(registry.register(EntityDefinition::document("Car")).is_err());
}

#[test]
fn test_config_drives_instances() {
    let config = EngineConfig::new().default_locale("de").mini_guid_length(10);
    let mut registry = SchemaRegistry::with_config(config);
    registry
        .register(EntityDefinition::structure("Tag").property(PropertyDefinition::locale_string("label")))
        .unwrap();
    let registry = Arc::new(registry);

    let tag = registry.entity_type("Tag").unwrap().instantiate(json!({"label": "Hallo"})).unwrap();
    assert_eq!(tag.locale(), "de");
    assert_eq!(tag.mini_guid().map(|mg| mg.len()), Some(10));
    assert_eq!(tag.to_json()["label"], json!({"de": "Hallo"}));
}

#[test]
fn test_config_from_lookup() {
    let config = EngineConfig::from_lookup(|key| match key {
        "MEMODOC_DEFAULT_LOCALE" => Some("fr".to_string()),
        "MEMODOC_MINI_GUID_LENGTH" => Some("oops".to_string()),
        _ => None,
    });
    assert_eq!(config.default_locale, "fr");
    assert_eq!(config.mini_guid_length, 6);
}
