use super::types::{DocRef, LocaleString, json_id_string};
use crate::model::Instance;
use serde_json::Value as JsonValue;

/// A value held by an instance property.
///
/// Raw data arrives as `Primitive`/`Array` and is coerced by the owning
/// property into `Instance`, `Reference` or `Locale` where the schema asks for it.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Primitive(JsonValue),
    Instance(Instance),
    Reference(DocRef),
    Locale(LocaleString),
    Array(Vec<FieldValue>),
}

impl FieldValue {
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            other => Self::Primitive(other),
        }
    }

    /// Plain data form: nested instances are serialized recursively,
    /// identity fields included.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Primitive(v) => v.clone(),
            Self::Instance(inst) => inst.to_json(),
            Self::Reference(r) => r.to_json(),
            Self::Locale(ls) => ls.to_json(),
            Self::Array(items) => JsonValue::Array(items.iter().map(FieldValue::to_json).collect()),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Null | Self::Primitive(JsonValue::Null))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Primitive(JsonValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Primitive(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Primitive(v) => v.as_f64(),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Instance(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&DocRef> {
        match self {
            Self::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_locale(&self) -> Option<&LocaleString> {
        match self {
            Self::Locale(ls) => Some(ls),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Every live instance directly held by this value (the value itself,
    /// or the elements of an array).
    pub fn instances(&self) -> Vec<Instance> {
        match self {
            Self::Instance(inst) => vec![inst.clone()],
            Self::Array(items) => items
                .iter()
                .filter_map(|item| item.as_instance().cloned())
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        Self::Null
    }
}

impl From<JsonValue> for FieldValue {
    fn from(value: JsonValue) -> Self {
        Self::from_json(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Primitive(JsonValue::String(value.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Primitive(JsonValue::String(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Primitive(JsonValue::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Primitive(JsonValue::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Primitive(JsonValue::Bool(value))
    }
}

impl From<Instance> for FieldValue {
    fn from(value: Instance) -> Self {
        Self::Instance(value)
    }
}

impl From<DocRef> for FieldValue {
    fn from(value: DocRef) -> Self {
        Self::Reference(value)
    }
}

impl From<LocaleString> for FieldValue {
    fn from(value: LocaleString) -> Self {
        Self::Locale(value)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(value: Vec<FieldValue>) -> Self {
        Self::Array(value)
    }
}

/// How elements of an array-valued property are matched between the
/// committed snapshot and the current contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRule {
    /// Embedded structures, matched on `_mg`.
    MiniGuid,
    /// Hydrated documents, matched on `_id`.
    DocumentId,
    /// Unhydrated references, matched on the referenced id.
    ReferenceId,
    /// Primitives, matched on value equality.
    Value,
}

impl IdentityRule {
    /// Field path (relative to the element) that carries the identity.
    pub fn path(&self) -> &'static str {
        match self {
            Self::MiniGuid => "_mg",
            Self::DocumentId => "_id",
            Self::ReferenceId => "$id",
            Self::Value => "",
        }
    }

    pub fn identity_of(&self, value: &FieldValue) -> Option<JsonValue> {
        match (self, value) {
            (Self::MiniGuid | Self::DocumentId, FieldValue::Instance(inst)) => {
                inst.identity().map(JsonValue::String)
            }
            (Self::ReferenceId, FieldValue::Reference(r)) => Some(JsonValue::String(r.id.clone())),
            (Self::Value, other) => Some(other.to_json()),
            (_, other) => {
                // Raw data that was never coerced: read the identity field directly.
                let json = other.to_json();
                json.get(self.path()).cloned()
            }
        }
    }

    /// String key used for the `sub` map of an array change.
    pub fn identity_key(&self, value: &FieldValue) -> Option<String> {
        self.identity_of(value).map(|id| match self {
            Self::Value => id.to_string(),
            _ => identity_key_of(&id),
        })
    }

    /// Parses a `sub` map key back into the identity value it was made from.
    pub fn identity_from_key(&self, key: &str) -> JsonValue {
        match self {
            Self::Value => serde_json::from_str(key).unwrap_or_else(|_| JsonValue::String(key.to_string())),
            _ => JsonValue::String(key.to_string()),
        }
    }
}

pub fn identity_key_of(id: &JsonValue) -> String {
    json_id_string(id).unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_arrays_and_null() {
        assert!(FieldValue::from_json(JsonValue::Null).is_absent());
        let arr = FieldValue::from_json(json!([1, "a"]));
        assert_eq!(arr.as_array().map(|a| a.len()), Some(2));
        assert_eq!(arr.to_json(), json!([1, "a"]));
    }

    #[test]
    fn test_value_identity_round_trips_through_key() {
        let rule = IdentityRule::Value;
        let v = FieldValue::from(42i64);
        let key = rule.identity_key(&v).unwrap();
        assert_eq!(rule.identity_from_key(&key), json!(42));

        let s = FieldValue::from("red");
        let key = rule.identity_key(&s).unwrap();
        assert_eq!(key, "\"red\"");
        assert_eq!(rule.identity_from_key(&key), json!("red"));
    }

    #[test]
    fn test_raw_identity_lookup() {
        let raw = FieldValue::from_json(json!({"_mg": "A", "name": "x"}));
        assert_eq!(IdentityRule::MiniGuid.identity_of(&raw), Some(json!("A")));
    }
}
