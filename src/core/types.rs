use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::BTreeMap;
use uuid::Uuid;

const UID_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Scalar kinds a property can declare. Coercion passes these through
/// untouched; the kind is informational for validators and tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    MiniGuid,
    Any,
}

impl PrimitiveType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "String" => Some(Self::String),
            "Number" => Some(Self::Number),
            "Boolean" => Some(Self::Boolean),
            "Date" => Some(Self::Date),
            "ObjectID" | "ObjectId" => Some(Self::ObjectId),
            "MiniGuid" => Some(Self::MiniGuid),
            "Any" | "Object" => Some(Self::Any),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Number => "Number",
            Self::Boolean => "Boolean",
            Self::Date => "Date",
            Self::ObjectId => "ObjectID",
            Self::MiniGuid => "MiniGuid",
            Self::Any => "Any",
        }
    }
}

/// Handle to another persisted document that has not been materialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        json!({ "$ref": self.collection, "$id": self.id })
    }

    /// Accepts `{"$ref", "$id"}`, `{"_id"}`, or a bare id string.
    pub fn from_json(collection: &str, value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(id) => Some(Self::new(collection, id.clone())),
            JsonValue::Object(map) => {
                let id = map
                    .get("$id")
                    .or_else(|| map.get("_id"))
                    .and_then(json_id_string)?;
                let collection = map
                    .get("$ref")
                    .and_then(|v| v.as_str())
                    .unwrap_or(collection);
                Some(Self::new(collection, id))
            }
            _ => None,
        }
    }
}

/// A string that carries one value per locale tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocaleString {
    raw: BTreeMap<String, String>,
}

impl LocaleString {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(locale: &str, value: impl Into<String>) -> Self {
        let mut ls = Self::new();
        ls.set(locale, value);
        ls
    }

    pub fn get(&self, locale: &str) -> Option<&str> {
        self.raw.get(locale).map(String::as_str)
    }

    pub fn set(&mut self, locale: &str, value: impl Into<String>) {
        self.raw.insert(locale.to_string(), value.into());
    }

    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.raw.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn to_json(&self) -> JsonValue {
        let map: Map<String, JsonValue> = self
            .raw
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
            .collect();
        JsonValue::Object(map)
    }

    /// A bare string is stored under `locale`; an object is read as locale -> text.
    pub fn from_json(value: &JsonValue, locale: &str) -> Option<Self> {
        match value {
            JsonValue::String(s) => Some(Self::with_value(locale, s.clone())),
            JsonValue::Object(map) => {
                let mut ls = Self::new();
                for (k, v) in map {
                    if let Some(s) = v.as_str() {
                        ls.set(k, s);
                    }
                }
                Some(ls)
            }
            _ => None,
        }
    }
}

/// Random alphanumeric identifier used as the `_mg` key of structures.
pub fn mini_guid(len: usize) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        for byte in Uuid::new_v4().as_bytes() {
            if out.len() == len {
                break;
            }
            out.push(UID_CHARS[(*byte as usize) % UID_CHARS.len()] as char);
        }
    }
    out
}

pub fn new_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Identifiers may arrive as strings or numbers; both compare as strings.
pub fn json_id_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mini_guid_length_and_charset() {
        let id = mini_guid(6);
        assert_eq!(id.len(), 6);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));

        let long = mini_guid(40);
        assert_eq!(long.len(), 40);
    }

    #[test]
    fn test_doc_ref_from_json_shapes() {
        let a = DocRef::from_json("User", &json!("abc")).unwrap();
        let b = DocRef::from_json("User", &json!({"_id": "abc", "name": "x"})).unwrap();
        let c = DocRef::from_json("User", &json!({"$ref": "User", "$id": "abc"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!(DocRef::from_json("User", &json!(true)).is_none());
    }

    #[test]
    fn test_locale_string() {
        let mut ls = LocaleString::from_json(&json!("Hello"), "en").unwrap();
        ls.set("fr", "Bonjour");
        assert_eq!(ls.get("en"), Some("Hello"));
        assert_eq!(ls.get("fr"), Some("Bonjour"));
        assert_eq!(ls.to_json(), json!({"en": "Hello", "fr": "Bonjour"}));
    }
}
