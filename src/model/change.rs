//! Hierarchical change descriptions.
//!
//! The same shape serves as the local dirty-tracking record of an
//! instance and as the update set a client sends for `patch`. On the wire
//! every entry is tagged by `cmd`:
//!
//! ```json
//! {"name":  {"cmd": "set", "val": "Bob"},
//!  "home":  {"cmd": "sub", "val": {"city": {"cmd": "unset"}}},
//!  "tags":  {"cmd": "array", "push": ["new"], "pull": [{"identity": "", "val": "old"}], "sub": {}}}
//! ```

use crate::core::{DocError, FieldValue, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Pending change for one property.
#[derive(Debug, Clone)]
pub enum Change {
    /// Value cleared.
    Unset,
    /// Whole value replaced.
    Set(FieldValue),
    /// Nested aggregate kept its identity but changed inside.
    Sub(ChangeSet),
    /// Element-level reconciliation of an array property.
    Array(ArrayChange),
}

impl Change {
    /// Set and unset replace the whole value and win over any finer entry.
    pub fn is_wholesale(&self) -> bool {
        matches!(self, Change::Set(_) | Change::Unset)
    }

    pub fn cmd(&self) -> &'static str {
        match self {
            Change::Unset => "unset",
            Change::Set(_) => "set",
            Change::Sub(_) => "sub",
            Change::Array(_) => "array",
        }
    }
}

/// Removal of an array element, matched on `identity` (a path inside the
/// element, empty for primitive values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullEntry {
    pub identity: String,
    pub val: JsonValue,
}

#[derive(Debug, Clone, Default)]
pub struct ArrayChange {
    pub push: Vec<FieldValue>,
    pub pull: Vec<PullEntry>,
    /// Nested changes of surviving elements, keyed by element identity.
    pub sub: BTreeMap<String, ChangeSet>,
}

impl ArrayChange {
    pub fn is_empty(&self) -> bool {
        self.push.is_empty() && self.pull.is_empty() && self.sub.is_empty()
    }
}

/// Property name to pending change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeMap<String, Change>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Change> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Change> {
        self.0.get_mut(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, change: Change) -> Option<Change> {
        self.0.insert(name.into(), change)
    }

    pub fn remove(&mut self, name: &str) -> Option<Change> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Change)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Builder helpers for constructing update sets by hand.
    pub fn set(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(name, Change::Set(value.into()));
        self
    }

    pub fn unset(mut self, name: &str) -> Self {
        self.insert(name, Change::Unset);
        self
    }

    pub fn sub(mut self, name: &str, changes: ChangeSet) -> Self {
        self.insert(name, Change::Sub(changes));
        self
    }

    pub fn array(mut self, name: &str, change: ArrayChange) -> Self {
        self.insert(name, Change::Array(change));
        self
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// Parses the wire form; malformed input is an `InvalidUpdateSet`.
    pub fn from_json(value: JsonValue) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| DocError::InvalidUpdateSet(e.to_string()))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
enum WireChange {
    Unset,
    Set {
        #[serde(default)]
        val: JsonValue,
    },
    Sub {
        val: ChangeSet,
    },
    Array {
        #[serde(default)]
        push: Vec<JsonValue>,
        #[serde(default)]
        pull: Vec<PullEntry>,
        #[serde(default)]
        sub: BTreeMap<String, ChangeSet>,
    },
}

impl Serialize for Change {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let wire = match self {
            Change::Unset => WireChange::Unset,
            Change::Set(value) => WireChange::Set {
                val: value.to_json(),
            },
            Change::Sub(changes) => WireChange::Sub {
                val: changes.clone(),
            },
            Change::Array(array) => WireChange::Array {
                push: array.push.iter().map(FieldValue::to_json).collect(),
                pull: array.pull.clone(),
                sub: array.sub.clone(),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Change {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match WireChange::deserialize(deserializer)? {
            WireChange::Unset => Change::Unset,
            WireChange::Set { val } if val.is_null() => Change::Unset,
            WireChange::Set { val } => Change::Set(FieldValue::from_json(val)),
            WireChange::Sub { val } => Change::Sub(val),
            WireChange::Array { push, pull, sub } => Change::Array(ArrayChange {
                push: push.into_iter().map(FieldValue::from_json).collect(),
                pull,
                sub,
            }),
        })
    }
}
