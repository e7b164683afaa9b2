use crate::core::{DocError, FieldValue, Result};
use lru::LruCache;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Named validator: `(value, rule parameter) -> passed`.
pub type ValidatorFn = Arc<dyn Fn(&FieldValue, &JsonValue) -> bool + Send + Sync>;

lazy_static::lazy_static! {
    static ref REGEX_LRU_CACHE: Arc<Mutex<LruCache<String, Arc<Regex>>>> =
        Arc::new(Mutex::new(LruCache::new(NonZeroUsize::new(200).unwrap_or(NonZeroUsize::MIN))));

    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles");
}

/// Roles no user-editable role list may contain.
pub const RESERVED_ROLES: &[&str] = &["System", "Anonymous", "Owner", "Group"];

/// Compiled regex from cache, or compile and remember it.
pub fn get_or_compile_regex(pattern: &str) -> Result<Arc<Regex>> {
    {
        let mut cache = REGEX_LRU_CACHE.lock()?;
        if let Some(regex) = cache.get(pattern) {
            return Ok(regex.clone());
        }
    }

    let regex = Arc::new(
        Regex::new(pattern)
            .map_err(|e| DocError::Schema(format!("invalid pattern '{}': {}", pattern, e)))?,
    );

    REGEX_LRU_CACHE
        .lock()?
        .put(pattern.to_string(), regex.clone());
    Ok(regex)
}

/// Length of a string (in chars), array, or locale value (current text
/// is not known here, so the longest translation).
fn length_of(value: &FieldValue) -> Option<usize> {
    match value {
        FieldValue::Primitive(JsonValue::String(s)) => Some(s.chars().count()),
        FieldValue::Array(items) => Some(items.len()),
        FieldValue::Locale(ls) => ls
            .locales()
            .filter_map(|l| ls.get(l))
            .map(|s| s.chars().count())
            .max(),
        _ => None,
    }
}

fn array_length_of(value: &FieldValue) -> Option<usize> {
    value.as_array().map(<[FieldValue]>::len)
}

fn required(value: &FieldValue, _: &JsonValue) -> bool {
    match value {
        FieldValue::Null => false,
        FieldValue::Primitive(JsonValue::Null) => false,
        FieldValue::Primitive(JsonValue::String(s)) => !s.is_empty(),
        FieldValue::Primitive(JsonValue::Number(n)) => n.as_f64().is_some_and(f64::is_finite),
        _ => true,
    }
}

fn email(value: &FieldValue, _: &JsonValue) -> bool {
    value.as_str().is_some_and(|s| EMAIL_REGEX.is_match(s))
}

fn regex(value: &FieldValue, pattern: &JsonValue) -> bool {
    let (Some(text), Some(pattern)) = (value.as_str(), pattern.as_str()) else {
        return false;
    };
    match get_or_compile_regex(pattern) {
        Ok(regex) => regex.is_match(text),
        Err(err) => {
            tracing::debug!(error = %err, "RegEx validator has an invalid pattern");
            false
        }
    }
}

fn min(value: &FieldValue, bound: &JsonValue) -> bool {
    match (value.as_f64(), bound.as_f64()) {
        (Some(v), Some(b)) => v >= b,
        _ => match (value.as_str(), bound.as_str()) {
            (Some(v), Some(b)) => v >= b,
            _ => false,
        },
    }
}

fn max(value: &FieldValue, bound: &JsonValue) -> bool {
    match (value.as_f64(), bound.as_f64()) {
        (Some(v), Some(b)) => v <= b,
        _ => match (value.as_str(), bound.as_str()) {
            (Some(v), Some(b)) => v <= b,
            _ => false,
        },
    }
}

fn compare_len(len: Option<usize>, param: &JsonValue, op: fn(usize, usize) -> bool) -> bool {
    match (len, param.as_u64()) {
        (Some(len), Some(bound)) => op(len, bound as usize),
        _ => false,
    }
}

fn no_reserved_roles(value: &FieldValue, _: &JsonValue) -> bool {
    let roles: Vec<String> = match value {
        FieldValue::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        other => other.as_str().map(|s| vec![s.to_string()]).unwrap_or_default(),
    };
    !roles.iter().any(|r| RESERVED_ROLES.contains(&r.as_str()))
}

fn one_of(value: &FieldValue, allowed: &JsonValue) -> bool {
    let Some(allowed) = allowed.as_array() else {
        return false;
    };
    let values: Vec<JsonValue> = match value {
        FieldValue::Array(items) => items.iter().map(FieldValue::to_json).collect(),
        other => vec![other.to_json()],
    };
    values.iter().all(|v| allowed.contains(v))
}

/// Named validators available to property declarations.
#[derive(Clone)]
pub struct ValidatorRegistry {
    validators: HashMap<String, ValidatorFn>,
}

impl ValidatorRegistry {
    pub fn empty() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("Required", Arc::new(required));
        registry.register("Email", Arc::new(email));
        registry.register("RegEx", Arc::new(regex));
        registry.register("Min", Arc::new(min));
        registry.register("Max", Arc::new(max));
        registry.register(
            "Length",
            Arc::new(|v: &FieldValue, p: &JsonValue| compare_len(length_of(v), p, |a, b| a == b)),
        );
        registry.register(
            "MinLength",
            Arc::new(|v: &FieldValue, p: &JsonValue| compare_len(length_of(v), p, |a, b| a >= b)),
        );
        registry.register(
            "MaxLength",
            Arc::new(|v: &FieldValue, p: &JsonValue| compare_len(length_of(v), p, |a, b| a <= b)),
        );
        registry.register(
            "ArrayLength",
            Arc::new(|v: &FieldValue, p: &JsonValue| compare_len(array_length_of(v), p, |a, b| a == b)),
        );
        registry.register(
            "ArrayMinLength",
            Arc::new(|v: &FieldValue, p: &JsonValue| compare_len(array_length_of(v), p, |a, b| a >= b)),
        );
        registry.register(
            "ArrayMaxLength",
            Arc::new(|v: &FieldValue, p: &JsonValue| compare_len(array_length_of(v), p, |a, b| a <= b)),
        );
        registry.register("NoReservedRoles", Arc::new(no_reserved_roles));
        registry.register("In", Arc::new(one_of));
        registry
    }

    pub fn register(&mut self, name: &str, validator: ValidatorFn) {
        self.validators.insert(name.to_string(), validator);
    }

    pub fn get(&self, name: &str) -> Option<&ValidatorFn> {
        self.validators.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Runs a named validator; unknown names fail.
    pub fn check(&self, name: &str, value: &FieldValue, param: &JsonValue) -> bool {
        match self.validators.get(name) {
            Some(validator) => validator(value, param),
            None => {
                tracing::debug!(validator = name, "unknown validator");
                false
            }
        }
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("validators", &self.names())
            .finish()
    }
}
