use crate::core::{DocError, Result};
use crate::security::RoleSet;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Action a security rule can be declared for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Create,
    Update,
    Remove,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Read, Action::Create, Action::Update, Action::Remove];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Remove => "remove",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "read" => Some(Action::Read),
            "create" => Some(Action::Create),
            "update" => Some(Action::Update),
            "remove" => Some(Action::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allowed roles per action. An action without a rule is open to everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRules {
    rules: BTreeMap<Action, Vec<String>>,
}

impl SecurityRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, action: Action, roles: &[&str]) {
        self.rules
            .insert(action, roles.iter().map(|r| r.to_string()).collect());
    }

    pub fn get(&self, action: Action) -> Option<&[String]> {
        self.rules.get(&action).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules from `other` replace ours action by action.
    pub fn merge_over(&mut self, other: &SecurityRules) {
        for (action, roles) in &other.rules {
            self.rules.insert(*action, roles.clone());
        }
    }

    /// Granted when no rule exists for `action`, or when any role is listed.
    pub fn allows(&self, roles: &RoleSet, action: Action) -> bool {
        if roles.is_system() {
            return true;
        }

        match self.rules.get(&action) {
            None => true,
            Some(allowed) => roles.iter().any(|role| allowed.iter().any(|a| a == role)),
        }
    }

    /// Parses `{"read": ["Admin"], "update": []}`.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let mut rules = Self::new();
        let Some(map) = value.as_object() else {
            return Err(DocError::Schema(format!(
                "security rules must be an object, got {}",
                value
            )));
        };

        for (name, roles) in map {
            let action = Action::parse(name)
                .ok_or_else(|| DocError::Schema(format!("unknown security action '{}'", name)))?;
            let roles: Vec<&str> = roles
                .as_array()
                .ok_or_else(|| {
                    DocError::Schema(format!("roles for '{}' must be an array", name))
                })?
                .iter()
                .filter_map(|r| r.as_str())
                .collect();
            rules.set(action, &roles);
        }

        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_rule_grants_access() {
        let rules = SecurityRules::new();
        assert!(rules.allows(&RoleSet::from_roles(["Anonymous"]), Action::Update));
    }

    #[test]
    fn test_rule_requires_intersection() {
        let mut rules = SecurityRules::new();
        rules.set(Action::Update, &["Admin"]);
        assert!(!rules.allows(&RoleSet::from_roles(["User"]), Action::Update));
        assert!(rules.allows(&RoleSet::from_roles(["User", "Admin"]), Action::Update));
        assert!(rules.allows(&RoleSet::from_roles(["User"]), Action::Read));
    }

    #[test]
    fn test_empty_rule_only_admits_system() {
        let mut rules = SecurityRules::new();
        rules.set(Action::Update, &[]);
        assert!(!rules.allows(&RoleSet::from_roles(["Admin"]), Action::Update));
        assert!(rules.allows(&RoleSet::from_roles(["System"]), Action::Update));
    }

    #[test]
    fn test_from_json() {
        let rules = SecurityRules::from_json(&json!({"read": ["Admin", "User"], "remove": []})).unwrap();
        assert_eq!(rules.get(Action::Read).map(|r| r.len()), Some(2));
        assert_eq!(rules.get(Action::Remove).map(|r| r.len()), Some(0));
        assert!(rules.get(Action::Create).is_none());

        assert!(SecurityRules::from_json(&json!({"destroy": []})).is_err());
        assert!(SecurityRules::from_json(&json!(["read"])).is_err());
    }
}
