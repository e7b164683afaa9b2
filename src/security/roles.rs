use super::context::{ROLE_ANONYMOUS, SecurityContext};
use crate::model::Instance;
use crate::schema::{Action, EntityDefinition, ROLE_OWNER, ROLE_SYSTEM};
use serde::Serialize;

pub const ROLE_GROUP: &str = "Group";

/// Effective roles of an actor for one evaluation. Order is kept,
/// duplicates are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RoleSet(Vec<String>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for role in roles {
            set.push(role);
        }
        set
    }

    pub fn push(&mut self, role: impl Into<String>) {
        let role = role.into();
        if !self.0.contains(&role) {
            self.0.push(role);
        }
    }

    pub fn contains(&self, role: &str) -> bool {
        self.0.iter().any(|r| r == role)
    }

    pub fn is_system(&self) -> bool {
        self.contains(ROLE_SYSTEM)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Result of an entity-level access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Denied,
    /// Only Owner or Group could grant access and no target was given;
    /// callers scope their store query instead.
    Unknown,
}

impl Access {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Access::Allowed)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Access::Denied)
    }
}

/// Effective roles of `context` against `target`.
///
/// Without an actor the result is exactly `["Anonymous"]`. Owner and
/// Group meta-roles come from the target's `_owner` and `_groups`.
pub fn resolve_roles(
    def: &EntityDefinition,
    context: &SecurityContext,
    target: Option<&Instance>,
) -> RoleSet {
    let Some(user_id) = context.user_id() else {
        return RoleSet::from_roles([ROLE_ANONYMOUS]);
    };

    let mut roles = RoleSet::from_roles(context.roles.iter().cloned());

    let Some(target) = target else {
        return roles;
    };

    if def.has_owner_security() && target.owner().as_deref() == Some(user_id) {
        roles.push(ROLE_OWNER);
    }

    if def.has_group_security() {
        let groups = target.groups();
        for membership in &context.user_groups {
            if groups.iter().any(|g| *g == membership.group) {
                roles.push(ROLE_GROUP);
                for role in &membership.roles {
                    roles.push(format!("{}{}", ROLE_GROUP, role));
                }
            }
        }
    }

    roles
}

pub fn can_access(
    def: &EntityDefinition,
    context: &SecurityContext,
    action: Action,
    target: Option<&Instance>,
) -> Access {
    let roles = resolve_roles(def, context, target);

    if roles.is_system() {
        return Access::Allowed;
    }

    let Some(allowed) = def.security().get(action) else {
        return Access::Allowed;
    };

    if roles.iter().any(|role| allowed.iter().any(|a| a == role)) {
        return Access::Allowed;
    }

    // The owner of a document may always act on it.
    if def.has_owner_security() && roles.contains(ROLE_OWNER) {
        return Access::Allowed;
    }

    if target.is_none() && (def.has_owner_security() || def.has_group_security()) {
        return Access::Unknown;
    }

    Access::Denied
}

/// Group-scoped roles listed for `action`, without the `Group` prefix:
/// a rule of `["GroupAdmin", "User"]` yields `["Admin"]`.
pub fn group_roles(def: &EntityDefinition, action: Action) -> Vec<String> {
    def.security()
        .get(action)
        .unwrap_or_default()
        .iter()
        .filter_map(|role| role.strip_prefix(ROLE_GROUP))
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect()
}

/// Groups in which the actor holds a role granting `action`.
pub fn valid_groups_for(
    def: &EntityDefinition,
    action: Action,
    context: &SecurityContext,
) -> Vec<String> {
    let roles = group_roles(def, action);
    context
        .user_groups
        .iter()
        .filter(|m| m.roles.iter().any(|r| roles.contains(r)))
        .map(|m| m.group.clone())
        .collect()
}
