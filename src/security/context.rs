use serde::{Deserialize, Serialize};

pub const ROLE_ANONYMOUS: &str = "Anonymous";

/// The authenticated principal behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Roles an actor holds inside one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Who is acting: baseline roles, the actor (if authenticated) and the
/// actor's group memberships.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub user: Option<Actor>,
    /// Bare actor id, used when no `user` record is attached.
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, rename = "userGroups")]
    pub user_groups: Vec<GroupMembership>,
}

impl SecurityContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(id: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            roles: roles.iter().map(|r| r.to_string()).collect(),
            user: Some(Actor::new(id)),
            user_id: None,
            user_groups: Vec::new(),
        }
    }

    /// Internal context used by the engine itself; passes every check.
    pub fn system() -> Self {
        Self::for_user("System", &["System"])
    }

    pub fn with_group(mut self, group: impl Into<String>, roles: &[&str]) -> Self {
        self.user_groups.push(GroupMembership {
            group: group.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        });
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user
            .as_ref()
            .map(|u| u.id.as_str())
            .or(self.user_id.as_deref())
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }
}
