pub mod context;
pub mod projection;
pub mod roles;

pub use context::{Actor, GroupMembership, ROLE_ANONYMOUS, SecurityContext};
pub use projection::{FieldMask, secure_by_action, secure_read};
pub use roles::{Access, ROLE_GROUP, RoleSet, can_access, group_roles, resolve_roles, valid_groups_for};
