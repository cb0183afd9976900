//! Identity and privilege types attached to every session.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{ROOT_USER_ID, ROOT_USER_NAME, SYSTEM_GROUP_ID, SYSTEM_GROUP_NAME};

/// Caller-supplied identity descriptor used to request a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    user_name: String,
    group_name: Option<String>,
    event_type: Option<String>,
}

impl Principal {
    /// Principal for `user_name` in its default group.
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            group_name: None,
            event_type: None,
        }
    }

    /// Request a specific group instead of the user's default group.
    pub fn with_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = Some(group_name.into());
        self
    }

    /// Request a specific default event type.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn group_name(&self) -> Option<&str> {
        self.group_name.as_deref()
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group_name {
            Some(group) => write!(f, "{}@{}", self.user_name, group),
            None => f.write_str(&self.user_name),
        }
    }
}

/// Administrative privileges a user may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AdminPrivilege {
    /// Create sessions on behalf of other users.
    Sudo,
    /// Read any session.
    ReadSession,
    /// Modify or close any session.
    WriteSession,
    /// Create and edit users.
    ModifyUser,
    /// Create and edit groups.
    ModifyGroup,
}

impl AdminPrivilege {
    /// Every privilege, as held by the root identity.
    pub const ALL: [AdminPrivilege; 5] = [
        AdminPrivilege::Sudo,
        AdminPrivilege::ReadSession,
        AdminPrivilege::WriteSession,
        AdminPrivilege::ModifyUser,
        AdminPrivilege::ModifyGroup,
    ];
}

/// Opaque permission snapshot for the session's current group.
///
/// The permission engine owns the meaning of the string; sessions only carry it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permissions(String);

impl Permissions {
    pub fn new(repr: impl Into<String>) -> Self {
        Self(repr.into())
    }

    /// Owner-only access.
    pub fn private() -> Self {
        Self::new("rw----")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::private()
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Security-relevant state resolved for a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDetails {
    pub user_id: i64,
    pub user_name: String,
    pub group_id: i64,
    pub group_name: String,
    /// Event type the session records by default.
    pub event_type: String,
    /// Groups this user leads.
    pub leader_of: Vec<i64>,
    /// Groups this user belongs to.
    pub member_of: Vec<i64>,
    /// Role names (e.g. "user", "system").
    pub roles: Vec<String>,
    pub admin_privileges: BTreeSet<AdminPrivilege>,
    /// Permissions of the current group.
    pub permissions: Permissions,
}

impl SecurityDetails {
    /// Details for the root identity in the system group.
    pub fn root(event_type: impl Into<String>) -> Self {
        Self {
            user_id: ROOT_USER_ID,
            user_name: ROOT_USER_NAME.to_string(),
            group_id: SYSTEM_GROUP_ID,
            group_name: SYSTEM_GROUP_NAME.to_string(),
            event_type: event_type.into(),
            leader_of: vec![SYSTEM_GROUP_ID],
            member_of: vec![SYSTEM_GROUP_ID],
            roles: vec!["system".to_string()],
            admin_privileges: AdminPrivilege::ALL.into_iter().collect(),
            permissions: Permissions::private(),
        }
    }

    /// The principal these details were resolved from.
    pub fn principal(&self) -> Principal {
        Principal::new(self.user_name.clone())
            .with_group(self.group_name.clone())
            .with_event_type(self.event_type.clone())
    }

    pub fn has_privilege(&self, privilege: AdminPrivilege) -> bool {
        self.admin_privileges.contains(&privilege)
    }

    /// Members of the system group are administrators.
    pub fn is_admin(&self) -> bool {
        self.member_of.contains(&SYSTEM_GROUP_ID)
    }

    pub fn leads(&self, group_id: i64) -> bool {
        self.leader_of.contains(&group_id)
    }

    pub fn is_member_of(&self, group_id: i64) -> bool {
        self.member_of.contains(&group_id)
    }
}
