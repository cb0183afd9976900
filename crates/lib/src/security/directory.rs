//! In-process user and group directory.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{
    AdminPrivilege, Permissions, Principal, SecurityDetails, SecurityError, SecurityResolver,
};
use crate::Result;
use crate::constants::{
    DEFAULT_EVENT_TYPE, ROOT_USER_ID, ROOT_USER_NAME, SYSTEM_GROUP_ID, SYSTEM_GROUP_NAME,
};

/// A group known to the [`Directory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryGroup {
    pub id: i64,
    pub name: String,
    pub permissions: Permissions,
}

/// A user known to the [`Directory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: i64,
    pub name: String,
    pub default_group: i64,
    pub member_of: Vec<i64>,
    pub leader_of: Vec<i64>,
    pub roles: Vec<String>,
    pub admin_privileges: BTreeSet<AdminPrivilege>,
}

impl DirectoryUser {
    /// A plain user whose only group is `default_group`.
    pub fn new(id: i64, name: impl Into<String>, default_group: i64) -> Self {
        Self {
            id,
            name: name.into(),
            default_group,
            member_of: vec![default_group],
            leader_of: Vec::new(),
            roles: vec!["user".to_string()],
            admin_privileges: BTreeSet::new(),
        }
    }

    pub fn member(mut self, group_id: i64) -> Self {
        if !self.member_of.contains(&group_id) {
            self.member_of.push(group_id);
        }
        self
    }

    /// Lead `group_id`, which implies membership.
    pub fn leader(mut self, group_id: i64) -> Self {
        if !self.leader_of.contains(&group_id) {
            self.leader_of.push(group_id);
        }
        self.member(group_id)
    }

    pub fn privilege(mut self, privilege: AdminPrivilege) -> Self {
        self.admin_privileges.insert(privilege);
        self
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    users: HashMap<String, DirectoryUser>,
    groups: HashMap<i64, DirectoryGroup>,
}

/// A [`SecurityResolver`] over users and groups held in memory.
///
/// The directory can be edited while sessions are live; reloading a session
/// picks up the new membership.
#[derive(Debug, Default)]
pub struct Directory {
    state: RwLock<DirectoryState>,
}

impl Directory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory seeded with the root user and the system group.
    pub fn with_root() -> Self {
        let directory = Self::new();
        directory.add_group(SYSTEM_GROUP_ID, SYSTEM_GROUP_NAME, Permissions::private());
        let mut root = DirectoryUser::new(ROOT_USER_ID, ROOT_USER_NAME, SYSTEM_GROUP_ID)
            .leader(SYSTEM_GROUP_ID);
        root.roles = vec!["system".to_string()];
        root.admin_privileges = AdminPrivilege::ALL.into_iter().collect();
        directory.add_user(root);
        directory
    }

    pub fn add_group(&self, id: i64, name: impl Into<String>, permissions: Permissions) {
        let group = DirectoryGroup {
            id,
            name: name.into(),
            permissions,
        };
        self.state.write().unwrap().groups.insert(id, group);
    }

    /// Add or replace a user.
    pub fn add_user(&self, user: DirectoryUser) {
        self.state
            .write()
            .unwrap()
            .users
            .insert(user.name.clone(), user);
    }

    /// Remove a user. Returns whether it existed.
    pub fn remove_user(&self, user_name: &str) -> bool {
        self.state.write().unwrap().users.remove(user_name).is_some()
    }

    /// Apply `edit` to the stored user, if present.
    pub fn update_user(&self, user_name: &str, edit: impl FnOnce(&mut DirectoryUser)) -> bool {
        let mut state = self.state.write().unwrap();
        match state.users.get_mut(user_name) {
            Some(user) => {
                edit(user);
                true
            }
            None => false,
        }
    }

    pub fn user(&self, user_name: &str) -> Option<DirectoryUser> {
        self.state.read().unwrap().users.get(user_name).cloned()
    }

    fn resolve_sync(&self, principal: &Principal) -> Result<SecurityDetails> {
        if principal.user_name().is_empty() {
            return Err(SecurityError::EmptyUserName.into());
        }

        let state = self.state.read().unwrap();
        let user = state
            .users
            .get(principal.user_name())
            .ok_or_else(|| SecurityError::UnknownUser {
                user_name: principal.user_name().to_string(),
            })?;

        let group = match principal.group_name() {
            Some(name) => state
                .groups
                .values()
                .find(|g| g.name == name)
                .ok_or_else(|| SecurityError::UnknownGroup {
                    group_name: name.to_string(),
                })?,
            None => state.groups.get(&user.default_group).ok_or_else(|| {
                SecurityError::UnknownGroup {
                    group_name: user.default_group.to_string(),
                }
            })?,
        };

        // Administrators may act in any group.
        let is_admin = user.member_of.contains(&SYSTEM_GROUP_ID);
        if !is_admin && !user.member_of.contains(&group.id) {
            return Err(SecurityError::NotAMember {
                user_name: user.name.clone(),
                group_name: group.name.clone(),
            }
            .into());
        }

        Ok(SecurityDetails {
            user_id: user.id,
            user_name: user.name.clone(),
            group_id: group.id,
            group_name: group.name.clone(),
            event_type: principal
                .event_type()
                .unwrap_or(DEFAULT_EVENT_TYPE)
                .to_string(),
            leader_of: user.leader_of.clone(),
            member_of: user.member_of.clone(),
            roles: user.roles.clone(),
            admin_privileges: user.admin_privileges.clone(),
            permissions: group.permissions.clone(),
        })
    }
}

#[async_trait]
impl SecurityResolver for Directory {
    async fn resolve(&self, principal: &Principal) -> Result<SecurityDetails> {
        self.resolve_sync(principal)
    }
}
