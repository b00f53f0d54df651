//! Per-user repository visibility.
//!
//! A [`PermissionTable`] is built once per refresh from whatever the ACL
//! source reports. Group membership is flattened at build time, so a
//! filesystem call only does two map lookups.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Principal that matches every caller.
pub const ALL_USERS: &str = "@all";

/// Access level of one user on one repository.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    #[default]
    None,
    Read,
    Write,
}

impl Access {
    pub fn can_read(self) -> bool {
        self >= Access::Read
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::None => write!(f, "none"),
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
        }
    }
}

/// Source of permission records, re-read in full on every refresh.
#[async_trait]
pub trait AclSource: Send + Sync + fmt::Debug {
    async fn load(&self) -> Result<PermissionTable, SourceError>;
}

/// Flattened `(user, repository) -> access` records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionTable {
    open: bool,
    /// repository -> user (or `@all`) -> access
    grants: BTreeMap<String, BTreeMap<String, Access>>,
}

impl PermissionTable {
    /// Table granting read on every repository to every caller.
    pub fn open() -> Self {
        Self {
            open: true,
            grants: BTreeMap::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn access(&self, user: &str, repository: &str) -> Access {
        let Some(users) = self.grants.get(repository) else {
            return if self.open { Access::Read } else { Access::None };
        };
        let direct = users.get(user).copied().unwrap_or_default();
        let everyone = users.get(ALL_USERS).copied().unwrap_or_default();
        let floor = if self.open { Access::Read } else { Access::None };
        direct.max(everyone).max(floor)
    }

    pub fn can_read(&self, user: &str, repository: &str) -> bool {
        self.access(user, repository).can_read()
    }

    /// Number of explicit records.
    pub fn len(&self) -> usize {
        self.grants.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

/// Collects groups and grants, then flattens them into a [`PermissionTable`].
#[derive(Debug, Default, Clone)]
pub struct AclBuilder {
    groups: BTreeMap<String, BTreeSet<String>>,
    grants: Vec<(String, String, Access)>,
}

fn group_key(name: &str) -> String {
    if name.starts_with('@') {
        name.to_string()
    } else {
        format!("@{name}")
    }
}

impl AclBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `members` (user names or `@group` references) to group `name`.
    pub fn group<I, S>(&mut self, name: &str, members: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups
            .entry(group_key(name))
            .or_default()
            .extend(members.into_iter().map(Into::into));
        self
    }

    /// Grant `access` on `repository` to a user, a `@group` or `@all`.
    pub fn grant(&mut self, principal: &str, repository: &str, access: Access) -> &mut Self {
        self.grants
            .push((principal.to_string(), repository.to_string(), access));
        self
    }

    pub fn build(&self) -> PermissionTable {
        let mut grants: BTreeMap<String, BTreeMap<String, Access>> = BTreeMap::new();
        for (principal, repository, access) in &self.grants {
            let users = if principal == ALL_USERS || !principal.starts_with('@') {
                vec![principal.clone()]
            } else {
                self.expand(principal)
            };
            let repo_grants = grants.entry(repository.clone()).or_default();
            for user in users {
                let slot = repo_grants.entry(user).or_default();
                *slot = (*slot).max(*access);
            }
        }
        PermissionTable {
            open: false,
            grants,
        }
    }

    /// Users reachable from `group`, following nested groups once each.
    fn expand(&self, group: &str) -> Vec<String> {
        let mut users = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut pending = vec![group_key(group)];

        while let Some(name) = pending.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let Some(members) = self.groups.get(&name) else {
                tracing::debug!(group = %name, "grant references unknown group");
                continue;
            };
            for member in members {
                if member == ALL_USERS {
                    users.insert(member.clone());
                } else if member.starts_with('@') {
                    pending.push(member.clone());
                } else {
                    users.insert(member.clone());
                }
            }
        }
        users.into_iter().collect()
    }
}
