use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::acl::PermissionTable;
use crate::repository::Repository;

/// The repository set and permission table served by one generation.
///
/// Never mutated after construction; a refresh builds a new one and swaps
/// the pointer.
#[derive(Debug)]
pub struct LiveState {
    generation: u64,
    repositories: BTreeMap<String, Arc<Repository>>,
    permissions: PermissionTable,
    built_at: SystemTime,
}

impl LiveState {
    /// Generation zero: nothing visible until the first refresh.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            repositories: BTreeMap::new(),
            permissions: PermissionTable::default(),
            built_at: SystemTime::UNIX_EPOCH,
        }
    }

    pub fn new(
        generation: u64,
        repositories: BTreeMap<String, Arc<Repository>>,
        permissions: PermissionTable,
        built_at: SystemTime,
    ) -> Self {
        Self {
            generation,
            repositories,
            permissions,
            built_at,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> SystemTime {
        self.built_at
    }

    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    /// Every repository, regardless of caller.
    pub fn repositories(&self) -> impl Iterator<Item = &Arc<Repository>> {
        self.repositories.values()
    }

    pub fn repository_count(&self) -> usize {
        self.repositories.len()
    }

    /// Names of the repositories `user` may read, sorted.
    pub fn visible_names<'a>(&'a self, user: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.repositories
            .keys()
            .filter(move |name| self.permissions.can_read(user, name))
            .map(String::as_str)
    }

    /// The repository `name` if `user` may read it. Invisible and absent
    /// repositories are indistinguishable.
    pub fn visible(&self, user: &str, name: &str) -> Option<&Arc<Repository>> {
        if !self.permissions.can_read(user, name) {
            return None;
        }
        self.repositories.get(name)
    }

    /// Same repositories, refs and permissions, ignoring generation and
    /// build time.
    pub fn same_content(&self, other: &LiveState) -> bool {
        self.permissions == other.permissions
            && self.repositories.len() == other.repositories.len()
            && self
                .repositories
                .iter()
                .zip(other.repositories.iter())
                .all(|((a_name, a), (b_name, b))| a_name == b_name && a.same_content(b))
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }
}
