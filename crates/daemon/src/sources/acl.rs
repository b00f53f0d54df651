//! Permission sources that do not need gitolite.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use common::acl::{Access, AclBuilder, AclSource, PermissionTable};
use common::SourceError;

/// Every user may read every repository.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAcl;

#[async_trait]
impl AclSource for OpenAcl {
    async fn load(&self) -> Result<PermissionTable, SourceError> {
        Ok(PermissionTable::open())
    }
}

/// Permissions read from a TOML file on every refresh:
///
/// ```toml
/// [groups]
/// devs = ["alice", "bob", "@leads"]
///
/// [repos.demo]
/// read = ["@all"]
///
/// [repos."team/api"]
/// read = ["@devs"]
/// write = ["carol"]
/// ```
#[derive(Debug, Clone)]
pub struct FileAcl {
    path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AclFile {
    #[serde(default)]
    groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    repos: BTreeMap<String, RepoGrants>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RepoGrants {
    #[serde(default)]
    read: Vec<String>,
    #[serde(default)]
    write: Vec<String>,
}

impl FileAcl {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the file format without touching the filesystem.
    pub fn parse(contents: &str) -> Result<PermissionTable, SourceError> {
        let file: AclFile =
            toml::from_str(contents).map_err(|e| SourceError::invalid("acl file", e))?;

        let mut builder = AclBuilder::new();
        for (name, members) in &file.groups {
            builder.group(name, members.iter().cloned());
        }
        for (repository, grants) in &file.repos {
            for principal in &grants.read {
                builder.grant(principal, repository, Access::Read);
            }
            for principal in &grants.write {
                builder.grant(principal, repository, Access::Write);
            }
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl AclSource for FileAcl {
    async fn load(&self) -> Result<PermissionTable, SourceError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| SourceError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        let table = Self::parse(&contents)?;
        tracing::debug!(path = %self.path.display(), repositories = table.len(), "loaded acl file");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_acl() {
        let table = OpenAcl.load().await.unwrap();
        assert!(table.is_open());
        assert!(table.can_read("anyone", "anything"));
    }

    #[test]
    fn test_parse_groups_and_grants() {
        let table = FileAcl::parse(
            r#"
            [groups]
            devs = ["alice", "@leads"]
            leads = ["dave"]

            [repos.demo]
            read = ["@all"]

            [repos."team/api"]
            read = ["@devs"]
            write = ["carol", "alice"]
            "#,
        )
        .unwrap();

        assert!(table.can_read("mallory", "demo"));
        assert_eq!(table.access("alice", "team/api"), Access::Write);
        assert_eq!(table.access("dave", "team/api"), Access::Read);
        assert_eq!(table.access("carol", "team/api"), Access::Write);
        assert_eq!(table.access("mallory", "team/api"), Access::None);
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        let result = FileAcl::parse("[repos.demo]\nadmin = [\"root\"]\n");
        assert!(matches!(result, Err(SourceError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let acl = FileAcl::new(dir.path().join("acl.toml"));
        assert!(matches!(acl.load().await, Err(SourceError::Io { .. })));
    }
}
