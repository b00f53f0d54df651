//! Users, repositories and permissions taken from a gitolite installation.
//!
//! Every question goes through the `gitolite` command:
//!
//! - `gitolite list-users` for the user names (groups and `admin` skipped)
//! - `gitolite list-phy-repos` for the repositories on disk
//! - `gitolite access -q <repo> <user> <R|W>`, where exit status 0 grants

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::process::Command;

use common::acl::{Access, AclBuilder, AclSource, PermissionTable};
use common::repository::{RepositorySource, RepositorySpec};
use common::SourceError;
use object_store::process::{run_checked, run_command};
use object_store::DEFAULT_COMMAND_TIMEOUT;

/// The administration repository is never exported.
pub const ADMIN_REPOSITORY: &str = "gitolite-admin";
const ADMIN_USER: &str = "admin";

/// Access checks run concurrently per refresh.
const ACCESS_CONCURRENCY: usize = 8;

/// Thin wrapper over the `gitolite` command.
#[derive(Debug, Clone)]
pub struct Gitolite {
    binary: PathBuf,
    timeout: Duration,
}

impl Gitolite {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd
    }

    async fn lines(&self, args: &[&str]) -> Result<Vec<String>, SourceError> {
        let output = run_checked(self.command(args), None, self.timeout)
            .await
            .map_err(|e| SourceError::Command(e.to_string()))?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn list_users(&self) -> Result<Vec<String>, SourceError> {
        let mut users: Vec<String> = self
            .lines(&["list-users"])
            .await?
            .into_iter()
            .filter(|user| user != ADMIN_USER && !user.starts_with('@'))
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    pub async fn list_repositories(&self) -> Result<Vec<String>, SourceError> {
        let mut repos: Vec<String> = self
            .lines(&["list-phy-repos"])
            .await?
            .into_iter()
            .filter(|repo| repo != ADMIN_REPOSITORY)
            .collect();
        repos.sort();
        Ok(repos)
    }

    /// Whether `user` holds `right` (`"R"` or `"W"`) on `repository`.
    pub async fn has_access(
        &self,
        repository: &str,
        user: &str,
        right: &str,
    ) -> Result<bool, SourceError> {
        let output = run_command(
            self.command(&["access", "-q", repository, user, right]),
            None,
            self.timeout,
        )
        .await
        .map_err(|e| SourceError::Command(e.to_string()))?;
        Ok(output.status.success())
    }

    async fn access(&self, repository: &str, user: &str) -> Result<Access, SourceError> {
        if !self.has_access(repository, user, "R").await? {
            return Ok(Access::None);
        }
        if self.has_access(repository, user, "W").await? {
            Ok(Access::Write)
        } else {
            Ok(Access::Read)
        }
    }
}

/// Permissions as gitolite reports them for every (repository, user) pair.
#[derive(Debug, Clone)]
pub struct GitoliteAcl {
    gitolite: Gitolite,
}

impl GitoliteAcl {
    pub fn new(gitolite: Gitolite) -> Self {
        Self { gitolite }
    }
}

#[async_trait]
impl AclSource for GitoliteAcl {
    async fn load(&self) -> Result<PermissionTable, SourceError> {
        let users = self.gitolite.list_users().await?;
        let repositories = self.gitolite.list_repositories().await?;

        let pairs: Vec<(String, String)> = repositories
            .iter()
            .flat_map(|repo| users.iter().map(move |user| (repo.clone(), user.clone())))
            .collect();
        let checked: Vec<_> = futures::stream::iter(pairs)
            .map(|(repo, user)| {
                let gitolite = self.gitolite.clone();
                async move {
                    let access = gitolite.access(&repo, &user).await;
                    access.map(|access| (repo, user, access))
                }
            })
            .buffer_unordered(ACCESS_CONCURRENCY)
            .collect()
            .await;

        let mut builder = AclBuilder::new();
        for result in checked {
            let (repo, user, access) = result?;
            if access != Access::None {
                builder.grant(&user, &repo, access);
            }
        }
        let table = builder.build();
        tracing::debug!(
            users = users.len(),
            repositories = repositories.len(),
            "loaded gitolite permissions"
        );
        Ok(table)
    }
}

/// `<repo_base>/<name>.git` for every repository gitolite knows.
#[derive(Debug, Clone)]
pub struct GitoliteRepositories {
    gitolite: Gitolite,
    repo_base: PathBuf,
}

impl GitoliteRepositories {
    pub fn new(gitolite: Gitolite, repo_base: impl Into<PathBuf>) -> Self {
        Self {
            gitolite,
            repo_base: repo_base.into(),
        }
    }

    pub fn repo_base(&self) -> &Path {
        &self.repo_base
    }
}

#[async_trait]
impl RepositorySource for GitoliteRepositories {
    async fn enumerate(&self) -> Result<Vec<RepositorySpec>, SourceError> {
        Ok(self
            .gitolite
            .list_repositories()
            .await?
            .into_iter()
            .map(|name| {
                let path = self.repo_base.join(format!("{name}.git"));
                RepositorySpec::new(name, path)
            })
            .collect())
    }
}
