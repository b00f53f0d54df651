//! Concrete ACL and repository sources, assembled from [`Config`].

mod acl;
mod gitolite;
mod repositories;

use std::sync::Arc;

use common::acl::AclSource;
use common::repository::{GitBackendFactory, RepositorySource};
use common::Sources;

use crate::config::{AclConfig, Config};

pub use acl::{FileAcl, OpenAcl};
pub use gitolite::{Gitolite, GitoliteAcl, GitoliteRepositories, ADMIN_REPOSITORY};
pub use repositories::{
    is_bare_repository, CompositeRepositories, ScanRepositories, StaticRepositories,
};

/// Build the refresh collaborators described by `config`.
///
/// Repository sources are concatenated in order: scan roots, the static list,
/// then gitolite.
pub fn from_config(config: &Config) -> Sources {
    let timeout = config.backend_options().command_timeout;

    let acl: Arc<dyn AclSource> = match &config.acl {
        AclConfig::Open => Arc::new(OpenAcl),
        AclConfig::File { path } => Arc::new(FileAcl::new(path.clone())),
        AclConfig::Gitolite { binary } => Arc::new(GitoliteAcl::new(
            Gitolite::new(binary.clone()).with_timeout(timeout),
        )),
    };

    let repos = &config.repositories;
    let mut sources: Vec<Arc<dyn RepositorySource>> = repos
        .scan
        .iter()
        .map(|root| Arc::new(ScanRepositories::new(root.clone())) as Arc<dyn RepositorySource>)
        .collect();
    if !repos.static_repos.is_empty() {
        let mut list = StaticRepositories::default();
        for repo in &repos.static_repos {
            list.push(&repo.name, repo.path.clone(), repo.backend);
        }
        sources.push(Arc::new(list));
    }
    if let Some(gitolite) = &repos.gitolite {
        sources.push(Arc::new(GitoliteRepositories::new(
            Gitolite::new(gitolite.binary.clone()).with_timeout(timeout),
            gitolite.repo_base.clone(),
        )));
    }
    if sources.is_empty() {
        tracing::warn!("no repository sources configured, the mount will be empty");
    }

    Sources {
        acl,
        repositories: Arc::new(CompositeRepositories::new(sources)),
        backends: Arc::new(GitBackendFactory::new(
            config.backend.default,
            config.backend_options(),
        )),
    }
}
