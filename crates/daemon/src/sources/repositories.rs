//! Repository enumeration from directories and explicit lists.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use common::repository::{RepositorySource, RepositorySpec};
use common::SourceError;
use object_store::BackendKind;

const GIT_SUFFIX: &str = ".git";

/// Directory levels searched below a scan root.
const MAX_SCAN_DEPTH: usize = 8;

/// Finds bare `*.git` repositories below a root directory.
///
/// `<root>/team/api.git` is served as `team/api`. Hidden directories and
/// symbolic links are not followed.
#[derive(Debug, Clone)]
pub struct ScanRepositories {
    root: PathBuf,
}

impl ScanRepositories {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scan(root: &Path) -> Result<Vec<RepositorySpec>, SourceError> {
        let mut found = Vec::new();
        let mut pending = vec![(root.to_path_buf(), 0usize)];

        while let Some((dir, depth)) = pending.pop() {
            let entries = std::fs::read_dir(&dir).map_err(|source| SourceError::Io {
                path: dir.clone(),
                source,
            })?;
            for entry in entries {
                let entry = entry.map_err(|source| SourceError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                let file_name = entry.file_name();
                let Some(name) = file_name.to_str() else {
                    tracing::debug!(path = %entry.path().display(), "skipping non-utf8 name");
                    continue;
                };
                if !file_type.is_dir() || name.starts_with('.') {
                    continue;
                }

                let path = entry.path();
                if name.ends_with(GIT_SUFFIX) && is_bare_repository(&path) {
                    if let Some(spec) = spec_for(root, &path) {
                        found.push(spec);
                    }
                } else if depth + 1 < MAX_SCAN_DEPTH {
                    pending.push((path, depth + 1));
                }
            }
        }

        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }
}

/// A bare repository has `HEAD` and `objects/` at its top level.
pub fn is_bare_repository(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir()
}

fn spec_for(root: &Path, path: &Path) -> Option<RepositorySpec> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    let name = segments.join("/");
    let name = name.strip_suffix(GIT_SUFFIX)?;
    if name.is_empty() || name.ends_with('/') {
        return None;
    }
    Some(RepositorySpec::new(name, path))
}

#[async_trait]
impl RepositorySource for ScanRepositories {
    async fn enumerate(&self) -> Result<Vec<RepositorySpec>, SourceError> {
        let root = self.root.clone();
        let specs = tokio::task::spawn_blocking(move || Self::scan(&root))
            .await
            .map_err(|e| SourceError::Command(format!("repository scan panicked: {e}")))??;
        tracing::debug!(root = %self.root.display(), count = specs.len(), "scanned repositories");
        Ok(specs)
    }
}

/// A fixed list of repositories.
#[derive(Debug, Clone, Default)]
pub struct StaticRepositories {
    specs: Vec<RepositorySpec>,
}

impl StaticRepositories {
    pub fn new(specs: Vec<RepositorySpec>) -> Self {
        Self { specs }
    }

    pub fn push(&mut self, name: &str, path: impl Into<PathBuf>, backend: Option<BackendKind>) {
        let spec = RepositorySpec::new(name, path);
        self.specs.push(match backend {
            Some(kind) => spec.with_backend(kind),
            None => spec,
        });
    }
}

#[async_trait]
impl RepositorySource for StaticRepositories {
    async fn enumerate(&self) -> Result<Vec<RepositorySpec>, SourceError> {
        Ok(self.specs.clone())
    }
}

/// Concatenation of several sources. A name listed twice keeps the entry
/// from the later source.
#[derive(Debug, Clone, Default)]
pub struct CompositeRepositories {
    sources: Vec<Arc<dyn RepositorySource>>,
}

impl CompositeRepositories {
    pub fn new(sources: Vec<Arc<dyn RepositorySource>>) -> Self {
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl RepositorySource for CompositeRepositories {
    async fn enumerate(&self) -> Result<Vec<RepositorySpec>, SourceError> {
        let mut specs: Vec<RepositorySpec> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for source in &self.sources {
            for spec in source.enumerate().await? {
                match index.get(&spec.name) {
                    Some(&at) => {
                        tracing::warn!(
                            repository = %spec.name,
                            replaced = %specs[at].path.display(),
                            with = %spec.path.display(),
                            "repository listed twice"
                        );
                        specs[at] = spec;
                    }
                    None => {
                        index.insert(spec.name.clone(), specs.len());
                        specs.push(spec);
                    }
                }
            }
        }
        Ok(specs)
    }
}
