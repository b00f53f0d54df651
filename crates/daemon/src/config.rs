//! On-disk configuration for the daemon.
//!
//! Loaded from `config.toml` in the platform config directory
//! (`~/.config/gbfs/config.toml` on Linux) unless a path is given explicitly.
//! Every field has a default, so an absent default file is not an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use common::cache::ObjectCacheConfig;
use common::engine::{EngineConfig, DEFAULT_MAX_OPEN_FILES};
use object_store::{BackendKind, BackendOptions, DEFAULT_COMMAND_TIMEOUT};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no home directory to place the default config in")]
    NoConfigDir,
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where `gbfs mount` attaches the filesystem when no path is given
    pub mount_point: Option<PathBuf>,
    /// Seconds between periodic refreshes
    pub refresh_interval_secs: u64,
    /// Let users other than the mounting one see the mount
    pub allow_other: bool,
    /// Default log filter, overridden by `RUST_LOG` and `--log-level`
    pub log_level: String,
    /// Write a daily-rolling log file here in addition to stderr
    pub log_dir: Option<PathBuf>,
    pub cache: ObjectCacheConfig,
    pub backend: BackendConfig,
    pub repositories: RepositoriesConfig,
    pub acl: AclConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_point: None,
            refresh_interval_secs: 60,
            allow_other: false,
            log_level: "info".to_string(),
            log_dir: None,
            cache: ObjectCacheConfig::default(),
            backend: BackendConfig::default(),
            repositories: RepositoriesConfig::default(),
            acl: AclConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend for repositories that do not name one
    pub default: BackendKind,
    pub git_binary: PathBuf,
    pub command_timeout_secs: u64,
    pub max_open_files: usize,
    /// Show tags next to branches under each repository
    pub expose_tags: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            default: BackendKind::Native,
            git_binary: PathBuf::from("git"),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT.as_secs(),
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            expose_tags: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoriesConfig {
    /// Directories searched for bare `*.git` repositories
    pub scan: Vec<PathBuf>,
    /// Repositories listed one by one
    #[serde(rename = "static")]
    pub static_repos: Vec<StaticRepository>,
    pub gitolite: Option<GitoliteConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticRepository {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub backend: Option<BackendKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitoliteConfig {
    /// The `gitolite` command
    pub binary: PathBuf,
    /// Directory holding `<name>.git` for every gitolite repository
    pub repo_base: PathBuf,
}

impl Default for GitoliteConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("gitolite"),
            repo_base: PathBuf::from("/var/lib/gitolite/repositories"),
        }
    }
}

/// Where repository permissions come from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum AclConfig {
    /// Everyone reads everything
    #[default]
    Open,
    /// A TOML permission file
    File { path: PathBuf },
    /// Ask gitolite
    Gitolite {
        #[serde(default = "default_gitolite_binary")]
        binary: PathBuf,
    },
}

fn default_gitolite_binary() -> PathBuf {
    PathBuf::from("gitolite")
}

impl Config {
    /// `~/.config/gbfs/config.toml` or the platform equivalent.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("", "", "gbfs")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields the
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path()?;
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    tracing::debug!(path = %path.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "refresh_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.backend.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "backend.command_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.backend.max_open_files == 0 {
            return Err(ConfigError::Invalid(
                "backend.max_open_files must be at least 1".to_string(),
            ));
        }
        if self.cache.max_size_mb == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_size_mb must be at least 1".to_string(),
            ));
        }
        for repo in &self.repositories.static_repos {
            if repo.name.is_empty() || repo.name.starts_with('/') || repo.name.ends_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "repository name {:?} must be a relative path",
                    repo.name
                )));
            }
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cache: self.cache.clone(),
            max_open_files: self.backend.max_open_files,
            expose_tags: self.backend.expose_tags,
        }
    }

    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            git_binary: self.backend.git_binary.clone(),
            command_timeout: Duration::from_secs(self.backend.command_timeout_secs),
        }
    }
}
