//! Config - What to mirror, where to, and what to leave out
//!
//! Stored as JSON by default, or YAML when the file ends in `.yaml`/`.yml`.
//! The legacy keys `repo_path`, `branch` and `exclude_patterns` are accepted.

use crate::engine::ExclusionFilter;
use crate::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Engine configuration, read once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Work tree of the repository to mirror
    #[serde(alias = "repo_path")]
    pub repository_path: PathBuf,

    /// Branch that receives auto-save commits
    #[serde(alias = "branch")]
    pub auto_save_branch: String,

    /// Glob patterns kept out of auto-save commits, in order
    #[serde(default, alias = "exclude_patterns")]
    pub exclusion_patterns: Vec<String>,

    /// Remote to publish the auto-save branch to
    #[serde(default = "default_remote")]
    pub remote: String,

    /// How often the watcher and Sync Loop poll, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Config {
    /// Config with defaults for everything but the essentials
    pub fn new(repository_path: impl Into<PathBuf>, auto_save_branch: impl Into<String>) -> Self {
        Self {
            repository_path: repository_path.into(),
            auto_save_branch: auto_save_branch.into(),
            exclusion_patterns: Vec::new(),
            remote: default_remote(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    pub fn with_exclusions<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusion_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Default config file location for this platform
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "flatworm")
            .ok_or_else(|| Error::Config("could not determine a config directory".to_string()))?;
        Ok(dirs.config_dir().join("config.json"))
    }

    /// Load and validate the config at `path`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigMissing(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };

        config.validate()?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load `path`, or `None` if there is no file there yet
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        match Self::load(path) {
            Ok(config) => Ok(Some(config)),
            Err(Error::ConfigMissing(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;

        debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Check everything that can be checked without touching the remote
    pub fn validate(&self) -> Result<()> {
        if !self.repository_path.is_dir() {
            return Err(Error::Config(format!(
                "repository path {:?} is not a directory",
                self.repository_path
            )));
        }

        let branch = self.auto_save_branch.trim();
        if branch.is_empty() {
            return Err(Error::Config("auto-save branch name is empty".to_string()));
        }
        if !git2::Branch::name_is_valid(branch)? {
            return Err(Error::Config(format!(
                "'{}' is not a valid branch name",
                self.auto_save_branch
            )));
        }

        if self.remote.trim().is_empty() {
            return Err(Error::Config("remote name is empty".to_string()));
        }

        ExclusionFilter::new(&self.exclusion_patterns)?;
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e == "yaml" || e == "yml")
}
