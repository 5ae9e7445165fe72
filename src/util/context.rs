//! Global context for Hands operations.
//!
//! Provides centralized access to configuration, paths, and environment.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use directories::BaseDirs;

use crate::core::manifest::{ManifestError, MANIFEST_NAME};
use crate::util::config::{load_config, Config};

/// Environment variable overriding the global Hands directory.
pub const HANDS_HOME_ENV: &str = "HANDS_HOME";

/// Home-relative global directory
static BASE_DIRS: LazyLock<Option<BaseDirs>> = LazyLock::new(BaseDirs::new);

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Home directory for global Hands data (~/.hands/)
    home: PathBuf,
}

impl GlobalContext {
    /// Create a new GlobalContext with defaults.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;

        let home = match std::env::var_os(HANDS_HOME_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => BASE_DIRS
                .as_ref()
                .map(|b| b.home_dir().join(".hands"))
                .unwrap_or_else(|| PathBuf::from(".hands")),
        };

        Ok(GlobalContext { cwd, home })
    }

    /// Create a GlobalContext with a specific working directory.
    pub fn with_cwd(cwd: PathBuf) -> Result<Self> {
        let mut ctx = Self::new()?;
        ctx.cwd = cwd;
        Ok(ctx)
    }

    /// Get the current working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Get the Hands home directory (~/.hands/).
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Get the global configuration file path.
    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    /// Load tool configuration for a workbook rooted at `workbook_dir`.
    pub fn load_config(&self, workbook_dir: &Path) -> Config {
        load_config(
            &self.config_path(),
            &workbook_dir.join(".hands").join("config.toml"),
        )
    }

    /// Find the manifest file starting from `start` (or cwd) and searching upward.
    pub fn find_manifest(&self, start: Option<&Path>) -> Result<PathBuf, ManifestError> {
        let origin = match start {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.cwd.join(dir),
            None => self.cwd.clone(),
        };

        let mut current = origin.clone();
        loop {
            let candidate = current.join(MANIFEST_NAME);
            if candidate.is_file() {
                return Ok(candidate);
            }
            if !current.pop() {
                return Err(ManifestError::NotFound { dir: origin });
            }
        }
    }

    /// Find the workbook root (directory containing hands.toml).
    pub fn find_workbook_root(&self, start: Option<&Path>) -> Result<PathBuf, ManifestError> {
        let manifest = self.find_manifest(start)?;
        Ok(manifest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.cwd.clone()))
    }
}
