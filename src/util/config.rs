//! Configuration file support for Hands.
//!
//! Hands supports two configuration file locations:
//! - Global: `~/.hands/config.toml` - User-wide defaults
//! - Project: `<workbook>/.hands/config.toml` - Workbook-specific overrides
//!
//! Project config takes precedence over global config. This is tool
//! configuration (binaries, timeouts, ports); the workbook itself is
//! described by `hands.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::runtime::retry::RetryPolicy;

/// Hands tool configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External tool overrides
    pub tools: ToolsConfig,

    /// Bounded waits for external processes
    pub timeouts: TimeoutConfig,

    /// Database startup settings
    pub database: DatabaseConfig,

    /// Fixed port overrides
    pub ports: PortsConfig,
}

/// Paths to external binaries. Unset entries are resolved from PATH.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub esbuild: Option<PathBuf>,
    pub wrangler: Option<PathBuf>,
    pub postgres: Option<PathBuf>,
    pub initdb: Option<PathBuf>,
}

/// Timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Maximum time a single bundler invocation may run
    pub bundle_secs: u64,

    /// Maximum time from spawning a child to it reporting ready
    pub spawn_secs: u64,

    /// Grace period for a child to exit before it is killed
    pub stop_secs: u64,

    /// Maximum time a single connector run may take
    pub sync_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            bundle_secs: 120,
            spawn_secs: 30,
            stop_secs: 10,
            sync_secs: 300,
        }
    }
}

impl TimeoutConfig {
    pub fn bundle(&self) -> Duration {
        Duration::from_secs(self.bundle_secs)
    }

    pub fn spawn(&self) -> Duration {
        Duration::from_secs(self.spawn_secs)
    }

    pub fn stop(&self) -> Duration {
        Duration::from_secs(self.stop_secs)
    }

    pub fn sync(&self) -> Duration {
        Duration::from_secs(self.sync_secs)
    }
}

/// Database startup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Liveness probe attempts before giving up
    pub probe_attempts: u32,

    /// Delay between liveness probes in milliseconds
    pub probe_interval_ms: u64,

    /// Connection pool size
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            probe_attempts: 10,
            probe_interval_ms: 500,
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    /// Retry policy for the readiness probe.
    pub fn probe_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.probe_attempts,
            Duration::from_millis(self.probe_interval_ms),
        )
    }
}

/// Fixed ports. Unset entries are allocated from the default bands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub runtime: Option<u16>,
    pub database: Option<u16>,
    pub worker: Option<u16>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    ///
    /// Scalar sections with defaults are taken wholesale from `other` when
    /// they differ from the default.
    pub fn merge(&mut self, other: Config) {
        if other.tools.esbuild.is_some() {
            self.tools.esbuild = other.tools.esbuild;
        }
        if other.tools.wrangler.is_some() {
            self.tools.wrangler = other.tools.wrangler;
        }
        if other.tools.postgres.is_some() {
            self.tools.postgres = other.tools.postgres;
        }
        if other.tools.initdb.is_some() {
            self.tools.initdb = other.tools.initdb;
        }

        let default_timeouts = TimeoutConfig::default();
        if other.timeouts.bundle_secs != default_timeouts.bundle_secs {
            self.timeouts.bundle_secs = other.timeouts.bundle_secs;
        }
        if other.timeouts.spawn_secs != default_timeouts.spawn_secs {
            self.timeouts.spawn_secs = other.timeouts.spawn_secs;
        }
        if other.timeouts.stop_secs != default_timeouts.stop_secs {
            self.timeouts.stop_secs = other.timeouts.stop_secs;
        }
        if other.timeouts.sync_secs != default_timeouts.sync_secs {
            self.timeouts.sync_secs = other.timeouts.sync_secs;
        }

        let default_db = DatabaseConfig::default();
        if other.database.probe_attempts != default_db.probe_attempts {
            self.database.probe_attempts = other.database.probe_attempts;
        }
        if other.database.probe_interval_ms != default_db.probe_interval_ms {
            self.database.probe_interval_ms = other.database.probe_interval_ms;
        }
        if other.database.max_connections != default_db.max_connections {
            self.database.max_connections = other.database.max_connections;
        }

        if other.ports.runtime.is_some() {
            self.ports.runtime = other.ports.runtime;
        }
        if other.ports.database.is_some() {
            self.ports.database = other.ports.database;
        }
        if other.ports.worker.is_some() {
            self.ports.worker = other.ports.worker;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (`<workbook>/.hands/config.toml`)
/// 2. Global config (`~/.hands/config.toml`)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        config.merge(Config::load_or_default(global_path));
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.timeouts.bundle_secs, 120);
        assert_eq!(config.database.probe_attempts, 10);
        assert_eq!(config.database.max_connections, 5);
        assert!(config.tools.esbuild.is_none());
    }

    #[test]
    fn test_project_overrides_global() {
        let tmp = TempDir::new().unwrap();
        let global = tmp.path().join("global.toml");
        let project = tmp.path().join("project.toml");

        std::fs::write(
            &global,
            r#"
[tools]
esbuild = "/usr/local/bin/esbuild"
wrangler = "/usr/local/bin/wrangler"

[timeouts]
bundle_secs = 60
"#,
        )
        .unwrap();
        std::fs::write(
            &project,
            r#"
[tools]
esbuild = "/work/node_modules/.bin/esbuild"

[ports]
worker = 8787
"#,
        )
        .unwrap();

        let config = load_config(&global, &project);
        assert_eq!(
            config.tools.esbuild,
            Some(PathBuf::from("/work/node_modules/.bin/esbuild"))
        );
        assert_eq!(
            config.tools.wrangler,
            Some(PathBuf::from("/usr/local/bin/wrangler"))
        );
        assert_eq!(config.timeouts.bundle_secs, 60);
        assert_eq!(config.ports.worker, Some(8787));
    }

    #[test]
    fn test_invalid_config_falls_back_to_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        let config = Config::load_or_default(&path);
        assert_eq!(config.timeouts.spawn_secs, 30);
    }

    #[test]
    fn test_probe_policy_from_config() {
        let db = DatabaseConfig {
            probe_attempts: 3,
            probe_interval_ms: 50,
            max_connections: 2,
        };
        let policy = db.probe_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.interval, Duration::from_millis(50));
    }
}
