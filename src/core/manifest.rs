//! hands.toml manifest parsing and schema.
//!
//! The manifest is the declarative description of a workbook: its name,
//! where pages and blocks live, which external data sources sync into the
//! local database, and where build output goes.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::schedule::Schedule;

/// Canonical manifest file name.
pub const MANIFEST_NAME: &str = "hands.toml";

/// Errors loading or validating a manifest.
///
/// These are configuration errors: fatal, and raised before any process spawns.
#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    #[error("could not find `hands.toml` in {} or any parent directory", .dir.display())]
    #[diagnostic(
        code(hands::manifest::not_found),
        help("create a `hands.toml` with at least `name = \"...\"`")
    )]
    NotFound { dir: PathBuf },

    #[error("failed to read {}", .path.display())]
    #[diagnostic(code(hands::manifest::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    #[diagnostic(code(hands::manifest::parse))]
    Parse { path: PathBuf, message: String },

    #[error("invalid manifest {}: {message}", .path.display())]
    #[diagnostic(code(hands::manifest::invalid))]
    Invalid { path: PathBuf, message: String },
}

/// Configuration for one external data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Disabled sources are never scheduled or triggered
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cron expression; sources without one only run on demand
    #[serde(default)]
    pub schedule: Option<String>,

    /// Connector name; defaults to the source's own name
    #[serde(default)]
    pub connector: Option<String>,

    /// Connector-specific options, passed through untouched
    #[serde(default)]
    pub options: toml::Table,
}

impl SourceConfig {
    /// The connector that implements this source.
    pub fn connector_name<'a>(&'a self, source_name: &'a str) -> &'a str {
        self.connector.as_deref().unwrap_or(source_name)
    }
}

/// Build output settings from the `[build]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Output directory, relative to the workbook root
    pub out_dir: PathBuf,

    /// Compatibility date written into the platform config
    pub compatibility_date: String,

    /// Compatibility flags written into the platform config
    pub compatibility_flags: Vec<String>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        BuildSettings {
            out_dir: PathBuf::from(".hands"),
            compatibility_date: "2024-09-23".to_string(),
            compatibility_flags: vec!["nodejs_compat".to_string()],
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_pages_dir() -> PathBuf {
    PathBuf::from("pages")
}

fn default_blocks_dir() -> PathBuf {
    PathBuf::from("blocks")
}

/// The parsed hands.toml manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Workbook name, also the deployed service name
    pub name: String,

    /// Page directory, relative to the workbook root
    #[serde(default = "default_pages_dir")]
    pub pages: PathBuf,

    /// Block (component) directory, relative to the workbook root
    #[serde(default = "default_blocks_dir")]
    pub blocks: PathBuf,

    /// Data sources by name. Ordered so generated output is stable.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,

    #[serde(default)]
    pub build: BuildSettings,
}

impl Manifest {
    /// Load and validate a manifest from disk.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ManifestError::NotFound {
                    dir: path.parent().unwrap_or(Path::new(".")).to_path_buf(),
                }
            } else {
                ManifestError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::parse(&contents, path)
    }

    /// Parse and validate manifest text. `path` is used for error messages.
    pub fn parse(contents: &str, path: &Path) -> Result<Self, ManifestError> {
        let manifest: Manifest = toml::from_str(contents).map_err(|e| ManifestError::Parse {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })?;
        manifest.validate(path)?;
        Ok(manifest)
    }

    fn validate(&self, path: &Path) -> Result<(), ManifestError> {
        let invalid = |message: String| ManifestError::Invalid {
            path: path.to_path_buf(),
            message,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("`name` must not be empty".to_string()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(format!(
                "`name` may only contain letters, digits, `-` and `_` (found `{}`)",
                self.name
            )));
        }

        for (key, dir) in [
            ("pages", &self.pages),
            ("blocks", &self.blocks),
            ("build.out_dir", &self.build.out_dir),
        ] {
            if !is_contained_relative(dir) {
                return Err(invalid(format!(
                    "`{}` must be a relative path inside the workbook (found `{}`)",
                    key,
                    dir.display()
                )));
            }
        }

        for (name, source) in &self.sources {
            if let Some(expr) = &source.schedule {
                Schedule::parse(expr)
                    .map_err(|e| invalid(format!("source `{}`: {}", name, e)))?;
            }
        }

        Ok(())
    }

    /// Enabled sources that declare a schedule, in name order.
    pub fn scheduled_sources(&self) -> Vec<(&str, &SourceConfig, Schedule)> {
        self.sources
            .iter()
            .filter(|(_, source)| source.enabled)
            .filter_map(|(name, source)| {
                let schedule = Schedule::parse(source.schedule.as_deref()?).ok()?;
                Some((name.as_str(), source, schedule))
            })
            .collect()
    }

    /// Unique cron expressions for the platform's trigger list, in source-name order.
    pub fn cron_triggers(&self) -> Vec<String> {
        let mut triggers: Vec<String> = Vec::new();
        for (_, _, schedule) in self.scheduled_sources() {
            let expr = schedule.as_str().to_string();
            if !triggers.contains(&expr) {
                triggers.push(expr);
            }
        }
        triggers
    }
}

fn is_contained_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Manifest, ManifestError> {
        Manifest::parse(text, Path::new("hands.toml"))
    }

    #[test]
    fn test_minimal_manifest_defaults() {
        let manifest = parse("name = \"sales\"\n").unwrap();
        assert_eq!(manifest.name, "sales");
        assert_eq!(manifest.pages, PathBuf::from("pages"));
        assert_eq!(manifest.blocks, PathBuf::from("blocks"));
        assert_eq!(manifest.build.out_dir, PathBuf::from(".hands"));
        assert!(manifest.sources.is_empty());
    }

    #[test]
    fn test_sources_and_triggers() {
        let manifest = parse(
            r#"
name = "sales"
pages = "content"

[sources.stripe]
schedule = "*/5 * * * *"

[sources.stripe.options]
account = "acct_123"

[sources.hubspot]
enabled = false
schedule = "0 * * * *"

[sources.github]
schedule = "*/5 * * * *"

[sources.manual]
"#,
        )
        .unwrap();

        assert_eq!(manifest.pages, PathBuf::from("content"));
        assert_eq!(manifest.sources.len(), 4);
        assert_eq!(
            manifest.sources["stripe"].options.get("account").and_then(|v| v.as_str()),
            Some("acct_123")
        );

        let scheduled: Vec<&str> = manifest
            .scheduled_sources()
            .into_iter()
            .map(|(name, _, _)| name)
            .collect();
        assert_eq!(scheduled, vec!["github", "stripe"]);
        assert_eq!(manifest.cron_triggers(), vec!["*/5 * * * *".to_string()]);
    }

    #[test]
    fn test_rejects_bad_schedule() {
        let err = parse(
            r#"
name = "sales"
[sources.stripe]
schedule = "every five minutes"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::Invalid { .. }));
        assert!(err.to_string().contains("stripe"));
    }

    #[test]
    fn test_rejects_escaping_directories() {
        let err = parse("name = \"sales\"\npages = \"../elsewhere\"\n").unwrap_err();
        assert!(err.to_string().contains("pages"));

        let err = parse("name = \"sales\"\n[build]\nout_dir = \"/tmp/out\"\n").unwrap_err();
        assert!(err.to_string().contains("build.out_dir"));
    }

    #[test]
    fn test_rejects_bad_name() {
        assert!(parse("name = \"\"\n").is_err());
        assert!(parse("name = \"has space\"\n").is_err());
    }

    #[test]
    fn test_parse_error() {
        let err = parse("name = \n").unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = Manifest::load(&tmp.path().join(MANIFEST_NAME)).unwrap_err();
        assert!(matches!(err, ManifestError::NotFound { .. }));
    }
}
