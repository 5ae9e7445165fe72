//! Implementation of `hands build`.

use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::builder::build::{BuildOptions, BuildResult, Builder};
use crate::builder::bundler::EsbuildBundler;
use crate::builder::diagnostics::EsbuildClassifier;
use crate::util::config::Config;
use crate::util::process::resolve_tool;

/// Path to esbuild for the workbook at `dir`, falling back to the bare
/// name so a missing tool surfaces as a build error.
pub fn esbuild_path(config: &Config, dir: &Path) -> PathBuf {
    resolve_tool("esbuild", config.tools.esbuild.as_deref(), dir).unwrap_or_else(|e| {
        tracing::debug!("{:#}", e);
        PathBuf::from("esbuild")
    })
}

/// A builder using esbuild and its error classifier.
pub fn default_builder(config: &Config, dir: &Path) -> Builder {
    let bundler = EsbuildBundler::new(esbuild_path(config, dir), config.timeouts.bundle());
    Builder::new(Arc::new(bundler), Arc::new(EsbuildClassifier))
}

/// Build the workbook at `dir`.
pub fn build(config: &Config, dir: &Path, options: &BuildOptions) -> Result<BuildResult> {
    default_builder(config, dir).build(dir, options)
}

/// Human-readable summary of a build.
pub fn format_build(result: &BuildResult) -> String {
    let mut out = String::new();
    if result.success {
        writeln!(
            out,
            "{} pages, {} blocks, {} routes",
            result.pages.len(),
            result.blocks.len(),
            result.routes.len()
        )
        .unwrap();
        for route in &result.routes {
            writeln!(out, "  {}", route).unwrap();
        }
        if !result.crons.is_empty() {
            writeln!(out, "crons: {}", result.crons.join(", ")).unwrap();
        }
    } else {
        writeln!(out, "{} errors:", result.errors.len()).unwrap();
        for error in &result.errors {
            writeln!(out, "  {}", error.summary()).unwrap();
            if let Some(suggestion) = &error.suggestion {
                writeln!(out, "    help: {}", suggestion).unwrap();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::diagnostics::BuildError;
    use std::time::Duration;

    fn result(success: bool, errors: Vec<BuildError>) -> BuildResult {
        BuildResult {
            success,
            out_dir: PathBuf::from("/wb/.hands/build"),
            files: Vec::new(),
            errors,
            pages: Vec::new(),
            blocks: Vec::new(),
            routes: Vec::new(),
            crons: vec!["*/5 * * * *".to_string()],
            fingerprint: String::new(),
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn test_format_success() {
        let text = format_build(&result(true, Vec::new()));
        assert!(text.starts_with("0 pages, 0 blocks, 0 routes"));
        assert!(text.contains("crons: */5 * * * *"));
    }

    #[test]
    fn test_format_failure() {
        let error = BuildError {
            suggestion: Some("install it".to_string()),
            ..BuildError::other("esbuild not found")
        };
        let text = format_build(&result(false, vec![error]));
        assert!(text.starts_with("1 errors:"));
        assert!(text.contains("esbuild not found"));
        assert!(text.contains("help: install it"));
    }

    #[test]
    fn test_missing_esbuild_falls_back_to_name() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.tools.esbuild = Some(PathBuf::from("/opt/esbuild"));
        assert_eq!(esbuild_path(&config, tmp.path()), PathBuf::from("/opt/esbuild"));
    }
}
