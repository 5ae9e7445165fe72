//! The build operation.
//!
//! A build runs discovery against the manifest's directories, generates
//! the platform configuration and entry module, applies the resolution
//! plugins, and invokes the bundler. Discovery and bundler errors are
//! collected into one [`BuildResult`]; only conditions with no result to
//! report (missing manifest, unwritable output directory) are returned as
//! `Err`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::builder::bundler::{BundleRequest, Bundler};
use crate::builder::config_gen::{generate_config, CONFIG_FILE};
use crate::builder::diagnostics::{BuildError, ErrorClassifier};
use crate::builder::entry::{generate_entry, routes, Route, ENTRY_FILE};
use crate::builder::plugins::{default_plugins, run_plugins, PluginContext, ResolvePlugin};
use crate::core::discovery::{discover, DiscoveredBlock, DiscoveredPage};
use crate::core::Workbook;
use crate::util::diagnostic::suggestions;
use crate::util::fs::{ensure_dir, slash_path, write_if_changed};
use crate::util::hash::Fingerprint;

/// File name of the bundled worker script.
pub const BUNDLE_FILE: &str = "worker.js";

/// Options for a build.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Development build: source maps, no minification
    pub dev: bool,

    /// Verbose bundler logging
    pub verbose: bool,
}

/// Outcome of one build.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub success: bool,
    pub out_dir: PathBuf,
    /// Generated files relative to `out_dir`, sorted
    pub files: Vec<String>,
    pub errors: Vec<BuildError>,
    pub pages: Vec<DiscoveredPage>,
    pub blocks: Vec<DiscoveredBlock>,
    pub routes: Vec<Route>,
    pub crons: Vec<String>,
    /// Digest of the generated sources; identifies the manifest snapshot
    /// and artifacts this build was produced from
    pub fingerprint: String,
    #[serde(skip)]
    pub duration: Duration,
}

impl BuildResult {
    /// Path of the bundled worker script.
    pub fn bundle_path(&self) -> PathBuf {
        self.out_dir.join(BUNDLE_FILE)
    }

    /// Path of the generated platform configuration.
    pub fn config_path(&self) -> PathBuf {
        self.out_dir.join(CONFIG_FILE)
    }
}

/// Runs builds with a given bundler and classifier.
pub struct Builder {
    bundler: Arc<dyn Bundler>,
    classifier: Arc<dyn ErrorClassifier>,
    plugins: Vec<Box<dyn ResolvePlugin>>,
}

impl Builder {
    pub fn new(bundler: Arc<dyn Bundler>, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Builder {
            bundler,
            classifier,
            plugins: default_plugins(),
        }
    }

    /// Replace the resolution plugins.
    pub fn with_plugins(mut self, plugins: Vec<Box<dyn ResolvePlugin>>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn classifier(&self) -> Arc<dyn ErrorClassifier> {
        Arc::clone(&self.classifier)
    }

    /// Build the workbook at `project_dir`, loading its manifest fresh.
    pub fn build(&self, project_dir: &Path, options: &BuildOptions) -> Result<BuildResult> {
        let workbook = Workbook::open(project_dir)?;
        self.build_workbook(&workbook, options)
    }

    /// Build an already-opened workbook.
    pub fn build_workbook(&self, workbook: &Workbook, options: &BuildOptions) -> Result<BuildResult> {
        let start = Instant::now();
        let manifest = workbook.manifest();
        let build_dir = workbook.build_dir();
        ensure_dir(&build_dir)?;

        tracing::info!("building workbook `{}`", manifest.name);

        let discovery = discover(&workbook.pages_dir(), &workbook.blocks_dir());
        tracing::debug!(
            "discovered {} pages, {} blocks, {} errors",
            discovery.pages.len(),
            discovery.blocks.len(),
            discovery.errors.len()
        );

        let mut errors: Vec<BuildError> = discovery.errors.iter().map(BuildError::from).collect();
        let mut files = Vec::new();

        let config = generate_config(manifest, BUNDLE_FILE)?;
        write_generated(&build_dir, Path::new(CONFIG_FILE), &config, &mut files)?;

        let table = routes(&discovery.pages, &discovery.blocks);
        let entry = generate_entry(&build_dir, &discovery.pages, &discovery.blocks, &table);
        write_generated(&build_dir, Path::new(ENTRY_FILE), &entry, &mut files)?;

        let plugin_cx = PluginContext {
            workbook_root: workbook.root(),
            build_dir: &build_dir,
        };
        let resolved = run_plugins(&self.plugins, &plugin_cx)?;
        for module in &resolved.modules {
            write_generated(&build_dir, &module.path, &module.contents, &mut files)?;
        }

        let mut fingerprint = Fingerprint::new();
        fingerprint.part(&config).part(&entry);
        for alias in &resolved.aliases {
            fingerprint.part(&alias.from).part(&alias.to);
        }

        let entry_path = build_dir.join(ENTRY_FILE);
        let bundle_path = build_dir.join(BUNDLE_FILE);
        let request = BundleRequest {
            entry: &entry_path,
            outfile: &bundle_path,
            working_dir: &build_dir,
            aliases: &resolved.aliases,
            dev: options.dev,
            verbose: options.verbose,
        };

        match self.bundler.bundle(&request) {
            Ok(outcome) if outcome.success => {
                if options.verbose && !outcome.output.trim().is_empty() {
                    tracing::info!("{}", outcome.output.trim_end());
                }
                files.push(BUNDLE_FILE.to_string());
            }
            Ok(outcome) => {
                errors.extend(self.classifier.classify_failure(&outcome.output));
            }
            Err(e) => {
                errors.push(BuildError {
                    suggestion: Some(format!(
                        "`{}` could not run: {}",
                        self.bundler.name(),
                        suggestions::MISSING_TOOL
                    )),
                    ..BuildError::other(format!("{:#}", e))
                });
            }
        }

        // Never leave an outdated bundle behind a failed build.
        if !files.iter().any(|f| f == BUNDLE_FILE) && bundle_path.exists() {
            std::fs::remove_file(&bundle_path)
                .with_context(|| format!("failed to remove {}", bundle_path.display()))?;
        }

        files.sort();
        let success = errors.is_empty();
        let duration = start.elapsed();
        if success {
            tracing::info!("built `{}` in {:?}", manifest.name, duration);
        } else {
            tracing::warn!("build of `{}` failed with {} errors", manifest.name, errors.len());
        }

        Ok(BuildResult {
            success,
            out_dir: build_dir,
            files,
            errors,
            pages: discovery.pages,
            blocks: discovery.blocks,
            routes: table,
            crons: manifest.cron_triggers(),
            fingerprint: fingerprint.finish(),
            duration,
        })
    }
}

fn write_generated(
    build_dir: &Path,
    rel: &Path,
    contents: &str,
    files: &mut Vec<String>,
) -> Result<()> {
    let path = build_dir.join(rel);
    if write_if_changed(&path, contents)? {
        tracing::debug!("wrote {}", path.display());
    }
    files.push(slash_path(rel));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::bundler::testing::FakeBundler;
    use crate::builder::diagnostics::{BuildErrorKind, EsbuildClassifier};
    use std::fs;
    use tempfile::TempDir;

    fn workbook(manifest: &str) -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("hands.toml"), manifest).unwrap();
        tmp
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn builder(bundler: FakeBundler) -> (Builder, Arc<FakeBundler>) {
        let bundler = Arc::new(bundler);
        let builder = Builder::new(bundler.clone(), Arc::new(EsbuildClassifier));
        (builder, bundler)
    }

    #[test]
    fn test_pages_and_block_routes() {
        let tmp = workbook("name = \"sales\"\n");
        write(tmp.path(), "pages/index.md", "# Home\n");
        write(tmp.path(), "pages/about.md", "# About\n");
        write(tmp.path(), "blocks/chart.tsx", "export default () => 1;\n");

        let (builder, _) = builder(FakeBundler::succeeding());
        let result = builder.build(tmp.path(), &BuildOptions::default()).unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.pages.len(), 2);
        assert_eq!(result.blocks.len(), 1);

        let mut table: Vec<String> = result.routes.iter().map(|r| r.to_string()).collect();
        table.sort();
        let mut expected = vec![
            "GET index",
            "GET about",
            "GET /components/chart",
            "POST /components/chart",
        ];
        expected.sort();
        assert_eq!(table, expected);
        assert!(result.bundle_path().is_file());
    }

    #[test]
    fn test_build_is_idempotent() {
        let tmp = workbook("name = \"sales\"\n[sources.a]\nschedule = \"* * * * *\"\n");
        write(tmp.path(), "pages/index.md", "# Home\n");
        write(tmp.path(), "blocks/chart.tsx", "export default () => 1;\n");

        let (builder, _) = builder(FakeBundler::succeeding());
        let first = builder.build(tmp.path(), &BuildOptions::default()).unwrap();
        let config_first = fs::read_to_string(first.config_path()).unwrap();
        let entry_first = fs::read_to_string(first.out_dir.join(ENTRY_FILE)).unwrap();

        let second = builder.build(tmp.path(), &BuildOptions::default()).unwrap();
        let config_second = fs::read_to_string(second.config_path()).unwrap();
        let entry_second = fs::read_to_string(second.out_dir.join(ENTRY_FILE)).unwrap();

        assert_eq!(config_first, config_second);
        assert_eq!(entry_first, entry_second);
        assert_eq!(first.files, second.files);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.crons, vec!["* * * * *".to_string()]);
    }

    #[test]
    fn test_missing_pages_dir_is_not_an_error() {
        let tmp = workbook("name = \"sales\"\npages = \"does-not-exist\"\n");

        let (builder, _) = builder(FakeBundler::succeeding());
        let result = builder.build(tmp.path(), &BuildOptions::default()).unwrap();

        assert!(result.success);
        assert!(result.pages.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_unresolved_module_error() {
        let tmp = workbook("name = \"sales\"\n");
        write(tmp.path(), "blocks/chart.tsx", "import x from \"foo\";\n");

        let (builder, bundler) = builder(FakeBundler::failing(
            "✘ [ERROR] Could not resolve \"foo\"\n\n    ../../blocks/chart.tsx:1:14:\n",
        ));
        let result = builder.build(tmp.path(), &BuildOptions::default()).unwrap();

        assert!(!result.success);
        assert_eq!(bundler.calls(), 1);
        assert_eq!(result.errors.len(), 1);
        let error = &result.errors[0];
        assert_eq!(error.kind, BuildErrorKind::Resolve);
        assert_eq!(error.module.as_deref(), Some("foo"));
        assert!(error.message.contains("foo"));
        assert!(!result.files.contains(&BUNDLE_FILE.to_string()));
    }

    #[test]
    fn test_errors_accumulate() {
        let tmp = workbook("name = \"sales\"\n");
        write(tmp.path(), "pages/bad.md", "---\ntitle: unclosed\n");
        write(tmp.path(), "pages/good.md", "fine\n");

        let (builder, bundler) = builder(FakeBundler::failing("✘ [ERROR] Unexpected \"}\"\n"));
        let result = builder.build(tmp.path(), &BuildOptions::default()).unwrap();

        assert_eq!(bundler.calls(), 1);
        let kinds: Vec<BuildErrorKind> = result.errors.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![BuildErrorKind::Other, BuildErrorKind::Syntax]);
        assert_eq!(result.pages.len(), 1);
    }

    #[test]
    fn test_failed_build_removes_stale_bundle() {
        let tmp = workbook("name = \"sales\"\n");
        let (builder, bundler) = builder(FakeBundler::succeeding());

        let ok = builder.build(tmp.path(), &BuildOptions::default()).unwrap();
        assert!(ok.bundle_path().exists());

        bundler.set_result(false, "✘ [ERROR] Unexpected end of file\n");
        let failed = builder.build(tmp.path(), &BuildOptions::default()).unwrap();
        assert!(!failed.success);
        assert!(!failed.bundle_path().exists());
    }

    #[test]
    fn test_missing_manifest_fails_fast() {
        let tmp = TempDir::new().unwrap();
        let (builder, bundler) = builder(FakeBundler::succeeding());

        assert!(builder.build(tmp.path(), &BuildOptions::default()).is_err());
        assert_eq!(bundler.calls(), 0);
    }
}
