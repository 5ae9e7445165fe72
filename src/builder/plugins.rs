//! Module-resolution plugins for the bundler.
//!
//! Plugins contribute import aliases and, optionally, generated modules
//! the aliases point at. Two plugins ship with the builder:
//!
//! - [`PolyfillPlugin`] maps host-only module names to portable
//!   equivalents available in the edge runtime.
//! - [`LocalPackagePlugin`] maps first-party packages under the workbook's
//!   `packages/` directory to their entry files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Directory under the build dir holding generated polyfill modules.
pub const POLYFILL_DIR: &str = "polyfills";

/// Directory under the workbook root holding first-party packages.
pub const PACKAGES_DIR: &str = "packages";

/// An import alias: imports of `from` resolve to `to`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Alias {
    pub from: String,
    pub to: String,
}

impl Alias {
    fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Alias {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// A module a plugin needs written before bundling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedModule {
    /// Path relative to the build directory
    pub path: PathBuf,
    pub contents: String,
}

/// What a plugin contributes to one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginOutput {
    pub aliases: Vec<Alias>,
    pub modules: Vec<GeneratedModule>,
}

/// Inputs available to plugins.
#[derive(Debug, Clone)]
pub struct PluginContext<'a> {
    pub workbook_root: &'a Path,
    pub build_dir: &'a Path,
}

/// A module-resolution plugin.
pub trait ResolvePlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, cx: &PluginContext<'_>) -> Result<PluginOutput>;
}

/// Modules the runtime provides under the `node:` prefix.
const NODE_COMPAT: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "crypto",
    "events",
    "path",
    "process",
    "stream",
    "string_decoder",
    "url",
    "util",
    "zlib",
];

/// Modules with no runtime equivalent. Imports resolve to a stub that
/// throws when used.
const HOST_ONLY: &[&str] = &["child_process", "fs", "net", "os", "tls", "worker_threads"];

/// Maps host-only module names to portable equivalents.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolyfillPlugin;

impl PolyfillPlugin {
    fn stub_module(name: &str) -> String {
        format!(
            "// Generated by hands. `{name}` is not available in the worker runtime.\n\
             const unavailable = (member) => () => {{\n  \
               throw new Error(`node:{name}.${{String(member)}} is not available in the worker runtime`);\n\
             }};\n\
             export default new Proxy({{}}, {{ get: (_, member) => unavailable(member) }});\n"
        )
    }
}

impl ResolvePlugin for PolyfillPlugin {
    fn name(&self) -> &'static str {
        "polyfill"
    }

    fn resolve(&self, cx: &PluginContext<'_>) -> Result<PluginOutput> {
        let mut output = PluginOutput::default();

        for name in NODE_COMPAT {
            output.aliases.push(Alias::new(*name, format!("node:{}", name)));
        }

        for name in HOST_ONLY {
            let path = PathBuf::from(POLYFILL_DIR).join(format!("{}.js", name));
            let target = cx.build_dir.join(&path);
            output
                .aliases
                .push(Alias::new(*name, target.display().to_string()));
            output
                .aliases
                .push(Alias::new(format!("node:{}", name), target.display().to_string()));
            output.modules.push(GeneratedModule {
                path,
                contents: Self::stub_module(name),
            });
        }

        Ok(output)
    }
}

#[derive(Debug, Deserialize)]
struct PackageJson {
    name: Option<String>,
    module: Option<String>,
    main: Option<String>,
}

/// Maps first-party packages to their entry files.
///
/// Each directory under `packages/` with a `package.json` declaring a
/// `name` is aliased to its `module`, `main`, or `index.{ts,tsx,js}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalPackagePlugin;

impl LocalPackagePlugin {
    fn entry_for(dir: &Path, manifest: &PackageJson) -> Option<PathBuf> {
        let declared = manifest.module.as_ref().or(manifest.main.as_ref());
        if let Some(entry) = declared {
            return Some(dir.join(entry));
        }
        ["index.ts", "index.tsx", "index.js"]
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }
}

impl ResolvePlugin for LocalPackagePlugin {
    fn name(&self) -> &'static str {
        "local-package"
    }

    fn resolve(&self, cx: &PluginContext<'_>) -> Result<PluginOutput> {
        let packages_dir = cx.workbook_root.join(PACKAGES_DIR);
        if !packages_dir.is_dir() {
            return Ok(PluginOutput::default());
        }

        let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
        let entries = std::fs::read_dir(&packages_dir)
            .with_context(|| format!("failed to read {}", packages_dir.display()))?;

        for entry in entries {
            let dir = entry
                .with_context(|| format!("failed to read {}", packages_dir.display()))?
                .path();
            let manifest_path = dir.join("package.json");
            if !manifest_path.is_file() {
                continue;
            }

            let text = std::fs::read_to_string(&manifest_path)
                .with_context(|| format!("failed to read {}", manifest_path.display()))?;
            let manifest: PackageJson = match serde_json::from_str(&text) {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::warn!("ignoring {}: {}", manifest_path.display(), e);
                    continue;
                }
            };

            let Some(name) = manifest.name.clone() else {
                continue;
            };
            match Self::entry_for(&dir, &manifest) {
                Some(entry) => {
                    found.insert(name, entry);
                }
                None => tracing::warn!("package `{}` has no entry file", name),
            }
        }

        Ok(PluginOutput {
            aliases: found
                .into_iter()
                .map(|(name, entry)| Alias::new(name, entry.display().to_string()))
                .collect(),
            modules: Vec::new(),
        })
    }
}

/// The plugins every build uses, in application order.
pub fn default_plugins() -> Vec<Box<dyn ResolvePlugin>> {
    vec![Box::new(PolyfillPlugin), Box::new(LocalPackagePlugin)]
}

/// Run all plugins and merge their output. Later plugins win on alias
/// conflicts, so first-party packages can shadow polyfills.
pub fn run_plugins(
    plugins: &[Box<dyn ResolvePlugin>],
    cx: &PluginContext<'_>,
) -> Result<PluginOutput> {
    let mut aliases: BTreeMap<String, String> = BTreeMap::new();
    let mut modules = Vec::new();

    for plugin in plugins {
        let output = plugin
            .resolve(cx)
            .with_context(|| format!("resolution plugin `{}` failed", plugin.name()))?;
        tracing::debug!(
            "plugin `{}` contributed {} aliases",
            plugin.name(),
            output.aliases.len()
        );
        for alias in output.aliases {
            aliases.insert(alias.from, alias.to);
        }
        modules.extend(output.modules);
    }

    Ok(PluginOutput {
        aliases: aliases
            .into_iter()
            .map(|(from, to)| Alias { from, to })
            .collect(),
        modules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_polyfills() {
        let tmp = TempDir::new().unwrap();
        let build_dir = tmp.path().join("build");
        let cx = PluginContext {
            workbook_root: tmp.path(),
            build_dir: &build_dir,
        };

        let output = PolyfillPlugin.resolve(&cx).unwrap();

        assert!(output
            .aliases
            .contains(&Alias::new("buffer", "node:buffer")));
        let fs_alias = output.aliases.iter().find(|a| a.from == "fs").unwrap();
        assert!(fs_alias.to.ends_with("fs.js"));
        assert!(output
            .modules
            .iter()
            .any(|m| m.path == Path::new("polyfills/fs.js") && m.contents.contains("node:fs")));
    }

    #[test]
    fn test_local_packages() {
        let tmp = TempDir::new().unwrap();
        let pkg = tmp.path().join("packages/shared");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("package.json"), r#"{"name": "@acme/shared"}"#).unwrap();
        std::fs::write(pkg.join("index.ts"), "export const x = 1;").unwrap();

        let other = tmp.path().join("packages/fmt");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(
            other.join("package.json"),
            r#"{"name": "@acme/fmt", "main": "dist/fmt.js"}"#,
        )
        .unwrap();

        std::fs::create_dir_all(tmp.path().join("packages/not-a-package")).unwrap();

        let build_dir = tmp.path().join("build");
        let cx = PluginContext {
            workbook_root: tmp.path(),
            build_dir: &build_dir,
        };
        let output = LocalPackagePlugin.resolve(&cx).unwrap();

        let names: Vec<&str> = output.aliases.iter().map(|a| a.from.as_str()).collect();
        assert_eq!(names, vec!["@acme/fmt", "@acme/shared"]);
        assert!(output.aliases[0].to.ends_with("dist/fmt.js"));
        assert!(output.aliases[1].to.ends_with("index.ts"));
    }

    #[test]
    fn test_missing_packages_dir() {
        let tmp = TempDir::new().unwrap();
        let cx = PluginContext {
            workbook_root: tmp.path(),
            build_dir: tmp.path(),
        };
        assert_eq!(LocalPackagePlugin.resolve(&cx).unwrap(), PluginOutput::default());
    }

    #[test]
    fn test_later_plugin_wins() {
        let tmp = TempDir::new().unwrap();
        let pkg = tmp.path().join("packages/fs-shim");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("package.json"), r#"{"name": "fs", "main": "fs.js"}"#).unwrap();

        let build_dir = tmp.path().join("build");
        let cx = PluginContext {
            workbook_root: tmp.path(),
            build_dir: &build_dir,
        };
        let output = run_plugins(&default_plugins(), &cx).unwrap();

        let fs_alias = output.aliases.iter().find(|a| a.from == "fs").unwrap();
        assert!(fs_alias.to.contains("fs-shim"));
        // Sorted by alias name.
        let names: Vec<&String> = output.aliases.iter().map(|a| &a.from).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
