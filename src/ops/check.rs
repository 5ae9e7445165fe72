//! Workbook health checks.
//!
//! The `check` command verifies a workbook without starting a runtime.
//!
//! ## Usage
//!
//! ```bash
//! hands check            # Human-readable report
//! hands check --json     # One JSON object on stdout
//! hands check --strict   # Optional checks count as failures
//! ```
//!
//! ## Checks Performed
//!
//! - Manifest loads and validates
//! - Discovery finds no malformed pages or blocks
//! - The workbook builds
//! - esbuild is available; wrangler and Postgres are optional
//! - Runtime lock is not stale (optional)

use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::builder::build::BuildOptions;
use crate::core::discovery::discover;
use crate::core::Workbook;
use crate::ops::hands_build::default_builder;
use crate::runtime::lockfile::{lock_status, LockStatus, SystemProbe};
use crate::util::config::Config;
use crate::util::process::resolve_tool;

/// Result of a single check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,

    #[serde(rename = "ok")]
    pub passed: bool,

    pub message: String,

    /// Raw diagnostic output, shown beneath a failed check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Optional checks are warnings unless running in strict mode
    #[serde(skip)]
    pub required: bool,

    #[serde(skip)]
    pub duration: Duration,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        CheckResult {
            name: name.into(),
            passed: true,
            message: message.into(),
            output: None,
            required: true,
            duration: Duration::ZERO,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        CheckResult {
            passed: false,
            ..CheckResult::pass(name, message)
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        if !output.trim().is_empty() {
            self.output = Some(output);
        }
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Whether this check fails the run.
    pub fn is_failure(&self, strict: bool) -> bool {
        !self.passed && (self.required || strict)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub success: bool,
    pub workbook_dir: PathBuf,
    pub checks: Vec<CheckResult>,
    #[serde(skip)]
    pub total_duration: Duration,
}

impl CheckReport {
    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    /// Treat optional checks as required
    pub strict: bool,
}

/// Run every check against the workbook at `dir`.
///
/// Checks that depend on a valid manifest are skipped when it fails.
pub fn check(config: &Config, dir: &Path, options: CheckOptions) -> CheckReport {
    let start = Instant::now();
    let mut checks = Vec::new();

    let (manifest_check, workbook) = check_manifest(dir);
    checks.push(manifest_check);

    checks.push(check_tool("esbuild", config.tools.esbuild.as_deref(), dir, true));
    checks.push(check_tool("wrangler", config.tools.wrangler.as_deref(), dir, false));
    checks.push(check_tool("postgres", config.tools.postgres.as_deref(), dir, false));
    checks.push(check_tool("initdb", config.tools.initdb.as_deref(), dir, false));

    if let Some(workbook) = &workbook {
        checks.push(check_discovery(workbook));
        checks.push(check_build(config, workbook));
        checks.push(check_lock(workbook));
    }

    let success = !checks.iter().any(|c| c.is_failure(options.strict));
    CheckReport {
        success,
        workbook_dir: workbook
            .as_ref()
            .map(|wb| wb.root().to_path_buf())
            .unwrap_or_else(|| dir.to_path_buf()),
        checks,
        total_duration: start.elapsed(),
    }
}

fn check_manifest(dir: &Path) -> (CheckResult, Option<Workbook>) {
    let start = Instant::now();
    match Workbook::open(dir) {
        Ok(workbook) => {
            let manifest = workbook.manifest();
            let message = format!(
                "`{}` with {} sources",
                manifest.name,
                manifest.sources.len()
            );
            (
                CheckResult::pass("manifest", message).with_duration(start.elapsed()),
                Some(workbook),
            )
        }
        Err(e) => (
            CheckResult::fail("manifest", e.to_string()).with_duration(start.elapsed()),
            None,
        ),
    }
}

fn check_tool(name: &str, configured: Option<&Path>, dir: &Path, required: bool) -> CheckResult {
    let start = Instant::now();
    let result = match resolve_tool(name, configured, dir) {
        Ok(path) if path.exists() => CheckResult::pass(name, format!("found {}", path.display())),
        Ok(path) => CheckResult::fail(name, format!("{} does not exist", path.display())),
        Err(e) => CheckResult::fail(name, e.to_string()),
    };
    let result = result.with_duration(start.elapsed());
    if required {
        result
    } else {
        result.optional()
    }
}

fn check_discovery(workbook: &Workbook) -> CheckResult {
    let start = Instant::now();
    let discovery = discover(&workbook.pages_dir(), &workbook.blocks_dir());
    let message = format!(
        "{} pages, {} blocks",
        discovery.pages.len(),
        discovery.blocks.len()
    );

    if discovery.errors.is_empty() {
        return CheckResult::pass("discovery", message).with_duration(start.elapsed());
    }

    let output = discovery
        .errors
        .iter()
        .map(|e| format!("{}: {}", e.path.display(), e.message))
        .collect::<Vec<_>>()
        .join("\n");
    CheckResult::fail(
        "discovery",
        format!("{} ({} errors)", message, discovery.errors.len()),
    )
    .with_output(output)
    .with_duration(start.elapsed())
}

fn check_build(config: &Config, workbook: &Workbook) -> CheckResult {
    let start = Instant::now();
    let options = BuildOptions {
        dev: true,
        verbose: false,
    };
    let result = match default_builder(config, workbook.root()).build_workbook(workbook, &options) {
        Ok(result) => result,
        Err(e) => return CheckResult::fail("build", format!("{:#}", e)).with_duration(start.elapsed()),
    };

    if result.success {
        return CheckResult::pass("build", format!("{} routes", result.routes.len()))
            .with_duration(start.elapsed());
    }

    let output = result
        .errors
        .iter()
        .map(|e| e.summary())
        .collect::<Vec<_>>()
        .join("\n");
    CheckResult::fail("build", format!("{} errors", result.errors.len()))
        .with_output(output)
        .with_duration(start.elapsed())
}

fn check_lock(workbook: &Workbook) -> CheckResult {
    let start = Instant::now();
    let result = match lock_status(&workbook.lock_path(), &SystemProbe) {
        Ok(LockStatus::Unlocked) => CheckResult::pass("runtime", "not running"),
        Ok(LockStatus::Active(lock)) => CheckResult::pass(
            "runtime",
            format!("running (pid {}, port {})", lock.pid, lock.runtime_port),
        ),
        Ok(LockStatus::Stale(lock)) => CheckResult::fail(
            "runtime",
            format!("stale lock left by pid {}", lock.pid),
        ),
        Err(e) => CheckResult::fail("runtime", e.to_string()),
    };
    result.optional().with_duration(start.elapsed())
}

/// One line per check with a pass/fail glyph, raw output beneath failures.
pub fn format_report(report: &CheckReport, verbose: bool) -> String {
    let mut output = String::new();

    writeln!(output, "Checking {}\n", report.workbook_dir.display()).unwrap();
    for check in &report.checks {
        let status = if check.passed { "[OK]" } else { "[!!]" };
        let required = if check.required { "" } else { " (optional)" };
        writeln!(output, "  {} {}{}: {}", status, check.name, required, check.message).unwrap();

        if let Some(raw) = check.output.as_ref().filter(|_| !check.passed || verbose) {
            for line in raw.lines() {
                writeln!(output, "      {}", line).unwrap();
            }
        }
    }

    writeln!(
        output,
        "\nSummary: {} passed, {} failed",
        report.passed_count(),
        report.failed_count()
    )
    .unwrap();
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_manifest_fails() {
        let tmp = TempDir::new().unwrap();
        let report = check(&Config::default(), tmp.path(), CheckOptions::default());

        assert!(!report.success);
        assert!(!report.checks[0].passed);
        assert_eq!(report.checks[0].name, "manifest");
        assert!(!report.checks.iter().any(|c| c.name == "build"));
    }

    #[test]
    fn test_strict_mode_counts_optional_failures() {
        let failed = CheckResult::fail("wrangler", "not found").optional();
        assert!(!failed.is_failure(false));
        assert!(failed.is_failure(true));
        assert!(CheckResult::fail("manifest", "missing").is_failure(false));
    }

    #[test]
    fn test_discovery_errors_are_reported() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("hands.toml"), "name = \"wb\"\n").unwrap();
        fs::create_dir_all(tmp.path().join("pages")).unwrap();
        fs::write(tmp.path().join("pages/bad.md"), "---\ntitle Broken\n---\n").unwrap();

        let workbook = Workbook::open(tmp.path()).unwrap();
        let result = check_discovery(&workbook);
        assert!(!result.passed);
        assert!(result.output.unwrap().contains("bad.md"));
    }

    #[test]
    fn test_report_json_shape() {
        let report = CheckReport {
            success: false,
            workbook_dir: PathBuf::from("/wb"),
            checks: vec![
                CheckResult::pass("manifest", "`wb` with 0 sources"),
                CheckResult::fail("build", "1 errors").with_output("[resolve] could not resolve module `foo`"),
            ],
            total_duration: Duration::ZERO,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["workbookDir"], "/wb");
        assert_eq!(json["checks"][0]["ok"], true);
        assert!(json["checks"][0].get("output").is_none());
        assert_eq!(json["checks"][1]["name"], "build");
        assert!(json["checks"][1]["output"].as_str().unwrap().contains("foo"));
    }

    #[test]
    fn test_format_report_shows_output_under_failures() {
        let report = CheckReport {
            success: false,
            workbook_dir: PathBuf::from("/wb"),
            checks: vec![
                CheckResult::pass("manifest", "ok").with_output("hidden"),
                CheckResult::fail("build", "1 errors").with_output("line one\nline two"),
            ],
            total_duration: Duration::ZERO,
        };

        let text = format_report(&report, false);
        assert!(text.contains("  [OK] manifest: ok"));
        assert!(text.contains("  [!!] build: 1 errors"));
        assert!(text.contains("      line one\n      line two"));
        assert!(!text.contains("hidden"));
    }
}
