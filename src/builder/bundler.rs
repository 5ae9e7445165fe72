//! Bundler backends.
//!
//! A [`Bundler`] turns the generated entry module into a single runnable
//! artifact. It reports raw tool output; turning that output into
//! structured errors is the job of an
//! [`ErrorClassifier`](crate::builder::diagnostics::ErrorClassifier).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

use crate::builder::plugins::Alias;
use crate::util::process::ProcessBuilder;

/// What to bundle and where.
#[derive(Debug, Clone)]
pub struct BundleRequest<'a> {
    pub entry: &'a Path,
    pub outfile: &'a Path,
    /// Directory the bundler runs in; relative imports resolve from here
    pub working_dir: &'a Path,
    pub aliases: &'a [Alias],
    pub dev: bool,
    pub verbose: bool,
}

/// Raw result of one bundler run.
#[derive(Debug, Clone)]
pub struct BundleOutcome {
    pub success: bool,
    /// Combined tool output, for classification and verbose display
    pub output: String,
}

/// A bundler backend.
///
/// `bundle` returns `Err` only when the tool could not be run at all
/// (missing binary, timeout). A tool that ran and rejected the input
/// returns `Ok` with `success == false`.
pub trait Bundler: Send + Sync {
    fn name(&self) -> &str;

    fn bundle(&self, request: &BundleRequest<'_>) -> Result<BundleOutcome>;
}

/// esbuild, driven through its CLI.
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    program: PathBuf,
    timeout: Duration,
}

impl EsbuildBundler {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        EsbuildBundler {
            program: program.into(),
            timeout,
        }
    }

    /// Command line for `request`. Arguments are in a fixed order so the
    /// command is reproducible.
    pub fn command(&self, request: &BundleRequest<'_>) -> ProcessBuilder {
        let mut cmd = ProcessBuilder::new(&self.program)
            .arg(request.entry)
            .args([
                "--bundle",
                "--format=esm",
                "--platform=browser",
                "--conditions=workerd,worker,browser",
                "--target=es2022",
                "--jsx=automatic",
                "--external:node:*",
                "--color=false",
            ])
            .arg(format!("--outfile={}", request.outfile.display()))
            .cwd(request.working_dir);

        cmd = if request.verbose {
            cmd.arg("--log-level=info")
        } else {
            cmd.arg("--log-level=warning")
        };

        cmd = if request.dev {
            cmd.args([
                "--sourcemap=inline",
                "--define:process.env.NODE_ENV=\"development\"",
            ])
        } else {
            cmd.args([
                "--minify",
                "--define:process.env.NODE_ENV=\"production\"",
            ])
        };

        for alias in request.aliases {
            cmd = cmd.arg(format!("--alias:{}={}", alias.from, alias.to));
        }

        cmd
    }
}

impl Bundler for EsbuildBundler {
    fn name(&self) -> &str {
        "esbuild"
    }

    fn bundle(&self, request: &BundleRequest<'_>) -> Result<BundleOutcome> {
        let cmd = self.command(request);
        tracing::debug!("running {}", cmd.display_command());

        let output = cmd.exec_with_timeout(self.timeout)?;
        Ok(BundleOutcome {
            success: output.success(),
            output: output.combined(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_esbuild_command() {
        let bundler = EsbuildBundler::new("/usr/bin/esbuild", Duration::from_secs(120));
        let aliases = vec![Alias {
            from: "fs".to_string(),
            to: "/wb/build/polyfills/fs.js".to_string(),
        }];
        let request = BundleRequest {
            entry: Path::new("/wb/build/entry.js"),
            outfile: Path::new("/wb/build/worker.js"),
            working_dir: Path::new("/wb/build"),
            aliases: &aliases,
            dev: true,
            verbose: false,
        };

        let cmd = bundler.command(&request);
        let args = cmd.get_args();

        assert_eq!(args[0], "/wb/build/entry.js");
        assert!(args.contains(&"--bundle".to_string()));
        assert!(args.contains(&"--outfile=/wb/build/worker.js".to_string()));
        assert!(args.contains(&"--sourcemap=inline".to_string()));
        assert!(args.contains(&"--alias:fs=/wb/build/polyfills/fs.js".to_string()));
        assert!(!args.contains(&"--minify".to_string()));
    }

    #[test]
    fn test_release_command_minifies() {
        let bundler = EsbuildBundler::new("esbuild", Duration::from_secs(1));
        let request = BundleRequest {
            entry: Path::new("entry.js"),
            outfile: Path::new("worker.js"),
            working_dir: Path::new("."),
            aliases: &[],
            dev: false,
            verbose: true,
        };

        let args = bundler.command(&request).get_args().to_vec();
        assert!(args.contains(&"--minify".to_string()));
        assert!(args.contains(&"--log-level=info".to_string()));
    }
}
