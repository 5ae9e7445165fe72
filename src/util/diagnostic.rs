//! User-friendly diagnostic messages.
//!
//! Every fatal error the CLI prints should carry its root cause and, where
//! one exists, the command that gets the user unstuck.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic as _;

use crate::core::ManifestError;
use crate::runtime::lockfile::LockError;

/// Suggestions attached to errors raised as plain messages.
pub mod suggestions {
    /// Suggestion when build fails.
    pub const BUILD_FAILED: &str = "run `hands check` for per-step diagnostics";

    /// Suggestion when a required tool is missing.
    pub const MISSING_TOOL: &str =
        "install it or set its path under [tools] in .hands/config.toml";
}

/// A fatal error rendered for the terminal.
#[derive(Debug, Clone, Default)]
pub struct Diagnostic {
    pub message: String,
    /// Underlying causes, outermost first
    pub context: Vec<String>,
    pub suggestions: Vec<String>,
    pub location: Option<PathBuf>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Build a diagnostic from an error chain.
    ///
    /// Typed errors anywhere in the chain contribute their `help` text and
    /// the file they concern.
    pub fn from_error(err: &anyhow::Error) -> Self {
        let mut diag = Diagnostic::error(err.to_string());
        for cause in err.chain().skip(1) {
            diag = diag.with_context(cause.to_string());
        }

        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<ManifestError>() {
                if let Some(help) = e.help() {
                    diag = diag.with_suggestion(help.to_string());
                }
                break;
            }
            if let Some(e) = cause.downcast_ref::<LockError>() {
                if let Some(help) = e.help() {
                    diag = diag.with_suggestion(help.to_string());
                }
                match e {
                    LockError::Corrupt { path, .. }
                    | LockError::Lost { path }
                    | LockError::Contention { path, .. }
                    | LockError::Io { path, .. } => {
                        diag = diag.with_location(path.clone());
                    }
                    LockError::RuntimeAlreadyActive { .. } => {}
                }
                break;
            }
        }
        diag
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let (error, help) = if color {
            ("\x1b[1;31merror\x1b[0m", "\x1b[1;32mhelp\x1b[0m")
        } else {
            ("error", "help")
        };

        let mut output = format!("{}: {}\n", error, self.message);
        if let Some(path) = &self.location {
            output.push_str(&format!("  --> {}\n", path.display()));
        }
        for ctx in &self.context {
            output.push_str(&format!("  = {}\n", ctx));
        }
        for suggestion in &self.suggestions {
            output.push_str(&format!("{}: {}\n", help, suggestion));
        }
        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_diagnostic_formatting() {
        let diag = Diagnostic::error("runtime already active for /work/sales")
            .with_context("held by pid 4242 on port 55001")
            .with_suggestion("run `hands status`")
            .with_location("/work/sales/.hands/runtime.lock");

        let output = diag.format(false);
        assert!(output.starts_with("error: runtime already active"));
        assert!(output.contains("--> /work/sales/.hands/runtime.lock"));
        assert!(output.contains("= held by pid 4242"));
        assert!(output.contains("help: run `hands status`"));
    }

    #[test]
    fn test_manifest_error_brings_its_help() {
        let err = anyhow::Error::new(ManifestError::NotFound {
            dir: PathBuf::from("/tmp/nowhere"),
        });
        let diag = Diagnostic::from_error(&err);
        assert!(diag.message.contains("hands.toml"));
        assert_eq!(diag.suggestions.len(), 1);
        assert!(diag.suggestions[0].contains("name = "));
    }

    #[test]
    fn test_lock_error_behind_context() {
        let err = Err::<(), _>(LockError::Corrupt {
            path: PathBuf::from("/wb/.hands/runtime.lock"),
            message: "expected value".into(),
        })
        .context("failed to start runtime")
        .unwrap_err();

        let diag = Diagnostic::from_error(&err);
        assert_eq!(diag.message, "failed to start runtime");
        assert_eq!(diag.context.len(), 1);
        assert_eq!(diag.location, Some(PathBuf::from("/wb/.hands/runtime.lock")));
        assert!(diag.to_string().contains("help: delete `.hands/runtime.lock`"));
    }

    #[test]
    fn test_plain_errors_have_no_suggestion() {
        let diag = Diagnostic::from_error(&anyhow::anyhow!("boom"));
        assert_eq!(diag.to_string(), "error: boom\n");
    }
}
