//! Structured build errors.
//!
//! Raw bundler and worker output is turned into [`BuildError`] values by an
//! [`ErrorClassifier`]. The classifier is the only place that knows what the
//! underlying tool's messages look like.
//!
//! # Error Kinds
//!
//! - `resolve`: an import could not be resolved
//! - `syntax`: the source could not be parsed
//! - `type`: a type checker rejected the source
//! - `other`: anything else

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::discovery::DiscoveryError;

/// Most lines of unrecognized output kept in a fallback error.
const FALLBACK_TAIL_LINES: usize = 20;

/// Kind of build failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildErrorKind {
    Resolve,
    Syntax,
    Type,
    Other,
}

impl BuildErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildErrorKind::Resolve => "resolve",
            BuildErrorKind::Syntax => "syntax",
            BuildErrorKind::Type => "type",
            BuildErrorKind::Other => "other",
        }
    }
}

/// A single structured build error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildError {
    #[serde(rename = "type")]
    pub kind: BuildErrorKind,
    /// Module specifier involved (resolve errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl BuildError {
    fn new(kind: BuildErrorKind, message: impl Into<String>) -> Self {
        BuildError {
            kind,
            module: None,
            file: None,
            line: None,
            column: None,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Build an `other` error for conditions no tool reported, such as a
    /// spawn failure or a timeout.
    pub fn other(message: impl Into<String>) -> Self {
        BuildError::new(BuildErrorKind::Other, message)
    }

    /// One-line rendering: `file:line:col: [kind] message`.
    pub fn summary(&self) -> String {
        let location = match (&self.file, self.line, self.column) {
            (Some(file), Some(line), Some(col)) => format!("{}:{}:{}: ", file.display(), line, col),
            (Some(file), Some(line), None) => format!("{}:{}: ", file.display(), line),
            (Some(file), None, _) => format!("{}: ", file.display()),
            _ => String::new(),
        };
        format!("{}[{}] {}", location, self.kind.as_str(), self.message)
    }
}

impl From<&DiscoveryError> for BuildError {
    fn from(error: &DiscoveryError) -> Self {
        BuildError {
            file: Some(error.path.clone()),
            ..BuildError::other(error.message.clone())
        }
    }
}

/// Turns raw tool output into structured errors.
pub trait ErrorClassifier: Send + Sync {
    /// Classify captured output. Returns an empty list if nothing in the
    /// output looks like an error.
    fn classify(&self, output: &str) -> Vec<BuildError>;

    /// Classify output from a command that is known to have failed.
    ///
    /// Never returns an empty list: unrecognized output becomes a single
    /// `other` error carrying the tail of the output.
    fn classify_failure(&self, output: &str) -> Vec<BuildError> {
        let errors = self.classify(output);
        if !errors.is_empty() {
            return errors;
        }

        let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
        let tail = &lines[lines.len().saturating_sub(FALLBACK_TAIL_LINES)..];
        let message = if tail.is_empty() {
            "command failed without output".to_string()
        } else {
            tail.join("\n")
        };
        vec![BuildError::other(message)]
    }
}

/// `✘ [ERROR] message` or `X [ERROR] message` on terminals without unicode.
static ERROR_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:✘|X)?\s*\[ERROR\]\s+(.+?)\s*$").expect("valid header regex")
});

/// `    src/entry.ts:3:20:`
static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+(\S.*?):(\d+):(\d+):\s*$").expect("valid location regex")
});

/// `src/a.ts(3,5): error TS2322: message`
static TS_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S.*?)\((\d+),(\d+)\): error (TS\d+): (.+)$").expect("valid ts regex")
});

static RESOLVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"Could not resolve "([^"]+)""#,
        r#"No such module "([^"]+)""#,
        r"Cannot find module '([^']+)'",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid resolve regex"))
    .collect()
});

const SYNTAX_PREFIXES: &[&str] = &[
    "Expected ",
    "Unexpected ",
    "Unterminated ",
    "Syntax error",
    "The character ",
    "Invalid assignment target",
    "Unexpected end of file",
];

/// Classifier for esbuild-formatted output.
///
/// Also covers the worker runtime, which reports build failures in the
/// same format.
#[derive(Debug, Clone, Copy, Default)]
pub struct EsbuildClassifier;

impl ErrorClassifier for EsbuildClassifier {
    fn classify(&self, output: &str) -> Vec<BuildError> {
        let lines: Vec<&str> = output.lines().collect();
        let mut errors = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            if let Some(caps) = TS_ERROR.captures(line) {
                errors.push(BuildError {
                    kind: BuildErrorKind::Type,
                    file: Some(PathBuf::from(&caps[1])),
                    line: caps[2].parse().ok(),
                    column: caps[3].parse().ok(),
                    message: format!("{}: {}", &caps[4], &caps[5]),
                    ..BuildError::other("")
                });
                continue;
            }

            let Some(caps) = ERROR_HEADER.captures(line) else {
                continue;
            };
            let mut error = classify_message(&caps[1]);

            // The location line follows the header, before the next header.
            let location = lines[index + 1..]
                .iter()
                .take_while(|l| !ERROR_HEADER.is_match(l))
                .find_map(|l| LOCATION.captures(l));
            if let Some(loc) = location {
                error.file = Some(PathBuf::from(&loc[1]));
                error.line = loc[2].parse().ok();
                error.column = loc[3].parse().ok();
            }

            errors.push(error);
        }

        errors
    }
}

fn classify_message(message: &str) -> BuildError {
    for pattern in RESOLVE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(message) {
            let module = caps[1].to_string();
            let suggestion = if module.starts_with('.') || module.starts_with('/') {
                format!("check that `{}` exists relative to the importing file", module)
            } else {
                format!("install it with `npm install {}`", module)
            };
            return BuildError {
                kind: BuildErrorKind::Resolve,
                message: format!("could not resolve module `{}`", module),
                module: Some(module),
                suggestion: Some(suggestion),
                ..BuildError::other("")
            };
        }
    }

    if SYNTAX_PREFIXES.iter().any(|p| message.starts_with(p)) {
        return BuildError::new(BuildErrorKind::Syntax, message);
    }

    BuildError::other(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNRESOLVED_FOO: &str = r#"✘ [ERROR] Could not resolve "foo"

    blocks/chart.tsx:1:20:
      1 │ import { x } from "foo";
        ╵                   ~~~~~

  You can mark the path "foo" as external to exclude it from the bundle.

1 error
"#;

    #[test]
    fn test_unresolved_module() {
        let errors = EsbuildClassifier.classify(UNRESOLVED_FOO);
        assert_eq!(errors.len(), 1);

        let error = &errors[0];
        assert_eq!(error.kind, BuildErrorKind::Resolve);
        assert_eq!(error.module.as_deref(), Some("foo"));
        assert!(error.message.contains("foo"));
        assert_eq!(error.file, Some(PathBuf::from("blocks/chart.tsx")));
        assert_eq!(error.line, Some(1));
        assert_eq!(error.column, Some(20));
        assert!(error.suggestion.as_deref().unwrap().contains("npm install foo"));
    }

    #[test]
    fn test_syntax_and_other() {
        let output = "X [ERROR] Expected \";\" but found \"x\"\n\n    pages/a.ts:2:4:\n\nX [ERROR] Something odd happened\n";
        let errors = EsbuildClassifier.classify(output);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].kind, BuildErrorKind::Syntax);
        assert_eq!(errors[0].line, Some(2));
        assert_eq!(errors[1].kind, BuildErrorKind::Other);
        assert_eq!(errors[1].file, None);
    }

    #[test]
    fn test_type_error() {
        let output = "blocks/table.tsx(3,5): error TS2322: Type 'string' is not assignable to type 'number'.";
        let errors = EsbuildClassifier.classify(output);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, BuildErrorKind::Type);
        assert_eq!(errors[0].column, Some(5));
        assert!(errors[0].message.starts_with("TS2322"));
    }

    #[test]
    fn test_worker_missing_module() {
        let errors = EsbuildClassifier.classify("✘ [ERROR] No such module \"node:fs\".");
        assert_eq!(errors[0].kind, BuildErrorKind::Resolve);
        assert_eq!(errors[0].module.as_deref(), Some("node:fs"));
    }

    #[test]
    fn test_failure_fallback() {
        assert!(EsbuildClassifier.classify("all good\n").is_empty());

        let errors = EsbuildClassifier.classify_failure("segfault\n\n");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, BuildErrorKind::Other);
        assert_eq!(errors[0].message, "segfault");

        let errors = EsbuildClassifier.classify_failure("");
        assert_eq!(errors[0].message, "command failed without output");
    }

    #[test]
    fn test_serialization() {
        let errors = EsbuildClassifier.classify(UNRESOLVED_FOO);
        let json = serde_json::to_value(&errors[0]).unwrap();
        assert_eq!(json["type"], "resolve");
        assert_eq!(json["module"], "foo");
        assert!(json.get("suggestion").is_some());
    }

    #[test]
    fn test_summary() {
        let error = BuildError {
            file: Some(PathBuf::from("a.ts")),
            line: Some(3),
            column: Some(1),
            ..BuildError::new(BuildErrorKind::Syntax, "Unexpected \"}\"")
        };
        assert_eq!(error.summary(), "a.ts:3:1: [syntax] Unexpected \"}\"");
    }
}
