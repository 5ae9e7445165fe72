//! Terminal output for the CLI.
//!
//! Status lines go to stderr as `{label:>12} {message}`; JSON documents
//! go to stdout. A JSON shell prints nothing else, so stdout stays
//! parseable.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// How much human output to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only
    Quiet,
    #[default]
    Normal,
    /// No spinners; tracing carries the detail
    Verbose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorChoice {
    /// Color when stderr is a terminal
    #[default]
    Auto,
    Always,
    Never,
}

/// Label printed in front of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Finished,
    Running,
    Ready,
    Stopped,
    Building,
    Bundling,
    Starting,
    Stopping,
    Syncing,
    Watching,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Done,
    Busy,
    Info,
    Warn,
    Fail,
}

impl Tone {
    fn ansi(self) -> &'static str {
        match self {
            Tone::Done => "\x1b[1;32m",
            Tone::Busy => "\x1b[1;36m",
            Tone::Info => "\x1b[1;34m",
            Tone::Warn => "\x1b[1;33m",
            Tone::Fail => "\x1b[1;31m",
        }
    }
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Status::Finished => "Finished",
            Status::Running => "Running",
            Status::Ready => "Ready",
            Status::Stopped => "Stopped",
            Status::Building => "Building",
            Status::Bundling => "Bundling",
            Status::Starting => "Starting",
            Status::Stopping => "Stopping",
            Status::Syncing => "Syncing",
            Status::Watching => "Watching",
            Status::Info => "Info",
            Status::Warning => "Warning",
            Status::Error => "error",
        }
    }

    fn tone(self) -> Tone {
        match self {
            Status::Finished | Status::Running | Status::Ready | Status::Stopped => Tone::Done,
            Status::Info => Tone::Info,
            Status::Warning => Tone::Warn,
            Status::Error => Tone::Fail,
            _ => Tone::Busy,
        }
    }
}

const LABEL_WIDTH: usize = 12;

#[derive(Debug)]
pub struct Shell {
    /// `None` in JSON mode
    verbosity: Option<Verbosity>,
    color: bool,
}

impl Shell {
    pub fn human(verbosity: Verbosity, color: ColorChoice) -> Self {
        let color = match color {
            ColorChoice::Auto => io::stderr().is_terminal(),
            ColorChoice::Always => true,
            ColorChoice::Never => false,
        };
        Shell {
            verbosity: Some(verbosity),
            color,
        }
    }

    pub fn json() -> Self {
        Shell {
            verbosity: None,
            color: false,
        }
    }

    /// Shell for the global CLI flags. `--json` wins over `--quiet` and
    /// `--verbose`.
    pub fn from_flags(quiet: bool, verbose: bool, color: ColorChoice, json: bool) -> Self {
        if json {
            return Shell::json();
        }
        let verbosity = match (quiet, verbose) {
            (true, _) => Verbosity::Quiet,
            (false, true) => Verbosity::Verbose,
            (false, false) => Verbosity::Normal,
        };
        Shell::human(verbosity, color)
    }

    pub fn is_json(&self) -> bool {
        self.verbosity.is_none()
    }

    pub fn is_quiet(&self) -> bool {
        self.verbosity == Some(Verbosity::Quiet)
    }

    pub fn status(&self, status: Status, msg: impl Display) {
        if self.is_json() || (self.is_quiet() && status != Status::Error) {
            return;
        }
        eprintln!("{} {}", self.label(status), msg);
    }

    pub fn note(&self, msg: impl Display) {
        self.status(Status::Info, msg);
    }

    pub fn warn(&self, msg: impl Display) {
        self.status(Status::Warning, msg);
    }

    /// Errors reach JSON consumers as `{"error": ...}`.
    pub fn error(&self, msg: impl Display) {
        if self.is_json() {
            self.print_json(&serde_json::json!({ "error": msg.to_string() }));
        } else {
            self.status(Status::Error, msg);
        }
    }

    /// Print a JSON document to stdout. Ignored outside JSON mode.
    pub fn print_json(&self, value: &serde_json::Value) {
        if !self.is_json() {
            return;
        }
        let mut stdout = io::stdout().lock();
        if serde_json::to_writer_pretty(&mut stdout, value).is_ok() {
            let _ = writeln!(stdout);
        }
        let _ = stdout.flush();
    }

    /// Spinner for an open-ended wait. Falls back to a plain status line
    /// when stderr is not an interactive terminal at normal verbosity.
    pub fn spinner(&self, status: Status, msg: impl Display) -> Spinner {
        if self.verbosity != Some(Verbosity::Normal) || !io::stderr().is_terminal() {
            self.status(status, &msg);
            return Spinner { bar: None };
        }

        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            bar.set_style(style);
        }
        bar.set_message(format!("{} {}", status.label(), msg));
        bar.enable_steady_tick(Duration::from_millis(100));
        Spinner { bar: Some(bar) }
    }

    fn label(&self, status: Status) -> String {
        if self.color {
            format!(
                "{}{:>width$}\x1b[0m",
                status.tone().ansi(),
                status.label(),
                width = LABEL_WIDTH
            )
        } else {
            format!("{:>width$}", status.label(), width = LABEL_WIDTH)
        }
    }
}

/// Clears itself when dropped.
pub struct Spinner {
    bar: Option<ProgressBar>,
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{:.2}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}
