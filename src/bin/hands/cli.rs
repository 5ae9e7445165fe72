//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// Hands - local development runtime for workbooks
#[derive(Parser)]
#[command(name = "hands")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Workbook directory (defaults to the nearest parent with hands.toml)
    #[arg(short = 'C', long = "dir", global = true, env = "HANDS_WORKBOOK_DIR")]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every command.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub verbose: bool,
    pub quiet: bool,
    pub no_color: bool,
    pub dir: Option<PathBuf>,
}

impl Cli {
    pub fn globals(&self) -> GlobalArgs {
        GlobalArgs {
            verbose: self.verbose,
            quiet: self.quiet,
            no_color: self.no_color,
            dir: self.dir.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bundle the workbook into a worker
    Build(BuildArgs),

    /// Check the workbook and the tools the runtime needs
    Check(CheckArgs),

    /// Run the database, worker, and sync scheduler until Ctrl-C
    Dev(DevArgs),

    /// Show whether a runtime is running for the workbook
    Status(StatusArgs),

    /// Run one data source now
    Sync(SyncArgs),

    /// Remove generated build output
    Clean(CleanArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct BuildArgs {
    /// Production build: minified, no source maps
    #[arg(short, long)]
    pub release: bool,

    /// Print the build result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Treat failed optional checks as errors
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args)]
pub struct DevArgs {
    /// Do not rebuild when files change
    #[arg(long)]
    pub no_watch: bool,

    /// Print the final runtime status as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct SyncArgs {
    /// Source name from [sources] in hands.toml
    pub source: String,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Also remove the database cluster
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
