//! Hands CLI - local development runtime for workbooks

use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use hands::util::diagnostic::{emit, Diagnostic};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        let color = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        emit(&Diagnostic::from_error(&e), color);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("hands=debug")
        } else {
            EnvFilter::new("hands=info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let globals = cli.globals();

    // Execute command
    match cli.command {
        Commands::Build(args) => commands::build::execute(args, &globals),
        Commands::Check(args) => commands::check::execute(args, &globals),
        Commands::Dev(args) => commands::dev::execute(args, &globals),
        Commands::Status(args) => commands::status::execute(args, &globals),
        Commands::Sync(args) => commands::sync::execute(args, &globals),
        Commands::Clean(args) => commands::clean::execute(args, &globals),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
