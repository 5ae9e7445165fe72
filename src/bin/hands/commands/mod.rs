//! Command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::cli::GlobalArgs;
use hands::util::shell::{ColorChoice, Shell};
use hands::GlobalContext;

pub mod build;
pub mod check;
pub mod clean;
pub mod completions;
pub mod dev;
pub mod status;
pub mod sync;

pub fn shell(globals: &GlobalArgs, json: bool) -> Shell {
    let color = if globals.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };
    Shell::from_flags(globals.quiet, globals.verbose, color, json)
}

/// Root of the workbook the command operates on.
pub fn workbook_root(ctx: &GlobalContext, globals: &GlobalArgs) -> Result<PathBuf> {
    Ok(ctx.find_workbook_root(globals.dir.as_deref())?)
}

/// Like [`workbook_root`], but falls back to the requested directory when
/// no manifest is found so the command can report on it.
pub fn workbook_root_or_dir(ctx: &GlobalContext, globals: &GlobalArgs) -> PathBuf {
    workbook_root(ctx, globals).unwrap_or_else(|_| match &globals.dir {
        Some(dir) => ctx.cwd().join(dir),
        None => ctx.cwd().to_path_buf(),
    })
}

pub fn async_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")
}
