//! `hands clean` command

use anyhow::Result;

use crate::cli::{CleanArgs, GlobalArgs};
use crate::commands::{shell, workbook_root};
use hands::ops::{clean, CleanOptions};
use hands::runtime::lockfile::SystemProbe;
use hands::util::shell::Status;
use hands::GlobalContext;

pub fn execute(args: CleanArgs, globals: &GlobalArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let shell = shell(globals, false);
    let root = workbook_root(&ctx, globals)?;

    let removed = clean(&root, CleanOptions { all: args.all }, &SystemProbe)?;
    if removed.is_empty() {
        shell.note("nothing to remove");
    }
    for dir in removed {
        shell.status(Status::Finished, format!("removed {}", dir.display()));
    }
    Ok(())
}
