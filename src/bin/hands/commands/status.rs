//! `hands status` command

use anyhow::Result;

use crate::cli::{GlobalArgs, StatusArgs};
use crate::commands::{shell, workbook_root_or_dir};
use hands::ops::{format_status, status};
use hands::runtime::lockfile::SystemProbe;
use hands::GlobalContext;

pub fn execute(args: StatusArgs, globals: &GlobalArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let shell = shell(globals, args.json);
    let root = workbook_root_or_dir(&ctx, globals);

    let report = status(&root, &SystemProbe)?;

    if shell.is_json() {
        shell.print_json(&serde_json::to_value(&report)?);
    } else {
        print!("{}", format_status(&report));
    }
    Ok(())
}
