//! `hands check` command

use anyhow::Result;

use crate::cli::{CheckArgs, GlobalArgs};
use crate::commands::{shell, workbook_root_or_dir};
use hands::ops::{check, format_report, CheckOptions};
use hands::GlobalContext;

pub fn execute(args: CheckArgs, globals: &GlobalArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let shell = shell(globals, args.json);
    let dir = workbook_root_or_dir(&ctx, globals);
    let config = ctx.load_config(&dir);

    let report = check(&config, &dir, CheckOptions { strict: args.strict });

    if shell.is_json() {
        shell.print_json(&serde_json::to_value(&report)?);
    } else {
        print!("{}", format_report(&report, globals.verbose));
    }

    // Exit with error code if any check failed
    if !report.success {
        std::process::exit(1);
    }

    Ok(())
}
