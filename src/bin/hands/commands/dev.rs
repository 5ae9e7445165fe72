//! `hands dev` command

use anyhow::Result;

use crate::cli::{DevArgs, GlobalArgs};
use crate::commands::{async_runtime, shell, workbook_root};
use hands::builder::build::BuildOptions;
use hands::ops::{dev, DevOptions};
use hands::GlobalContext;

pub fn execute(args: DevArgs, globals: &GlobalArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let shell = shell(globals, args.json);
    let root = workbook_root(&ctx, globals)?;
    let config = ctx.load_config(&root);

    let options = DevOptions {
        build: BuildOptions {
            dev: true,
            verbose: globals.verbose,
        },
        watch: !args.no_watch,
    };

    let status = async_runtime()?.block_on(dev(config, &root, options, &shell))?;
    shell.print_json(&serde_json::to_value(&status)?);
    Ok(())
}
