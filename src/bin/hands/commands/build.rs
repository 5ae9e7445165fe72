//! `hands build` command

use anyhow::{bail, Result};

use crate::cli::{BuildArgs, GlobalArgs};
use crate::commands::{shell, workbook_root};
use hands::builder::build::BuildOptions;
use hands::ops::{build, format_build};
use hands::util::shell::{format_duration, Status};
use hands::GlobalContext;

pub fn execute(args: BuildArgs, globals: &GlobalArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let shell = shell(globals, args.json);
    let root = workbook_root(&ctx, globals)?;
    let config = ctx.load_config(&root);

    let opts = BuildOptions {
        dev: !args.release,
        verbose: globals.verbose,
    };

    shell.status(Status::Building, root.display());
    let start = std::time::Instant::now();
    let result = build(&config, &root, &opts)?;

    if shell.is_json() {
        shell.print_json(&serde_json::to_value(&result)?);
    } else {
        eprint!("{}", format_build(&result));
    }

    if !result.success {
        bail!("could not build workbook: {} errors", result.errors.len());
    }

    shell.status(
        Status::Finished,
        format!("`{}` in {}", result.out_dir.display(), format_duration(start.elapsed())),
    );
    Ok(())
}
