//! `hands sync` command

use anyhow::{bail, Result};

use crate::cli::{GlobalArgs, SyncArgs};
use crate::commands::{async_runtime, shell, workbook_root};
use hands::ops::sync_source;
use hands::runtime::events::SyncStatus;
use hands::util::shell::Status;
use hands::GlobalContext;

pub fn execute(args: SyncArgs, globals: &GlobalArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let shell = shell(globals, false);
    let root = workbook_root(&ctx, globals)?;
    let config = ctx.load_config(&root);

    let spinner = shell.spinner(Status::Syncing, &args.source);
    let progress = async_runtime()?.block_on(sync_source(&config, &root, &args.source));
    drop(spinner);
    let progress = progress?;

    match progress.status {
        SyncStatus::Failed { message } => bail!("sync `{}` failed: {}", progress.source, message),
        _ => {
            shell.status(
                Status::Finished,
                format!("`{}` ({} rows)", progress.source, progress.rows),
            );
            Ok(())
        }
    }
}
