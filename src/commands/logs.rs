use anyhow::Result;
use fleet::runs;

use super::Session;
use crate::Context;
use crate::cli::RunArgs;
use crate::{select, ui};

pub fn run(ctx: &Context, args: &RunArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let spec = session.select_one(ctx, &args.select)?;
    let history = runs::list_runs(session.clients.monitors.as_ref(), &spec.name)?;
    let run = select::run(&history, args.last)?;

    let log = runs::fetch_run_log(session.clients.storage.as_ref(), run)?;
    if !ctx.quiet {
        ui::header(&format!("{} run {}", spec.name, run.id));
    }
    println!("{}", log.trim_end());
    Ok(())
}
